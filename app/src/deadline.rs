// ==============================================================================
// deadline.rs - Invocation Deadline Tracker
// ==============================================================================
// Description: Remaining-time budget of the current invocation compared
//              against a safety margin
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================

use std::time::{Duration, Instant};

/// Source of the current invocation's remaining execution time
pub trait RemainingTime: Send + Sync {
    fn remaining(&self) -> Duration;
}

/// Wall-clock budget starting at construction
#[derive(Debug, Clone, Copy)]
pub struct WallClock {
    expires_at: Instant,
}

impl WallClock {
    pub fn new(budget: Duration) -> Self {
        Self {
            expires_at: Instant::now() + budget,
        }
    }
}

impl RemainingTime for WallClock {
    fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }
}

struct Unbounded;

impl RemainingTime for Unbounded {
    fn remaining(&self) -> Duration {
        Duration::MAX
    }
}

/// Answers "are we out of time" for a single invocation
///
/// Stages that loop over an unbounded work list consult this before every
/// unit, not once up front: a single unit can itself be slow.
pub struct Deadline {
    clock: Box<dyn RemainingTime>,
    margin: Duration,
}

impl Deadline {
    /// Deadline `budget` from now with the given safety margin
    pub fn new(budget: Duration, margin: Duration) -> Self {
        Self::with_clock(WallClock::new(budget), margin)
    }

    pub fn with_clock(clock: impl RemainingTime + 'static, margin: Duration) -> Self {
        Self {
            clock: Box::new(clock),
            margin,
        }
    }

    /// A deadline that never expires (ingress and operator tooling)
    pub fn unbounded() -> Self {
        Self::with_clock(Unbounded, Duration::ZERO)
    }

    pub fn remaining(&self) -> Duration {
        self.clock.remaining()
    }

    pub fn margin(&self) -> Duration {
        self.margin
    }

    /// True once remaining time is at or below the margin
    pub fn out_of_time(&self) -> bool {
        self.clock.remaining() <= self.margin
    }

    /// `wanted`, shortened so that it ends before the margin is reached
    pub fn cap(&self, wanted: Duration) -> Duration {
        wanted.min(self.clock.remaining().saturating_sub(self.margin))
    }
}

impl std::fmt::Debug for Deadline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deadline")
            .field("remaining", &self.remaining())
            .field("margin", &self.margin)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed(Duration);

    impl RemainingTime for Fixed {
        fn remaining(&self) -> Duration {
            self.0
        }
    }

    struct Countdown {
        calls: AtomicUsize,
    }

    impl RemainingTime for Countdown {
        fn remaining(&self) -> Duration {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) as u64;
            Duration::from_secs(10u64.saturating_sub(n * 4))
        }
    }

    #[test]
    fn test_margin_boundary_is_out_of_time() {
        let margin = Duration::from_secs(5);
        assert!(Deadline::with_clock(Fixed(Duration::from_secs(5)), margin).out_of_time());
        assert!(Deadline::with_clock(Fixed(Duration::from_secs(4)), margin).out_of_time());
        assert!(!Deadline::with_clock(Fixed(Duration::from_secs(6)), margin).out_of_time());
    }

    #[test]
    fn test_rechecks_clock_each_call() {
        let deadline = Deadline::with_clock(
            Countdown {
                calls: AtomicUsize::new(0),
            },
            Duration::from_secs(3),
        );
        assert!(!deadline.out_of_time()); // 10s left
        assert!(!deadline.out_of_time()); // 6s left
        assert!(deadline.out_of_time()); // 2s left
    }

    #[test]
    fn test_cap_stops_short_of_margin() {
        let deadline = Deadline::with_clock(Fixed(Duration::from_secs(60)), Duration::from_secs(5));
        assert_eq!(deadline.cap(Duration::from_secs(10)), Duration::from_secs(10));
        assert_eq!(deadline.cap(Duration::from_secs(3600)), Duration::from_secs(55));

        let spent = Deadline::with_clock(Fixed(Duration::from_secs(2)), Duration::from_secs(5));
        assert_eq!(spent.cap(Duration::from_secs(10)), Duration::ZERO);
        assert_eq!(Deadline::unbounded().cap(Duration::from_secs(7)), Duration::from_secs(7));
    }

    #[test]
    fn test_zero_budget_expired() {
        let deadline = Deadline::new(Duration::ZERO, Duration::ZERO);
        assert!(deadline.out_of_time());
        assert!(!Deadline::unbounded().out_of_time());
    }
}
