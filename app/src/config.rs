// ==============================================================================
// config.rs - Pipeline Tunables
// ==============================================================================
// Description: Environment-driven configuration for deadlines, barrier polling,
//              reduce-tree batching, indexing and result serving
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================

use std::str::FromStr;
use std::time::Duration;

use crate::error::{PipelineError, Result};

/// Orchestration tunables
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Remaining time at which a task stops taking new work and checkpoints
    pub deadline_margin: Duration,
    /// Time budget the worker grants each invocation
    pub invocation_budget: Duration,
    /// Maximum total time the join barrier waits for upstream branches
    pub barrier_max_wait: Duration,
    /// Sleep before the barrier re-dispatches itself
    pub barrier_poll_interval: Duration,
    /// Branch outputs per first-round merge page
    pub concat_page_size: usize,
    /// Fragments per reduce-tree batch
    pub merge_batch_size: usize,
    /// Fragment counts at or below this are concatenated directly
    pub merge_direct_threshold: usize,
    /// Stabilisation retries before a merge round is declared stalled
    pub merge_max_retries: u32,
    /// Sleep before a stabilisation retry
    pub merge_retry_interval: Duration,
    /// Records per position-index page
    pub index_page_records: usize,
    /// Bytes per position-index page
    pub index_page_bytes: usize,
    /// Serialized envelope size above which the payload goes to the blob store
    pub bus_message_limit: usize,
    /// Results smaller than this are served whole
    pub inline_result_limit: u64,
    /// Lifetime of a direct read handle
    pub result_url_ttl: Duration,
    /// Suffix appended to the run id for the final result object
    pub result_suffix: String,
    /// Stage receiving each work unit fanned out by `split`
    pub split_target_stage: String,
    /// Pending runs older than this are expired by maintenance
    pub pending_expiry: Duration,
    /// Completed runs older than this have their results purged
    pub result_retention: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            deadline_margin: Duration::from_millis(130_000),
            invocation_budget: Duration::from_secs(900),
            barrier_max_wait: Duration::from_secs(2 * 60 * 60),
            barrier_poll_interval: Duration::from_secs(5),
            concat_page_size: 600,
            merge_batch_size: 20,
            merge_direct_threshold: 10,
            merge_max_retries: 120,
            merge_retry_interval: Duration::from_secs(5),
            index_page_records: 1_000,
            index_page_bytes: 10_000_000,
            bus_message_limit: 260_000,
            inline_result_limit: 5_000_000,
            result_url_ttl: Duration::from_secs(3600),
            result_suffix: ".tsv".to_string(),
            split_target_stage: "annotate".to_string(),
            pending_expiry: Duration::from_secs(48 * 3600),
            result_retention: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables, falling back to defaults
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let config = Self {
            deadline_margin: Duration::from_millis(env_or("DEADLINE_MARGIN_MS", 130_000)?),
            invocation_budget: Duration::from_secs(env_or("INVOCATION_BUDGET_SECS", 900)?),
            barrier_max_wait: Duration::from_secs(env_or("BARRIER_MAX_WAIT_SECS", 7200)?),
            barrier_poll_interval: Duration::from_secs(env_or("BARRIER_POLL_INTERVAL_SECS", 5)?),
            concat_page_size: env_or("CONCAT_PAGE_SIZE", defaults.concat_page_size)?,
            merge_batch_size: env_or("MERGE_BATCH_SIZE", defaults.merge_batch_size)?,
            merge_direct_threshold: env_or("MERGE_DIRECT_THRESHOLD", defaults.merge_direct_threshold)?,
            merge_max_retries: env_or("MERGE_MAX_RETRIES", defaults.merge_max_retries)?,
            merge_retry_interval: Duration::from_secs(env_or("MERGE_RETRY_INTERVAL_SECS", 5)?),
            index_page_records: env_or("INDEX_PAGE_RECORDS", defaults.index_page_records)?,
            index_page_bytes: env_or("INDEX_PAGE_BYTES", defaults.index_page_bytes)?,
            bus_message_limit: env_or("BUS_MESSAGE_LIMIT", defaults.bus_message_limit)?,
            inline_result_limit: env_or("INLINE_RESULT_LIMIT", defaults.inline_result_limit)?,
            result_url_ttl: Duration::from_secs(env_or("RESULT_URL_TTL_SECS", 3600)?),
            result_suffix: std::env::var("RESULT_SUFFIX").unwrap_or(defaults.result_suffix),
            split_target_stage: std::env::var("SPLIT_TARGET_STAGE")
                .unwrap_or(defaults.split_target_stage),
            pending_expiry: Duration::from_secs(env_or::<u64>("PENDING_EXPIRY_HOURS", 48)? * 3600),
            result_retention: Duration::from_secs(
                env_or::<u64>("RESULT_RETENTION_HOURS", 168)? * 3600,
            ),
        };

        config.validate()?;
        Ok(config)
    }

    /// Time a `processing` run may go without a status change before
    /// maintenance declares it stalled: the longest barrier wait, a full
    /// merge stabilisation window and one more invocation to finish
    pub fn stall_timeout(&self) -> Duration {
        let retries = self
            .merge_retry_interval
            .saturating_mul(self.merge_max_retries);
        self.barrier_max_wait
            .saturating_add(retries)
            .saturating_add(self.invocation_budget)
    }

    /// Reject settings that would stop the reduce tree from converging or a
    /// task from re-dispatching itself before its invocation ends
    pub fn validate(&self) -> Result<()> {
        if self.merge_batch_size < 2 {
            return Err(PipelineError::Config(format!(
                "MERGE_BATCH_SIZE must be at least 2 (got {})",
                self.merge_batch_size
            )));
        }
        if self.merge_direct_threshold < 1 {
            return Err(PipelineError::Config(
                "MERGE_DIRECT_THRESHOLD must be at least 1".to_string(),
            ));
        }
        if self.concat_page_size == 0 {
            return Err(PipelineError::Config("CONCAT_PAGE_SIZE must be positive".to_string()));
        }
        if self.index_page_records == 0 || self.index_page_bytes == 0 {
            return Err(PipelineError::Config(
                "INDEX_PAGE_RECORDS and INDEX_PAGE_BYTES must be positive".to_string(),
            ));
        }
        if self.deadline_margin >= self.invocation_budget {
            return Err(PipelineError::Config(format!(
                "DEADLINE_MARGIN_MS ({:?}) must be below INVOCATION_BUDGET_SECS ({:?})",
                self.deadline_margin, self.invocation_budget
            )));
        }
        let usable = self.invocation_budget - self.deadline_margin;
        for (name, interval) in [
            ("BARRIER_POLL_INTERVAL_SECS", self.barrier_poll_interval),
            ("MERGE_RETRY_INTERVAL_SECS", self.merge_retry_interval),
        ] {
            if interval >= usable {
                return Err(PipelineError::Config(format!(
                    "{} ({:?}) must be below the usable invocation time ({:?})",
                    name, interval, usable
                )));
            }
        }
        Ok(())
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| PipelineError::Config(format!("{} has invalid value '{}'", key, raw))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.merge_batch_size, 20);
        assert_eq!(config.merge_direct_threshold, 10);
        assert_eq!(config.barrier_max_wait, Duration::from_secs(7200));
    }

    #[test]
    fn test_rejects_degenerate_batch_size() {
        let config = PipelineConfig {
            merge_batch_size: 1,
            ..PipelineConfig::default()
        };
        assert!(matches!(config.validate(), Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_rejects_sleeps_outlasting_invocation() {
        let config = PipelineConfig {
            barrier_poll_interval: Duration::from_secs(3600),
            ..PipelineConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("BARRIER_POLL_INTERVAL_SECS"));

        // 900s budget less 130s margin leaves 770s
        let config = PipelineConfig {
            merge_retry_interval: Duration::from_secs(770),
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
        let config = PipelineConfig {
            merge_retry_interval: Duration::from_secs(769),
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_stall_timeout_covers_barrier_and_merge() {
        let config = PipelineConfig::default();
        // 7200s barrier + 120 * 5s retries + 900s budget
        assert_eq!(config.stall_timeout(), Duration::from_secs(8700));
    }

    #[test]
    fn test_rejects_margin_above_budget() {
        let config = PipelineConfig {
            deadline_margin: Duration::from_secs(1000),
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
