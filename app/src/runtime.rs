// ==============================================================================
// runtime.rs - Stage Invocation
// ==============================================================================
// Description: Runs one stage handler per bus message and applies the failure
//              policy: handler errors become a failed Job Record, never a
//              redelivery
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{info, warn};

use crate::bus::MemoryBus;
use crate::deadline::Deadline;
use crate::envelope::TaskEnvelope;
use crate::error::{PipelineError, Result};
use crate::jobs::JobStore;
use crate::lineage::StageName;
use crate::orchestrator::{Orchestrator, Services};

/// Work performed by one stage
#[async_trait]
pub trait StageHandler: Send + Sync {
    async fn handle(&self, orc: &mut Orchestrator) -> Result<()>;
}

/// Stage name to handler lookup
#[derive(Clone, Default)]
pub struct StageRegistry {
    handlers: HashMap<StageName, Arc<dyn StageHandler>>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, stage: StageName, handler: Arc<dyn StageHandler>) -> &mut Self {
        self.handlers.insert(stage, handler);
        self
    }

    pub fn get(&self, stage: &StageName) -> Option<Arc<dyn StageHandler>> {
        self.handlers.get(stage).cloned()
    }

    /// Registered stage names, sorted
    pub fn stages(&self) -> Vec<StageName> {
        let mut stages: Vec<_> = self.handlers.keys().cloned().collect();
        stages.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        stages
    }
}

/// How an invocation ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Handler returned normally; `resent` if it re-dispatched itself
    Completed { resent: bool },
    /// The run had already failed; nothing was done
    Aborted,
    /// The handler failed and the run was marked failed
    Failed { step: String, message: String },
}

/// Execute one bus message addressed to `stage`
///
/// Only infrastructure errors that prevent recording an outcome are returned
/// as `Err`; handler errors are recorded on the Job Record.
pub async fn run_invocation(
    services: &Services,
    registry: &StageRegistry,
    stage: &StageName,
    body: &str,
    deadline: Deadline,
) -> Result<Outcome> {
    let envelope = TaskEnvelope::decode(body, services.temp.as_ref()).await?;
    if envelope.lineage.stage() != Some(stage) {
        warn!(
            "Envelope {} delivered to stage {}",
            envelope.lineage, stage
        );
    }
    let mut orc = Orchestrator::from_envelope(services.clone(), envelope, deadline);

    if services.jobs.is_failed(orc.run_id()).await? {
        info!("Run {} has failed, dropping {}", orc.run_id(), orc.lineage());
        orc.complete().await?;
        return Ok(Outcome::Aborted);
    }

    let result = match registry.get(stage) {
        Some(handler) => handler.handle(&mut orc).await,
        None => Err(PipelineError::UnknownStage(stage.to_string())),
    };

    match result {
        Ok(()) => {
            orc.complete().await?;
            Ok(Outcome::Completed {
                resent: orc.has_resent(),
            })
        }
        Err(e) if e.is_abort() => {
            info!("{} stopped: {}", orc.lineage(), e);
            orc.complete().await?;
            Ok(Outcome::Aborted)
        }
        Err(e) => {
            orc.fail(&e).await?;
            Ok(Outcome::Failed {
                step: orc.stage_label(),
                message: e.to_string(),
            })
        }
    }
}

/// Tallies from draining a local bus
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    pub invocations: usize,
    pub per_stage: BTreeMap<String, usize>,
    pub failures: Vec<String>,
}

type DeadlineFactory = Box<dyn Fn(&StageName) -> Deadline + Send + Sync>;

/// Single-process harness that delivers in-memory bus messages one at a time
///
/// Every self re-dispatch arrives as a fresh invocation, exactly as it would
/// through a real bus.
pub struct LocalRuntime {
    bus: Arc<MemoryBus>,
    services: Services,
    registry: StageRegistry,
    deadlines: DeadlineFactory,
}

impl LocalRuntime {
    pub fn new(bus: Arc<MemoryBus>, services: Services, registry: StageRegistry) -> Self {
        Self {
            bus,
            services,
            registry,
            deadlines: Box::new(|_| Deadline::unbounded()),
        }
    }

    /// Choose the deadline each invocation runs under
    pub fn with_deadlines(
        mut self,
        factory: impl Fn(&StageName) -> Deadline + Send + Sync + 'static,
    ) -> Self {
        self.deadlines = Box::new(factory);
        self
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn bus(&self) -> &MemoryBus {
        &self.bus
    }

    /// Deliver the oldest pending message; `None` when the bus is empty
    pub async fn step(&self) -> Result<Option<(StageName, Outcome)>> {
        let Some(delivery) = self.bus.pop() else {
            return Ok(None);
        };
        let deadline = (self.deadlines)(&delivery.stage);
        let outcome = run_invocation(
            &self.services,
            &self.registry,
            &delivery.stage,
            &delivery.body,
            deadline,
        )
        .await?;
        Ok(Some((delivery.stage, outcome)))
    }

    /// Deliver messages until the bus is empty or `max_invocations` is hit
    pub async fn run_until_idle(&self, max_invocations: usize) -> Result<RunStats> {
        let mut stats = RunStats::default();
        while stats.invocations < max_invocations {
            let Some((stage, outcome)) = self.step().await? else {
                break;
            };
            stats.invocations += 1;
            *stats.per_stage.entry(stage.to_string()).or_insert(0) += 1;
            if let Outcome::Failed { step, message } = outcome {
                stats.failures.push(format!("{}: {}", step, message));
            }
        }
        Ok(stats)
    }
}
