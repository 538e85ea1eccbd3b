// ==============================================================================
// orchestrator.rs - Dispatcher and Checkpoint/Resume Controller
// ==============================================================================
// Description: Per-invocation handle through which a stage dispatches children,
//              re-dispatches itself with its remaining work, and reports
//              completion or failure
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================

use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::bus::MessageBus;
use crate::config::PipelineConfig;
use crate::deadline::Deadline;
use crate::envelope::{check_reserved, TaskEnvelope};
use crate::error::{PipelineError, Result};
use crate::jobs::{JobStore, JobUpdate, Transition};
use crate::lineage::{DispatchCounter, Lineage, StageName};
use crate::liveness::LivenessMarkers;
use crate::logging::{truncate_middle, MAX_LOG_LENGTH};
use crate::reclaim;
use crate::storage::{BlobStore, StoreSet};

/// Backends shared by every invocation
#[derive(Clone)]
pub struct Services {
    pub bus: Arc<dyn MessageBus>,
    /// Liveness markers and offloaded payloads
    pub temp: Arc<dyn BlobStore>,
    /// Branch outputs and merge fragments
    pub regions: Arc<dyn BlobStore>,
    /// Final results and their indexes
    pub results: Arc<dyn BlobStore>,
    pub jobs: Arc<dyn JobStore>,
    pub config: Arc<PipelineConfig>,
}

impl Services {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        stores: StoreSet,
        jobs: Arc<dyn JobStore>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            bus,
            temp: stores.temp,
            regions: stores.regions,
            results: stores.results,
            jobs,
            config: Arc::new(config),
        }
    }

    pub fn markers(&self) -> LivenessMarkers {
        LivenessMarkers::new(self.temp.clone())
    }
}

/// How a child task is dispatched
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    /// Create a liveness marker for the child
    pub track: bool,
    /// Extra lineage label, e.g. a chromosome
    pub suffix: Option<String>,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self::tracked()
    }
}

impl DispatchOptions {
    pub fn tracked() -> Self {
        Self {
            track: true,
            suffix: None,
        }
    }

    pub fn untracked() -> Self {
        Self {
            track: false,
            suffix: None,
        }
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = Some(suffix.into());
        self
    }
}

/// Size of a work list before and after this invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub original: usize,
    pub remaining: usize,
}

pub struct Orchestrator {
    services: Services,
    lineage: Lineage,
    tracked: bool,
    from_bus: bool,
    payload: Value,
    counter: DispatchCounter,
    resent: bool,
    deadline: Deadline,
}

impl Orchestrator {
    /// Handle for an invocation started by a bus message
    pub fn from_envelope(services: Services, envelope: TaskEnvelope, deadline: Deadline) -> Self {
        Self {
            services,
            lineage: envelope.lineage,
            tracked: envelope.tracked,
            from_bus: true,
            payload: envelope.payload,
            counter: DispatchCounter::new(),
            resent: false,
            deadline,
        }
    }

    /// Handle for the ingress request that starts a run. It owns no marker
    /// and cannot re-dispatch itself.
    pub fn for_run(services: Services, run_id: &str) -> Result<Self> {
        Ok(Self {
            services,
            lineage: Lineage::root(run_id)?,
            tracked: false,
            from_bus: false,
            payload: Value::Null,
            counter: DispatchCounter::new(),
            resent: false,
            deadline: Deadline::unbounded(),
        })
    }

    pub fn run_id(&self) -> &str {
        self.lineage.run_id()
    }

    pub fn lineage(&self) -> &Lineage {
        &self.lineage
    }

    /// Stage this invocation runs; `None` for ingress
    pub fn stage(&self) -> Option<&StageName> {
        self.lineage.stage()
    }

    pub fn stage_label(&self) -> String {
        self.stage()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "ingress".to_string())
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Deserialize the invocation payload
    pub fn parse_payload<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            PipelineError::InvalidPayload(format!("{} payload: {}", self.stage_label(), e))
        })
    }

    pub fn deadline(&self) -> &Deadline {
        &self.deadline
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.services.config
    }

    pub fn is_tracked(&self) -> bool {
        self.tracked
    }

    /// Whether this invocation has already handed its work to a successor
    pub fn has_resent(&self) -> bool {
        self.resent
    }

    /// Publish a child task to `target`, returning its lineage
    ///
    /// The marker is created before the message is published so a barrier
    /// can never observe the child as finished before it started.
    pub async fn dispatch(
        &mut self,
        target: &StageName,
        payload: Value,
        options: DispatchOptions,
    ) -> Result<Lineage> {
        check_reserved(&payload)?;
        let child = self
            .lineage
            .child(target, options.suffix.as_deref(), &mut self.counter)?;
        self.publish(target, child, options.track, payload).await
    }

    /// Re-dispatch this task to its own stage with an updated payload
    ///
    /// Allowed once per invocation and only for tasks started from the bus.
    pub async fn resend_self(&mut self, payload: Value) -> Result<Lineage> {
        if !self.from_bus {
            return Err(PipelineError::NotResumable(self.lineage.to_string()));
        }
        if self.resent {
            return Err(PipelineError::AlreadyCheckpointed(self.lineage.to_string()));
        }
        check_reserved(&payload)?;

        let stage = self
            .stage()
            .cloned()
            .ok_or_else(|| PipelineError::NotResumable(self.lineage.to_string()))?;
        let next = self.lineage.resumed()?;
        let lineage = self.publish(&stage, next, self.tracked, payload).await?;
        self.resent = true;
        Ok(lineage)
    }

    /// Hand the unprocessed remainder of the work list to a fresh invocation
    ///
    /// Fails with `NoProgress` unless the remainder is strictly smaller than
    /// the input, and with `RunAborted` if the run has failed meanwhile.
    pub async fn checkpoint_self(&mut self, progress: Progress, payload: Value) -> Result<Lineage> {
        if self.resent {
            return Err(PipelineError::AlreadyCheckpointed(self.lineage.to_string()));
        }
        if progress.remaining >= progress.original {
            return Err(PipelineError::NoProgress {
                stage: self.stage_label(),
                original: progress.original,
                remaining: progress.remaining,
            });
        }
        if self.services.jobs.is_failed(self.run_id()).await? {
            return Err(PipelineError::RunAborted(self.run_id().to_string()));
        }

        info!(
            "Checkpointing {}: {} of {} work units remain",
            self.lineage, progress.remaining, progress.original
        );
        self.resend_self(payload).await
    }

    /// Record successful completion by clearing this task's marker
    pub async fn complete(&self) -> Result<()> {
        if self.tracked {
            self.services.markers().delete(&self.lineage).await?;
        }
        Ok(())
    }

    /// Mark the run failed at this stage and reclaim its intermediates
    ///
    /// Idempotent: a run that is already failed is left untouched.
    pub async fn fail(&self, cause: &PipelineError) -> Result<Transition> {
        let step = self.stage_label();
        let message = truncate_middle(&cause.to_string(), MAX_LOG_LENGTH);
        error!("Run {} failed in {}: {}", self.run_id(), step, message);

        let outcome = self
            .services
            .jobs
            .transition(self.run_id(), JobUpdate::failed(step, message))
            .await?;

        match outcome {
            Transition::Applied { .. } => {
                reclaim::reclaim_run(&self.services, self.run_id()).await?;
            }
            Transition::Skipped { current } => {
                warn!("Run {} already {}, failure not recorded", self.run_id(), current);
            }
        }
        Ok(outcome)
    }

    async fn publish(
        &mut self,
        stage: &StageName,
        lineage: Lineage,
        track: bool,
        payload: Value,
    ) -> Result<Lineage> {
        if track {
            self.services.markers().create(&lineage).await?;
        }
        let envelope = TaskEnvelope::new(lineage.clone(), track, payload);
        let body = envelope
            .encode(self.services.temp.as_ref(), self.services.config.bus_message_limit)
            .await?;
        self.services.bus.publish(stage, body).await?;

        info!(
            "Dispatched {} to {} (tracked: {})",
            lineage, stage, track
        );
        Ok(lineage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryBus;
    use crate::jobs::{JobStatus, MemoryJobStore, NewJob};
    use crate::storage::MemoryBlobStore;
    use serde_json::json;

    struct Fixture {
        bus: Arc<MemoryBus>,
        temp: Arc<MemoryBlobStore>,
        services: Services,
    }

    async fn fixture() -> Fixture {
        let bus = Arc::new(MemoryBus::new());
        let temp = Arc::new(MemoryBlobStore::new());
        let jobs = Arc::new(MemoryJobStore::new());
        jobs.create(NewJob {
            run_id: "run-1".to_string(),
            project_name: "cohort".to_string(),
            user_id: "u1".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
        let services = Services {
            bus: bus.clone(),
            temp: temp.clone(),
            regions: Arc::new(MemoryBlobStore::new()),
            results: Arc::new(MemoryBlobStore::new()),
            jobs,
            config: Arc::new(PipelineConfig::default()),
        };
        Fixture { bus, temp, services }
    }

    fn stage(name: &str) -> StageName {
        StageName::new(name).unwrap()
    }

    fn invocation(services: &Services, lineage: &str, tracked: bool) -> Orchestrator {
        let envelope = TaskEnvelope::new(lineage.parse().unwrap(), tracked, json!({}));
        Orchestrator::from_envelope(services.clone(), envelope, Deadline::unbounded())
    }

    #[tokio::test]
    async fn test_dispatch_allocates_distinct_markers() {
        let f = fixture().await;
        let mut orc = Orchestrator::for_run(f.services.clone(), "run-1").unwrap();

        let a = orc.dispatch(&stage("split"), json!({}), DispatchOptions::tracked()).await.unwrap();
        let b = orc.dispatch(&stage("split"), json!({}), DispatchOptions::tracked()).await.unwrap();
        let c = orc
            .dispatch(&stage("join"), json!({}), DispatchOptions::untracked())
            .await
            .unwrap();

        assert_eq!(a.to_string(), "run-1/0_split");
        assert_eq!(b.to_string(), "run-1/1_split");
        assert_eq!(c.to_string(), "run-1/0_join");
        let root = Lineage::root("run-1").unwrap();
        assert_eq!(f.services.markers().outstanding(&root).await.unwrap(), vec![a, b]);
        assert_eq!(f.bus.total_published(), 3);
    }

    #[tokio::test]
    async fn test_dispatch_rejects_reserved_fields() {
        let f = fixture().await;
        let mut orc = Orchestrator::for_run(f.services.clone(), "run-1").unwrap();
        let result = orc
            .dispatch(&stage("split"), json!({"tracked": false}), DispatchOptions::tracked())
            .await;
        assert!(matches!(result, Err(PipelineError::InvalidPayload(_))));
        assert_eq!(f.bus.total_published(), 0);
        assert!(f.temp.is_empty());
    }

    #[tokio::test]
    async fn test_checkpoint_advances_resume_index() {
        let f = fixture().await;
        let mut orc = invocation(&f.services, "run-1/0_split", true);
        f.services.markers().create(orc.lineage()).await.unwrap();

        let next = orc
            .checkpoint_self(Progress { original: 5, remaining: 3 }, json!({"units": [1, 2, 3]}))
            .await
            .unwrap();
        assert_eq!(next.to_string(), "run-1/0_split1");
        assert_eq!(next.resume_index(), orc.lineage().resume_index() + 1);

        orc.complete().await.unwrap();
        let root = Lineage::root("run-1").unwrap();
        assert_eq!(f.services.markers().outstanding(&root).await.unwrap(), vec![next]);
    }

    #[tokio::test]
    async fn test_checkpoint_without_progress_fails() {
        let f = fixture().await;
        let mut orc = invocation(&f.services, "run-1/0_split2", true);
        let result = orc
            .checkpoint_self(Progress { original: 4, remaining: 4 }, json!({}))
            .await;
        assert!(matches!(result, Err(PipelineError::NoProgress { original: 4, remaining: 4, .. })));
        assert_eq!(f.bus.total_published(), 0);
    }

    #[tokio::test]
    async fn test_second_checkpoint_fails_loudly() {
        let f = fixture().await;
        let mut orc = invocation(&f.services, "run-1/0_split", true);
        orc.checkpoint_self(Progress { original: 4, remaining: 2 }, json!({}))
            .await
            .unwrap();
        let again = orc
            .checkpoint_self(Progress { original: 2, remaining: 1 }, json!({}))
            .await;
        assert!(matches!(again, Err(PipelineError::AlreadyCheckpointed(_))));
    }

    #[tokio::test]
    async fn test_ingress_cannot_resend() {
        let f = fixture().await;
        let mut orc = Orchestrator::for_run(f.services.clone(), "run-1").unwrap();
        assert!(matches!(
            orc.resend_self(json!({})).await,
            Err(PipelineError::NotResumable(_))
        ));
    }

    #[tokio::test]
    async fn test_checkpoint_aborts_failed_run() {
        let f = fixture().await;
        f.services
            .jobs
            .transition("run-1", JobUpdate::failed("annotate", "tool crashed"))
            .await
            .unwrap();

        let mut orc = invocation(&f.services, "run-1/0_split", true);
        let result = orc
            .checkpoint_self(Progress { original: 4, remaining: 2 }, json!({}))
            .await;
        assert!(matches!(result, Err(PipelineError::RunAborted(_))));
        assert_eq!(f.bus.total_published(), 0);
    }

    #[tokio::test]
    async fn test_fail_is_sticky_and_reclaims() {
        let f = fixture().await;
        let orc = invocation(&f.services, "run-1/0_split/0_merge", true);
        f.services.markers().create(orc.lineage()).await.unwrap();

        let first = orc.fail(&PipelineError::InvalidPayload("bad".to_string())).await.unwrap();
        assert!(first.applied());
        assert!(f.temp.is_empty());

        let second = orc.fail(&PipelineError::InvalidPayload("later".to_string())).await.unwrap();
        assert_eq!(second, Transition::Skipped { current: JobStatus::Failed });

        let record = f.services.jobs.get("run-1").await.unwrap().unwrap();
        assert_eq!(record.failed_step.as_deref(), Some("merge"));
        assert!(record.error_message.unwrap().contains("bad"));
    }
}
