// ==============================================================================
// barrier.rs - Join Barrier
// ==============================================================================
// Description: Polls the liveness markers of a run until every tracked branch
//              has finished, then dispatches the next stage exactly once
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================
//
// Waiting never blocks inside one invocation beyond a single poll interval:
// the barrier re-dispatches itself, carrying the time it was first entered.
// ==============================================================================

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{PipelineError, Result};
use crate::jobs::JobStore;
use crate::lineage::{Lineage, StageName};
use crate::orchestrator::{DispatchOptions, Orchestrator};
use crate::runtime::StageHandler;

fn default_next_stage() -> String {
    super::CONCAT.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinTask {
    pub project: String,
    /// Subtree to wait for; the whole run when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watch: Option<Lineage>,
    /// When the barrier was first entered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default = "default_next_stage")]
    pub next_stage: String,
}

impl JoinTask {
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            watch: None,
            started_at: None,
            next_stage: default_next_stage(),
        }
    }
}

pub struct JoinStage;

#[async_trait]
impl StageHandler for JoinStage {
    async fn handle(&self, orc: &mut Orchestrator) -> Result<()> {
        let task: JoinTask = orc.parse_payload()?;
        let run_id = orc.run_id().to_string();

        if orc.services().jobs.is_failed(&run_id).await? {
            return Err(PipelineError::RunAborted(run_id));
        }

        let scope = match &task.watch {
            Some(lineage) => lineage.clone(),
            None => Lineage::root(run_id.as_str())?,
        };
        let outstanding: Vec<Lineage> = orc
            .services()
            .markers()
            .outstanding(&scope)
            .await?
            .into_iter()
            .filter(|l| l != orc.lineage())
            .collect();

        if outstanding.is_empty() {
            let next = StageName::new(task.next_stage.as_str())?;
            info!("All branches of {} finished, dispatching {}", scope, next);
            orc.dispatch(&next, json!({ "project": task.project }), DispatchOptions::tracked())
                .await?;
            return Ok(());
        }

        let now = Utc::now();
        let started_at = task.started_at.unwrap_or(now);
        let waited = (now - started_at).to_std().unwrap_or(Duration::ZERO);
        let config = orc.config();
        if waited >= config.barrier_max_wait {
            warn!(
                "Barrier for {} gave up with {} task(s) outstanding, e.g. {}",
                scope,
                outstanding.len(),
                outstanding[0]
            );
            return Err(PipelineError::BarrierTimeout { waited });
        }

        info!(
            "Waiting on {} task(s) under {} (waited {:?})",
            outstanding.len(),
            scope,
            waited
        );
        tokio::time::sleep(orc.deadline().cap(config.barrier_poll_interval)).await;

        let next = JoinTask {
            started_at: Some(started_at),
            ..task
        };
        orc.resend_self(serde_json::to_value(&next)?).await?;
        Ok(())
    }
}
