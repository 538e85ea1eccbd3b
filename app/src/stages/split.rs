// ==============================================================================
// split.rs - Deadline-Aware Fan-Out
// ==============================================================================
// Description: Dispatches one tracked task per work unit, checkpointing the
//              remainder when the invocation runs low on time
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::error::Result;
use crate::jobs::{JobStatus, JobStore, JobUpdate};
use crate::lineage::StageName;
use crate::orchestrator::{DispatchOptions, Orchestrator, Progress};
use crate::runtime::StageHandler;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitTask {
    /// Payloads for the target stage, one per unit
    pub units: Vec<Value>,
    /// Overrides the configured target stage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

pub struct SplitStage {
    default_target: StageName,
}

impl SplitStage {
    pub fn new(default_target: StageName) -> Self {
        Self { default_target }
    }
}

#[async_trait]
impl StageHandler for SplitStage {
    async fn handle(&self, orc: &mut Orchestrator) -> Result<()> {
        let task: SplitTask = orc.parse_payload()?;
        let target = match &task.target {
            Some(name) => StageName::new(name.as_str())?,
            None => self.default_target.clone(),
        };

        let run_id = orc.run_id().to_string();
        orc.services()
            .jobs
            .transition(&run_id, JobUpdate::status(JobStatus::Processing))
            .await?;

        let total = task.units.len();
        for (done, unit) in task.units.iter().enumerate() {
            if orc.deadline().out_of_time() {
                let remainder = SplitTask {
                    units: task.units[done..].to_vec(),
                    target: task.target.clone(),
                };
                orc.checkpoint_self(
                    Progress {
                        original: total,
                        remaining: total - done,
                    },
                    serde_json::to_value(&remainder)?,
                )
                .await?;
                return Ok(());
            }
            orc.dispatch(&target, unit.clone(), DispatchOptions::tracked())
                .await?;
        }

        info!("{} dispatched {} unit(s) to {}", orc.lineage(), total, target);
        Ok(())
    }
}
