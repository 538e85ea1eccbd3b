// ==============================================================================
// ingress.rs - Run Start
// ==============================================================================
// Description: Creates the Job Record for a new run and dispatches its first
//              stages: a tracked fan-out and an untracked join barrier
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================

use serde_json::Value;
use tracing::info;

use crate::error::Result;
use crate::jobs::{JobRecord, JobStore, NewJob};
use crate::orchestrator::{DispatchOptions, Orchestrator, Services};
use crate::stages::{stage_name, JoinTask, SplitTask, JOIN, SPLIT};

/// Start a run over `units`, one work unit per annotation branch
pub async fn start_run(services: &Services, job: NewJob, units: Vec<Value>) -> Result<JobRecord> {
    let project = job.project_name.clone();
    let record = services.jobs.create(job).await?;
    let mut orc = Orchestrator::for_run(services.clone(), &record.run_id)?;

    let split = SplitTask {
        units,
        target: None,
    };
    let unit_count = split.units.len();
    orc.dispatch(
        &stage_name(SPLIT)?,
        serde_json::to_value(&split)?,
        DispatchOptions::tracked(),
    )
    .await?;
    orc.dispatch(
        &stage_name(JOIN)?,
        serde_json::to_value(JoinTask::new(project))?,
        DispatchOptions::untracked(),
    )
    .await?;

    info!("Started run {} with {} work unit(s)", record.run_id, unit_count);
    Ok(record)
}
