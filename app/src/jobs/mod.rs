// ==============================================================================
// jobs/mod.rs - Job Records
// ==============================================================================
// Description: Durable per-run status record and the transition rules every
//              backend enforces
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{PipelineError, Result};

pub mod memory;
pub mod postgres;

pub use memory::MemoryJobStore;
pub use postgres::PgJobStore;

/// Lifecycle status of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Expired,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Failed | JobStatus::Expired)
    }

    /// Whether a run in `self` may move to `next`
    pub fn can_become(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (a, b) if *a == b => false,
            (Pending, _) => true,
            (Processing, Completed | Failed | Expired) => true,
            (Completed, Expired) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "expired" => Ok(JobStatus::Expired),
            other => Err(PipelineError::JobStore(format!("unknown job status '{}'", other))),
        }
    }
}

/// Durable status record of one pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub run_id: String,
    pub status: JobStatus,
    pub project_name: String,
    pub user_id: String,
    pub job_name: Option<String>,
    pub input_vcf: Option<String>,
    pub failed_step: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Fields supplied when a run starts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewJob {
    pub run_id: String,
    pub project_name: String,
    pub user_id: String,
    pub job_name: Option<String>,
    pub input_vcf: Option<String>,
}

impl JobRecord {
    pub fn pending(job: NewJob, now: DateTime<Utc>) -> Self {
        Self {
            run_id: job.run_id,
            status: JobStatus::Pending,
            project_name: job.project_name,
            user_id: job.user_id,
            job_name: job.job_name,
            input_vcf: job.input_vcf,
            failed_step: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}

/// Requested status change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobUpdate {
    pub status: JobStatus,
    pub failed_step: Option<String>,
    pub error_message: Option<String>,
}

impl JobUpdate {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status,
            failed_step: None,
            error_message: None,
        }
    }

    pub fn failed(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Failed,
            failed_step: Some(step.into()),
            error_message: Some(message.into()),
        }
    }
}

/// Outcome of a status update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The record moved from `previous` to the requested status
    Applied { previous: JobStatus },
    /// The record was left as is
    Skipped { current: JobStatus },
}

impl Transition {
    pub fn applied(&self) -> bool {
        matches!(self, Transition::Applied { .. })
    }
}

/// Apply `update` to `record` if the transition is allowed
///
/// Shared by every backend so the rules live in one place. A `failed` run can
/// never be overwritten.
pub fn apply_update(record: &mut JobRecord, update: &JobUpdate, now: DateTime<Utc>) -> Transition {
    let previous = record.status;
    if !previous.can_become(update.status) {
        return Transition::Skipped { current: previous };
    }

    record.status = update.status;
    record.updated_at = now;
    match update.status {
        JobStatus::Completed | JobStatus::Failed => record.completed_at = Some(now),
        _ => {}
    }
    if update.failed_step.is_some() {
        record.failed_step = update.failed_step.clone();
    }
    if update.error_message.is_some() {
        record.error_message = update.error_message.clone();
    }
    Transition::Applied { previous }
}

/// Durable job table
#[async_trait]
pub trait JobStore: Send + Sync + 'static {
    /// Insert a `pending` record. `DuplicateRun` if the run id is taken.
    async fn create(&self, job: NewJob) -> Result<JobRecord>;

    async fn get(&self, run_id: &str) -> Result<Option<JobRecord>>;

    /// Read-modify-write of the status. `RunNotFound` if there is no record.
    async fn transition(&self, run_id: &str, update: JobUpdate) -> Result<Transition>;

    /// Records in `status` last updated before `cutoff`
    async fn list_by_status_before(
        &self,
        status: JobStatus,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<JobRecord>>;

    /// Remove a record, returning whether it existed
    async fn delete(&self, run_id: &str) -> Result<bool>;

    /// True when the run exists and is `failed`
    async fn is_failed(&self, run_id: &str) -> Result<bool> {
        Ok(self
            .get(run_id)
            .await?
            .map_or(false, |r| r.status == JobStatus::Failed))
    }
}
