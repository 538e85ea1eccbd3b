// ==============================================================================
// jobs/memory.rs - In-Memory Job Store
// ==============================================================================
// Description: Job table held in process memory for tests and local runs
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;

use super::{apply_update, JobRecord, JobStatus, JobStore, JobUpdate, NewJob, Transition};
use crate::error::{PipelineError, Result};

#[derive(Debug, Default)]
pub struct MemoryJobStore {
    records: Mutex<HashMap<String, JobRecord>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a record's timestamps, for exercising age-based maintenance
    pub async fn backdate(&self, run_id: &str, at: DateTime<Utc>) {
        if let Some(record) = self.records.lock().await.get_mut(run_id) {
            record.created_at = at;
            record.updated_at = at;
        }
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job: NewJob) -> Result<JobRecord> {
        let mut records = self.records.lock().await;
        if records.contains_key(&job.run_id) {
            return Err(PipelineError::DuplicateRun(job.run_id));
        }
        let record = JobRecord::pending(job, Utc::now());
        records.insert(record.run_id.clone(), record.clone());
        Ok(record)
    }

    async fn get(&self, run_id: &str) -> Result<Option<JobRecord>> {
        Ok(self.records.lock().await.get(run_id).cloned())
    }

    async fn transition(&self, run_id: &str, update: JobUpdate) -> Result<Transition> {
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(run_id)
            .ok_or_else(|| PipelineError::RunNotFound(run_id.to_string()))?;
        Ok(apply_update(record, &update, Utc::now()))
    }

    async fn list_by_status_before(
        &self,
        status: JobStatus,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<JobRecord>> {
        let records = self.records.lock().await;
        let mut found: Vec<_> = records
            .values()
            .filter(|r| r.status == status && r.updated_at < cutoff)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        Ok(found)
    }

    async fn delete(&self, run_id: &str) -> Result<bool> {
        Ok(self.records.lock().await.remove(run_id).is_some())
    }
}
