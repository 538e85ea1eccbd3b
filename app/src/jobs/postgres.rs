// ==============================================================================
// jobs/postgres.rs - PostgreSQL Job Store
// ==============================================================================
// Description: Job table in pipeline.annotation_jobs (schema: sql/schema.sql).
//              Status updates lock the row so concurrent stages serialise.
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::debug;

use super::{apply_update, JobRecord, JobStatus, JobStore, JobUpdate, NewJob, Transition};
use crate::error::{PipelineError, Result};

const SELECT_COLUMNS: &str = "run_id, status, project_name, user_id, job_name, input_vcf,
     failed_step, error_message, created_at, updated_at, completed_at";

#[derive(sqlx::FromRow)]
struct JobRow {
    run_id: String,
    status: String,
    project_name: String,
    user_id: String,
    job_name: Option<String>,
    input_vcf: Option<String>,
    failed_step: Option<String>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<JobRow> for JobRecord {
    type Error = PipelineError;

    fn try_from(row: JobRow) -> Result<Self> {
        Ok(JobRecord {
            run_id: row.run_id,
            status: row.status.parse()?,
            project_name: row.project_name,
            user_id: row.user_id,
            job_name: row.job_name,
            input_vcf: row.input_vcf,
            failed_step: row.failed_step,
            error_message: row.error_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, job: NewJob) -> Result<JobRecord> {
        let record = JobRecord::pending(job, Utc::now());

        let inserted = sqlx::query(
            "INSERT INTO pipeline.annotation_jobs
                (run_id, status, project_name, user_id, job_name, input_vcf, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
             ON CONFLICT (run_id) DO NOTHING",
        )
        .bind(&record.run_id)
        .bind(record.status.as_str())
        .bind(&record.project_name)
        .bind(&record.user_id)
        .bind(&record.job_name)
        .bind(&record.input_vcf)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 0 {
            return Err(PipelineError::DuplicateRun(record.run_id));
        }
        Ok(record)
    }

    async fn get(&self, run_id: &str) -> Result<Option<JobRecord>> {
        let row: Option<JobRow> = sqlx::query_as(&format!(
            "SELECT {} FROM pipeline.annotation_jobs WHERE run_id = $1",
            SELECT_COLUMNS
        ))
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(JobRecord::try_from).transpose()
    }

    async fn transition(&self, run_id: &str, update: JobUpdate) -> Result<Transition> {
        let mut tx = self.pool.begin().await?;

        let row: Option<JobRow> = sqlx::query_as(&format!(
            "SELECT {} FROM pipeline.annotation_jobs WHERE run_id = $1 FOR UPDATE",
            SELECT_COLUMNS
        ))
        .bind(run_id)
        .fetch_optional(&mut *tx)
        .await?;

        let mut record = match row {
            Some(row) => JobRecord::try_from(row)?,
            None => return Err(PipelineError::RunNotFound(run_id.to_string())),
        };

        let outcome = apply_update(&mut record, &update, Utc::now());
        if outcome.applied() {
            sqlx::query(
                "UPDATE pipeline.annotation_jobs
                 SET status = $1,
                     failed_step = $2,
                     error_message = $3,
                     updated_at = $4,
                     completed_at = $5
                 WHERE run_id = $6",
            )
            .bind(record.status.as_str())
            .bind(&record.failed_step)
            .bind(&record.error_message)
            .bind(record.updated_at)
            .bind(record.completed_at)
            .bind(run_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!("Job {} -> {}: {:?}", run_id, update.status, outcome);
        Ok(outcome)
    }

    async fn list_by_status_before(
        &self,
        status: JobStatus,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<JobRecord>> {
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            "SELECT {} FROM pipeline.annotation_jobs
             WHERE status = $1 AND updated_at < $2
             ORDER BY updated_at",
            SELECT_COLUMNS
        ))
        .bind(status.as_str())
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(JobRecord::try_from).collect()
    }

    async fn delete(&self, run_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM pipeline.annotation_jobs WHERE run_id = $1")
            .bind(run_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
