// ==============================================================================
// models.rs - API Data Models
// ==============================================================================
// Description: Request/response models for the annotation API
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use annotation_pipeline::jobs::{JobRecord, JobStatus};
use annotation_pipeline::results::Selector;

/// Run submission request
#[derive(Debug, Deserialize)]
pub struct StartRunRequest {
    /// Caller-chosen run id; generated when absent
    #[serde(default)]
    pub run_id: Option<String>,
    pub project: String,
    pub user_id: String,
    #[serde(default)]
    pub job_name: Option<String>,
    #[serde(default)]
    pub input_vcf: Option<String>,
    /// One payload per annotation branch
    pub units: Vec<Value>,
}

/// Run submission response
#[derive(Debug, Serialize, Deserialize)]
pub struct StartRunResponse {
    pub run_id: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub units: usize,
}

/// Run status response
#[derive(Debug, Serialize, Deserialize)]
pub struct RunStatusResponse {
    pub run_id: String,
    pub project: String,
    pub user_id: String,
    pub job_name: Option<String>,
    pub status: JobStatus,
    pub failed_step: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<JobRecord> for RunStatusResponse {
    fn from(record: JobRecord) -> Self {
        Self {
            run_id: record.run_id,
            project: record.project_name,
            user_id: record.user_id,
            job_name: record.job_name,
            status: record.status,
            failed_step: record.failed_step,
            error_message: record.error_message,
            created_at: record.created_at,
            updated_at: record.updated_at,
            completed_at: record.completed_at,
        }
    }
}

/// Query string of the results endpoint
#[derive(Debug, Default, Deserialize)]
pub struct ResultsParams {
    pub chromosome: Option<String>,
    pub page: Option<usize>,
    pub position: Option<u64>,
}

impl ResultsParams {
    /// A position wins over a page number
    pub fn selector(&self) -> Selector {
        match (self.page, self.position) {
            (_, Some(position)) => Selector::Position(position),
            (Some(page), None) => Selector::Page(page),
            (None, None) => Selector::default(),
        }
    }
}

/// API information response
#[derive(Debug, Serialize)]
pub struct ApiInfoResponse {
    pub service: &'static str,
    pub version: &'static str,
    pub endpoints: Vec<&'static str>,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub timestamp: DateTime<Utc>,
}

/// Readiness check response
#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub database: bool,
    pub redis: bool,
    pub storage: bool,
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
