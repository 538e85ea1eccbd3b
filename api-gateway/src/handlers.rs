// ==============================================================================
// handlers.rs - API Request Handlers
// ==============================================================================
// Description: HTTP request handlers for run submission, run status and the
//              results query interface
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use annotation_pipeline::jobs::{JobStatus, JobStore, NewJob};
use annotation_pipeline::results::{query_results, ResultQuery, ResultView};
use annotation_pipeline::PipelineError;

use crate::{models::*, state::AppState, validator::RequestValidator};

/// Root endpoint - API information
pub async fn root() -> Json<ApiInfoResponse> {
    Json(ApiInfoResponse {
        service: "Annotation API Gateway",
        version: env!("CARGO_PKG_VERSION"),
        endpoints: vec![
            "/health - Health check",
            "/ready - Readiness check",
            "/api/runs - Start a run (POST)",
            "/api/runs/{run_id} - Run status (GET)",
            "/api/runs/{run_id}/results?chromosome=&page=&position= - Query results (GET)",
        ],
    })
}

/// Health check endpoint
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: Utc::now(),
    })
}

/// Readiness check endpoint
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    // Check database connection
    let database = match state.db_pool() {
        Some(pool) => sqlx::query("SELECT 1").fetch_one(pool).await.is_ok(),
        None => true,
    };

    // Check Redis connection
    let redis = match state.redis_conn() {
        Some(mut conn) => redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .is_ok(),
        None => true,
    };

    // Check blob store root exists
    let storage = state.data_dir().map_or(true, |dir| dir.exists());

    let ready = database && redis && storage;
    let response = ReadinessResponse {
        ready,
        database,
        redis,
        storage,
    };

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(response))
}

/// Start a run: create its Job Record and dispatch the fan-out and barrier
pub async fn start_run(
    State(state): State<AppState>,
    Json(req): Json<StartRunRequest>,
) -> Result<(StatusCode, Json<StartRunResponse>), AppError> {
    RequestValidator::new()
        .validate_start_run(&req)
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let run_id = req
        .run_id
        .unwrap_or_else(|| Uuid::new_v4().simple().to_string());
    let units = req.units.len();
    let job = NewJob {
        run_id,
        project_name: req.project,
        user_id: req.user_id,
        job_name: req.job_name,
        input_vcf: req.input_vcf,
    };

    let record = annotation_pipeline::start_run(state.services(), job, req.units).await?;
    info!(
        "Accepted run {} for project {} ({} unit(s))",
        record.run_id, record.project_name, units
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(StartRunResponse {
            run_id: record.run_id,
            status: record.status,
            created_at: record.created_at,
            units,
        }),
    ))
}

/// Run status endpoint
pub async fn get_run_status(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<RunStatusResponse>, AppError> {
    let record = state
        .services()
        .jobs
        .get(&run_id)
        .await?
        .ok_or(AppError::NotFound)?;

    Ok(Json(record.into()))
}

/// Results query endpoint
///
/// Only completed runs have results; anything else is a conflict rather than
/// a missing resource so callers can keep polling the status endpoint.
pub async fn get_run_results(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Query(params): Query<ResultsParams>,
) -> Result<Json<ResultView>, AppError> {
    let services = state.services();
    let record = services
        .jobs
        .get(&run_id)
        .await?
        .ok_or(AppError::NotFound)?;

    if record.status != JobStatus::Completed {
        return Err(AppError::Conflict(format!(
            "Run {} is {}, results are not available",
            run_id, record.status
        )));
    }

    let query = ResultQuery {
        project: record.project_name,
        run_id,
        chromosome: params.chromosome.clone(),
        selector: params.selector(),
    };
    let view = query_results(services.results.as_ref(), &services.config, &query).await?;

    Ok(Json(view))
}

/// Application error type
#[derive(Debug)]
pub enum AppError {
    NotFound,
    BadRequest(String),
    Conflict(String),
    Internal(String),
}

impl From<PipelineError> for AppError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::RunNotFound(_) | PipelineError::NotFound(_) => AppError::NotFound,
            PipelineError::DuplicateRun(id) => {
                AppError::Conflict(format!("Run already exists: {}", id))
            }
            PipelineError::InvalidRequest(msg) => AppError::BadRequest(msg),
            PipelineError::InvalidLineage(_)
            | PipelineError::InvalidStage(_)
            | PipelineError::InvalidPayload(_) => AppError::BadRequest(e.to_string()),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::NotFound => (StatusCode::NOT_FOUND, "Resource not found".to_string()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Conflict(msg) => {
                warn!("Conflict: {}", msg);
                (StatusCode::CONFLICT, msg)
            }
            AppError::Internal(msg) => {
                error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = Json(ErrorResponse::new(error_message));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_error_mapping() {
        assert!(matches!(
            AppError::from(PipelineError::RunNotFound("r".to_string())),
            AppError::NotFound
        ));
        assert!(matches!(
            AppError::from(PipelineError::DuplicateRun("r".to_string())),
            AppError::Conflict(_)
        ));
        assert!(matches!(
            AppError::from(PipelineError::InvalidRequest("Invalid chromosome.".to_string())),
            AppError::BadRequest(ref m) if m == "Invalid chromosome."
        ));
        assert!(matches!(
            AppError::from(PipelineError::Storage("disk".to_string())),
            AppError::Internal(_)
        ));
    }

    #[test]
    fn test_internal_error_hides_details() {
        let response = AppError::Internal("password=hunter2".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
