// ==============================================================================
// main.rs - Annotation API Gateway Entry Point
// ==============================================================================
// Description: Axum web server for starting annotation runs and querying
//              their results
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================

use anyhow::{Context, Result};
use axum::{
    extract::DefaultBodyLimit,
    http::{header, Method},
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

use annotation_pipeline::logging;

mod handlers;
mod models;
mod state;
mod validator;

use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    logging::init("annotation_api_gateway=info,annotation_pipeline=info,tower_http=info");

    info!("Starting Annotation API Gateway v{}", env!("CARGO_PKG_VERSION"));

    let server_port: u16 = std::env::var("SERVER_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8099);

    // Initialize application state
    let state = AppState::new()
        .await
        .context("Failed to initialize application state")?;

    // Build router with all endpoints
    let app = build_router(state);

    // Bind server
    let addr = SocketAddr::from(([0, 0, 0, 0], server_port));
    info!("API Gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    // Run server
    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

fn build_router(state: AppState) -> Router {
    // API routes
    let api_routes = Router::new()
        // Run submission
        .route("/runs", post(handlers::start_run))
        // Run status
        .route("/runs/{run_id}", get(handlers::get_run_status))
        // Results query
        .route("/runs/{run_id}/results", get(handlers::get_run_results));

    // Origins are configured via CORS_ALLOWED_ORIGINS env var (comma-separated)
    let cors_origins = std::env::var("CORS_ALLOWED_ORIGINS")
        .unwrap_or_else(|_| "http://localhost:3000".to_string());
    let allowed_origins: Vec<_> = cors_origins
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed_origins))
        .allow_credentials(false)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .expose_headers([header::CONTENT_TYPE]);

    // Combine all routes
    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .nest("/api", api_routes)
        .layer(
            ServiceBuilder::new()
                // Request tracing
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                // Request body size limit (work unit lists, not files)
                .layer(DefaultBodyLimit::max(16 * 1024 * 1024)),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use annotation_pipeline::jobs::{JobStatus, JobStore, JobUpdate};
    use annotation_pipeline::paths;
    use annotation_pipeline::storage::BlobStore;

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_health_and_ready() {
        let router = build_router(AppState::mock());
        let (status, body) = send(&router, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let (status, body) = send(&router, get("/ready")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ready"], true);
    }

    #[tokio::test]
    async fn test_start_run_and_read_status() {
        let router = build_router(AppState::mock());
        let request = json!({
            "run_id": "run-7",
            "project": "cohort",
            "user_id": "u1",
            "units": [{"chrom": "1", "start": 100}, {"chrom": "1", "start": 200}]
        });

        let (status, body) = send(&router, post_json("/api/runs", request.clone())).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["run_id"], "run-7");
        assert_eq!(body["status"], "pending");
        assert_eq!(body["units"], 2);

        let (status, body) = send(&router, get("/api/runs/run-7")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["project"], "cohort");
        assert_eq!(body["status"], "pending");

        // same run id again
        let (status, _) = send(&router, post_json("/api/runs", request)).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = send(&router, get("/api/runs/missing")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Resource not found");
    }

    #[tokio::test]
    async fn test_start_run_generates_id_and_validates() {
        let router = build_router(AppState::mock());
        let (status, body) = send(
            &router,
            post_json("/api/runs", json!({"project": "cohort", "user_id": "u1", "units": []})),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["run_id"].as_str().unwrap().len(), 32);

        let (status, body) = send(
            &router,
            post_json("/api/runs", json!({"project": "../x", "user_id": "u1", "units": []})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("project"));
    }

    #[tokio::test]
    async fn test_results_require_completed_run() {
        let state = AppState::mock();
        let router = build_router(state.clone());
        let (status, _) = send(
            &router,
            post_json(
                "/api/runs",
                json!({"run_id": "run-8", "project": "cohort", "user_id": "u1", "units": []}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let (status, body) = send(&router, get("/api/runs/run-8/results")).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].as_str().unwrap().contains("pending"));

        // publish a small result by hand and complete the run
        let services = state.services();
        let key = paths::result_key("cohort", "run-8", &services.config.result_suffix);
        services
            .results
            .put(&key, b"rs1\tSNV\t1:5-5\n".to_vec())
            .await
            .unwrap();
        services
            .jobs
            .transition("run-8", JobUpdate::status(JobStatus::Completed))
            .await
            .unwrap();

        let (status, body) = send(&router, get("/api/runs/run-8/results?chromosome=1&page=1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["kind"], "whole");
        assert_eq!(body["content"], "rs1\tSNV\t1:5-5\n");
    }
}
