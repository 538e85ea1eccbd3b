// ==============================================================================
// main.rs - Annotation Worker Process
// ==============================================================================
// Description: Consumes Task Envelopes from the Redis stage queues, runs one
//              stage invocation per envelope under its time budget, and runs
//              periodic run maintenance
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================

use anyhow::{Context, Result};
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::Client as RedisClient;
use sqlx::postgres::PgPoolOptions;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use annotation_pipeline::bus::RedisBus;
use annotation_pipeline::deadline::Deadline;
use annotation_pipeline::jobs::PgJobStore;
use annotation_pipeline::maintenance::run_maintenance;
use annotation_pipeline::stages::standard_registry;
use annotation_pipeline::storage::StoreSet;
use annotation_pipeline::{logging, run_invocation, Outcome, PipelineConfig, Services, StageRegistry};

mod queue;

use queue::{Delivery, StageQueue};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    logging::init("annotation_worker=info,annotation_pipeline=info");

    info!("Starting Annotation Worker v{}", env!("CARGO_PKG_VERSION"));

    let config = PipelineConfig::from_env().context("Invalid pipeline configuration")?;

    // Initialize database connection
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;

    let db_pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .context("Failed to connect to PostgreSQL")?;

    info!("Connected to PostgreSQL");

    // Initialize Redis connection
    let redis_url =
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());

    let redis_client = RedisClient::open(redis_url).context("Failed to create Redis client")?;

    let redis_conn = ConnectionManager::new(redis_client)
        .await
        .context("Failed to create Redis connection manager")?;

    info!("Connected to Redis");

    let data_dir = PathBuf::from(
        std::env::var("PIPELINE_DATA_DIR").unwrap_or_else(|_| "/mnt/annotation-data".to_string()),
    );
    let stores = StoreSet::open_fs(&data_dir)
        .await
        .with_context(|| format!("Failed to open blob stores under {:?}", data_dir))?;

    info!("Blob stores rooted at {:?}", data_dir);

    let services = Services::new(
        Arc::new(RedisBus::new(redis_conn.clone())),
        stores,
        Arc::new(PgJobStore::new(db_pool)),
        config,
    );
    let registry = standard_registry(&services.config).context("Invalid stage configuration")?;

    let concurrency: usize = std::env::var("WORKER_CONCURRENCY")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8);
    let maintenance_interval = Duration::from_secs(
        std::env::var("MAINTENANCE_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3600),
    );

    let worker = Worker::new(services, registry, redis_conn, concurrency);

    // Start maintenance task
    let maintenance_worker = worker.clone();
    tokio::spawn(async move {
        maintenance_worker.maintenance_loop(maintenance_interval).await;
    });

    info!(
        "Worker ready, serving stages {:?} with {} slot(s)",
        worker.registry.stages().iter().map(|s| s.as_str()).collect::<Vec<_>>(),
        concurrency
    );
    worker.run().await
}

/// Main worker struct
#[derive(Clone)]
struct Worker {
    services: Services,
    registry: Arc<StageRegistry>,
    redis_conn: ConnectionManager,
    slots: Arc<Semaphore>,
}

impl Worker {
    fn new(
        services: Services,
        registry: StageRegistry,
        redis_conn: ConnectionManager,
        concurrency: usize,
    ) -> Self {
        Self {
            services,
            registry: Arc::new(registry),
            redis_conn,
            slots: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    /// Main processing loop - pops envelopes from every served stage
    async fn run(&self) -> Result<()> {
        let mut stage_queue = StageQueue::new(self.redis_conn.clone(), &self.registry.stages());

        loop {
            let permit = self
                .slots
                .clone()
                .acquire_owned()
                .await
                .context("Invocation slots closed")?;

            match stage_queue.dequeue().await {
                Ok(Some(delivery)) => {
                    // Run invocation in background (don't block queue)
                    let worker = self.clone();
                    tokio::spawn(async move {
                        worker.invoke(delivery).await;
                        drop(permit);
                    });
                }
                Ok(None) => {
                    // BRPOP already waited; go round again
                }
                Err(e) => {
                    error!("Failed to dequeue envelope: {}", e);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
            }
        }
    }

    /// Run one stage invocation under the configured budget
    ///
    /// An invocation that overruns its budget is dropped, as the hosting
    /// platform would kill it; the run then stalls at its barrier.
    async fn invoke(&self, delivery: Delivery) {
        let config = &self.services.config;
        let deadline = Deadline::new(config.invocation_budget, config.deadline_margin);
        let run_id = run_id_of(&delivery.body);

        let invocation = run_invocation(
            &self.services,
            &self.registry,
            &delivery.stage,
            &delivery.body,
            deadline,
        );
        let outcome = match tokio::time::timeout(config.invocation_budget, invocation).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                error!("Invocation of {} could not complete: {}", delivery.stage, e);
                return;
            }
            Err(_) => {
                error!(
                    "Invocation of {} for run {} exceeded its budget of {:?}",
                    delivery.stage,
                    run_id.as_deref().unwrap_or("?"),
                    config.invocation_budget
                );
                return;
            }
        };

        if let Outcome::Failed { step, message } = &outcome {
            warn!(
                "Run {} failed in {}: {}",
                run_id.as_deref().unwrap_or("?"),
                step,
                message
            );
        }

        if let Some(run_id) = run_id {
            let mut stage_queue = StageQueue::new(self.redis_conn.clone(), &[]);
            if let Err(e) = stage_queue
                .publish_outcome(&run_id, &delivery.stage, &outcome)
                .await
            {
                warn!("Failed to publish outcome for run {}: {}", run_id, e);
            }
        }
    }

    /// Maintenance loop - expires stale runs, fails stalled ones and purges
    /// retained results
    async fn maintenance_loop(&self, interval: Duration) {
        loop {
            info!("Running maintenance task");

            match run_maintenance(&self.services, Utc::now()).await {
                Ok(report) => info!(
                    "Maintenance expired {} pending run(s), failed {} stalled run(s), purged {} result(s)",
                    report.expired_pending, report.failed_stalled, report.purged_results
                ),
                Err(e) => error!("Maintenance task failed: {}", e),
            }

            tokio::time::sleep(interval).await;
        }
    }
}

/// Run id of an envelope body, for log lines and progress notices
fn run_id_of(body: &str) -> Option<String> {
    serde_json::from_str::<TaskEnvelopeHeader>(body)
        .ok()
        .map(|h| h.run_id)
}

#[derive(serde::Deserialize)]
struct TaskEnvelopeHeader {
    run_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use annotation_pipeline::envelope::TaskEnvelope;
    use annotation_pipeline::lineage::Lineage;
    use serde_json::json;

    #[test]
    fn test_run_id_of_envelope() {
        let lineage: Lineage = "3c79842a/0_split/1_annotate".parse().unwrap();
        let body = serde_json::to_string(&TaskEnvelope::new(lineage, true, json!({"chrom": "1"})))
            .unwrap();
        assert_eq!(run_id_of(&body).as_deref(), Some("3c79842a"));
        assert_eq!(run_id_of("not json"), None);
    }
}
