// ==============================================================================
// state.rs - Application State Management
// ==============================================================================
// Description: Shared application state for the API gateway: the pipeline
//              services plus the connections used for readiness checks
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================

use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use redis::Client as RedisClient;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::path::PathBuf;
use std::sync::Arc;

use annotation_pipeline::bus::RedisBus;
use annotation_pipeline::jobs::PgJobStore;
use annotation_pipeline::storage::StoreSet;
use annotation_pipeline::{PipelineConfig, Services};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// Bus, blob stores, job store and configuration
    services: Services,

    /// PostgreSQL connection pool (absent for in-memory state)
    db_pool: Option<PgPool>,

    /// Redis connection backing the bus (absent for in-memory state)
    redis_conn: Option<ConnectionManager>,

    /// Root of the filesystem blob stores
    data_dir: Option<PathBuf>,
}

impl AppState {
    /// Create new application state from environment
    pub async fn new() -> Result<Self> {
        let config = PipelineConfig::from_env().context("Invalid pipeline configuration")?;

        // Get database URL from environment
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;

        // Create PostgreSQL pool
        let db_pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(&database_url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        // Get Redis URL from environment
        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());

        let redis_client = RedisClient::open(redis_url).context("Failed to create Redis client")?;
        let redis_conn = ConnectionManager::new(redis_client)
            .await
            .context("Failed to connect to Redis")?;

        let data_dir = PathBuf::from(
            std::env::var("PIPELINE_DATA_DIR")
                .unwrap_or_else(|_| "/mnt/annotation-data".to_string()),
        );
        let stores = StoreSet::open_fs(&data_dir)
            .await
            .with_context(|| format!("Failed to open blob stores under {:?}", data_dir))?;

        let services = Services::new(
            Arc::new(RedisBus::new(redis_conn.clone())),
            stores,
            Arc::new(PgJobStore::new(db_pool.clone())),
            config,
        );

        Ok(Self {
            inner: Arc::new(AppStateInner {
                services,
                db_pool: Some(db_pool),
                redis_conn: Some(redis_conn),
                data_dir: Some(data_dir),
            }),
        })
    }

    /// State over already-built services, without external connections
    pub fn from_services(services: Services) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                services,
                db_pool: None,
                redis_conn: None,
                data_dir: None,
            }),
        }
    }

    pub fn services(&self) -> &Services {
        &self.inner.services
    }

    /// Get database pool
    pub fn db_pool(&self) -> Option<&PgPool> {
        self.inner.db_pool.as_ref()
    }

    /// Get Redis connection
    pub fn redis_conn(&self) -> Option<ConnectionManager> {
        self.inner.redis_conn.clone()
    }

    /// Get blob store root
    pub fn data_dir(&self) -> Option<&PathBuf> {
        self.inner.data_dir.as_ref()
    }

    /// In-memory state for tests
    #[cfg(test)]
    pub fn mock() -> Self {
        use annotation_pipeline::bus::MemoryBus;
        use annotation_pipeline::jobs::MemoryJobStore;

        Self::from_services(Services::new(
            Arc::new(MemoryBus::new()),
            StoreSet::in_memory(),
            Arc::new(MemoryJobStore::new()),
            PipelineConfig::default(),
        ))
    }
}
