// ==============================================================================
// common/mod.rs - Integration Test Fixtures
// ==============================================================================
// Description: In-memory pipeline wiring and a stand-in annotation stage
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use annotation_pipeline::bus::MemoryBus;
use annotation_pipeline::jobs::{JobStore, MemoryJobStore, NewJob};
use annotation_pipeline::stages::{self, FORMAT};
use annotation_pipeline::storage::StoreSet;
use annotation_pipeline::{
    DispatchOptions, LocalRuntime, Orchestrator, PipelineConfig, Result, Services, StageHandler,
    StageRegistry,
};

pub const RUN_ID: &str = "3c79842a";
pub const PROJECT: &str = "cohort";

/// Defaults with every sleep removed
pub fn fast_config() -> PipelineConfig {
    PipelineConfig {
        barrier_poll_interval: Duration::ZERO,
        merge_retry_interval: Duration::ZERO,
        ..PipelineConfig::default()
    }
}

pub fn new_job(run_id: &str) -> NewJob {
    NewJob {
        run_id: run_id.to_string(),
        project_name: PROJECT.to_string(),
        user_id: "user-1".to_string(),
        job_name: Some("integration".to_string()),
        input_vcf: Some("sample.vcf.gz".to_string()),
    }
}

/// Stand-in for an external annotation plugin: turns a unit
/// `{chrom, start}` into one formatted row
pub struct FakeAnnotate;

#[async_trait]
impl StageHandler for FakeAnnotate {
    async fn handle(&self, orc: &mut Orchestrator) -> Result<()> {
        let chrom = orc.payload()["chrom"].as_str().unwrap_or("1").to_string();
        let start = orc.payload()["start"].as_u64().unwrap_or(0);
        let rows = json!({
            "columns": ["rsId", "type", "region"],
            "rows": [{
                "rsId": format!("rs{}", start),
                "type": "SNV",
                "region": format!("{}:{}-{}", chrom, start, start),
            }]
        });
        orc.dispatch(&stages::stage_name(FORMAT)?, rows, DispatchOptions::tracked())
            .await?;
        Ok(())
    }
}

pub struct Harness {
    pub bus: Arc<MemoryBus>,
    pub jobs: Arc<MemoryJobStore>,
    pub services: Services,
}

impl Harness {
    pub fn new(config: PipelineConfig) -> Self {
        Self::with_stores(config, StoreSet::in_memory())
    }

    pub fn with_stores(config: PipelineConfig, stores: StoreSet) -> Self {
        let bus = Arc::new(MemoryBus::new());
        let jobs = Arc::new(MemoryJobStore::new());
        let services = Services::new(bus.clone(), stores, jobs.clone(), config);
        Self { bus, jobs, services }
    }

    pub async fn create_run(&self, run_id: &str) {
        self.jobs.create(new_job(run_id)).await.unwrap();
    }

    pub fn registry(&self) -> StageRegistry {
        let mut registry = stages::standard_registry(&self.services.config).unwrap();
        registry.register(
            stages::stage_name("annotate").unwrap(),
            Arc::new(FakeAnnotate),
        );
        registry
    }

    pub fn runtime(&self) -> LocalRuntime {
        LocalRuntime::new(self.bus.clone(), self.services.clone(), self.registry())
    }

    pub fn ingress(&self, run_id: &str) -> Orchestrator {
        Orchestrator::for_run(self.services.clone(), run_id).unwrap()
    }
}

/// One TSV record on chromosome `chrom` at `pos`
pub fn record(chrom: &str, pos: u64) -> String {
    format!("rs{}\tSNV\t{}:{}-{}\n", pos, chrom, pos, pos)
}
