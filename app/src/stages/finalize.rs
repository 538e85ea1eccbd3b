// ==============================================================================
// finalize.rs - Result Publication
// ==============================================================================
// Description: Writes the final ordered fragments to the results store,
//              persists its position index, completes the run and reclaims
//              intermediates
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::Result;
use crate::index::PositionIndex;
use crate::jobs::{JobStatus, JobStore, JobUpdate, Transition};
use crate::orchestrator::Orchestrator;
use crate::paths;
use crate::reclaim;
use crate::runtime::StageHandler;
use crate::storage::BlobStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizeTask {
    pub project: String,
    /// Fragments of the last round, in order
    pub keys: Vec<String>,
}

pub struct FinalizeStage;

#[async_trait]
impl StageHandler for FinalizeStage {
    async fn handle(&self, orc: &mut Orchestrator) -> Result<()> {
        let task: FinalizeTask = orc.parse_payload()?;
        let run_id = orc.run_id().to_string();
        let services = orc.services().clone();
        let config = &services.config;

        let result_key = paths::result_key(&task.project, &run_id, &config.result_suffix);
        let size = services
            .results
            .compose(&result_key, services.regions.as_ref(), &task.keys)
            .await?;
        let index = match PositionIndex::build_from_store(
            services.results.as_ref(),
            &result_key,
            config.index_page_records,
            config.index_page_bytes,
        )
        .await
        {
            Ok(index) => index,
            Err(e) => {
                // an unindexable result is never published
                services.results.delete(&result_key).await?;
                return Err(e);
            }
        };
        services
            .results
            .put(&paths::index_key(&result_key), index.to_gzip_json()?)
            .await?;
        info!(
            "Published {} ({} bytes, {} chromosome(s))",
            result_key,
            size,
            index.page_counts().len()
        );

        match services
            .jobs
            .transition(&run_id, JobUpdate::status(JobStatus::Completed))
            .await?
        {
            Transition::Applied { .. } => info!("Run {} completed", run_id),
            Transition::Skipped { current } => {
                warn!("Run {} is {}, not marking completed", run_id, current)
            }
        }

        reclaim::reclaim_run(&services, &run_id).await?;
        Ok(())
    }
}
