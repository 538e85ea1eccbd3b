// ==============================================================================
// reclaim.rs - Intermediate Object Reclamation
// ==============================================================================
// Description: Deletes a run's liveness markers, offloaded payloads, branch
//              outputs and merge fragments once it has completed or failed
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================

use std::time::Duration;
use tracing::{info, warn};

use crate::error::Result;
use crate::lineage::Lineage;
use crate::orchestrator::Services;
use crate::paths;
use crate::storage::{delete_prefix, BlobStore};

const MAX_ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Objects removed by a reclaim pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct ReclaimStats {
    pub markers: usize,
    pub payloads: usize,
    pub branches: usize,
    pub pages: usize,
}

impl ReclaimStats {
    pub fn total(&self) -> usize {
        self.markers + self.payloads + self.branches + self.pages
    }
}

pub async fn reclaim_run(services: &Services, run_id: &str) -> Result<ReclaimStats> {
    reclaim_intermediates(services.temp.as_ref(), services.regions.as_ref(), run_id).await
}

/// Delete every intermediate object of `run_id`, retrying each prefix a few
/// times before giving up
pub async fn reclaim_intermediates(
    temp: &dyn BlobStore,
    regions: &dyn BlobStore,
    run_id: &str,
) -> Result<ReclaimStats> {
    let root = Lineage::root(run_id)?;
    let stats = ReclaimStats {
        markers: with_retries(temp, &paths::marker_prefix(&root)).await?,
        payloads: with_retries(temp, &paths::payload_prefix(run_id)).await?,
        branches: with_retries(regions, &paths::branch_prefix(run_id)).await?,
        pages: with_retries(regions, &paths::run_pages_prefix(run_id)).await?,
    };
    info!("Reclaimed {} intermediate object(s) for run {}", stats.total(), run_id);
    Ok(stats)
}

async fn with_retries(store: &dyn BlobStore, prefix: &str) -> Result<usize> {
    let mut attempt = 1;
    loop {
        match delete_prefix(store, prefix).await {
            Ok(count) => return Ok(count),
            Err(e) if attempt < MAX_ATTEMPTS => {
                warn!(
                    "Deleting {} failed (attempt {}/{}): {}",
                    prefix, attempt, MAX_ATTEMPTS, e
                );
                tokio::time::sleep(RETRY_DELAY * attempt).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
