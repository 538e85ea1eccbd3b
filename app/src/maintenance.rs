// ==============================================================================
// maintenance.rs - Stale Run Maintenance
// ==============================================================================
// Description: Expires runs stuck in pending, fails runs whose processing has
//              stalled and purges results of completed runs past retention
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{PipelineError, Result};
use crate::jobs::{JobStatus, JobStore, JobUpdate, Transition};
use crate::orchestrator::Services;
use crate::paths;
use crate::reclaim;
use crate::storage::BlobStore;

/// What one maintenance pass did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    pub expired_pending: usize,
    pub failed_stalled: usize,
    pub purged_results: usize,
}

fn cutoff(now: DateTime<Utc>, age: Duration) -> Result<DateTime<Utc>> {
    let age = ChronoDuration::from_std(age)
        .map_err(|e| PipelineError::Config(format!("Maintenance age out of range: {}", e)))?;
    Ok(now - age)
}

/// Expire runs still `pending` after `pending_expiry`
///
/// A pending run never reached its fan-out, so anything it left in the
/// temporary stores is reclaimed as well.
pub async fn expire_pending(services: &Services, now: DateTime<Utc>) -> Result<usize> {
    let cutoff = cutoff(now, services.config.pending_expiry)?;
    let stale = services
        .jobs
        .list_by_status_before(JobStatus::Pending, cutoff)
        .await?;

    let mut expired = 0;
    for record in stale {
        match services
            .jobs
            .transition(&record.run_id, JobUpdate::status(JobStatus::Expired))
            .await?
        {
            Transition::Applied { .. } => {
                warn!("Expired run {} pending since {}", record.run_id, record.created_at);
                reclaim::reclaim_run(services, &record.run_id).await?;
                expired += 1;
            }
            Transition::Skipped { current } => {
                info!("Run {} moved to {} meanwhile, not expiring", record.run_id, current);
            }
        }
    }
    Ok(expired)
}

/// Fail runs that have sat in `processing` longer than any live run could
///
/// A run whose last task died without re-dispatching, or whose failure was
/// never recorded, would otherwise stay `processing` forever.
pub async fn fail_stalled(services: &Services, now: DateTime<Utc>) -> Result<usize> {
    let timeout = services.config.stall_timeout();
    let cutoff = cutoff(now, timeout)?;
    let stalled = services
        .jobs
        .list_by_status_before(JobStatus::Processing, cutoff)
        .await?;

    let mut failed = 0;
    for record in stalled {
        let message = format!(
            "Run timed out: no progress since {} (limit {}s)",
            record.updated_at.to_rfc3339(),
            timeout.as_secs()
        );
        match services
            .jobs
            .transition(&record.run_id, JobUpdate::failed("maintenance", message))
            .await?
        {
            Transition::Applied { .. } => {
                warn!("Failed stalled run {} (last update {})", record.run_id, record.updated_at);
                reclaim::reclaim_run(services, &record.run_id).await?;
                failed += 1;
            }
            Transition::Skipped { current } => {
                info!("Run {} moved to {} meanwhile, not failing", record.run_id, current);
            }
        }
    }
    Ok(failed)
}

/// Delete results and indexes of runs completed before `result_retention`
pub async fn purge_results(services: &Services, now: DateTime<Utc>) -> Result<usize> {
    let cutoff = cutoff(now, services.config.result_retention)?;
    let retained = services
        .jobs
        .list_by_status_before(JobStatus::Completed, cutoff)
        .await?;

    let mut purged = 0;
    for record in retained {
        let key = paths::result_key(
            &record.project_name,
            &record.run_id,
            &services.config.result_suffix,
        );
        services.results.delete(&paths::index_key(&key)).await?;
        services.results.delete(&key).await?;

        if services
            .jobs
            .transition(&record.run_id, JobUpdate::status(JobStatus::Expired))
            .await?
            .applied()
        {
            info!("Purged result of run {} ({})", record.run_id, key);
            purged += 1;
        }
    }
    Ok(purged)
}

/// One full maintenance pass
pub async fn run_maintenance(services: &Services, now: DateTime<Utc>) -> Result<MaintenanceReport> {
    Ok(MaintenanceReport {
        expired_pending: expire_pending(services, now).await?,
        failed_stalled: fail_stalled(services, now).await?,
        purged_results: purge_results(services, now).await?,
    })
}
