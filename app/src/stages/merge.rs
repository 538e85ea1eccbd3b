// ==============================================================================
// merge.rs - Reduce-Tree Merger
// ==============================================================================
// Description: Concat seeds the tree with one page per batch of branch
//              outputs; each merge round concatenates bounded batches until a
//              handful of fragments remain for finalize
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{PipelineError, Result};
use crate::fragments::{natural_sort, plan_round, round_fragments, RoundPlan};
use crate::orchestrator::{DispatchOptions, Orchestrator};
use crate::paths;
use crate::runtime::StageHandler;
use crate::storage::BlobStore;

use super::{stage_name, FinalizeTask, FINALIZE, MERGE};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcatTask {
    pub project: String,
}

pub struct ConcatStage;

#[async_trait]
impl StageHandler for ConcatStage {
    async fn handle(&self, orc: &mut Orchestrator) -> Result<()> {
        let task: ConcatTask = orc.parse_payload()?;
        let run_id = orc.run_id().to_string();

        let mut keys: Vec<String> = orc
            .services()
            .regions
            .list(&paths::branch_prefix(&run_id))
            .await?
            .into_iter()
            .map(|o| o.key)
            .filter(|k| k.ends_with(".tsv"))
            .collect();
        natural_sort(&mut keys);

        let page_size = orc.config().concat_page_size;
        let mut pages: Vec<Vec<String>> = keys.chunks(page_size).map(<[String]>::to_vec).collect();
        if pages.is_empty() {
            pages.push(Vec::new());
        }

        let total = pages.len();
        let prefix = paths::page_prefix(&run_id);
        let merge = stage_name(MERGE)?;
        for (idx, page_keys) in pages.into_iter().enumerate() {
            let page = MergeTask::new(&task.project, &prefix, page_keys, idx + 1, idx + 1 == total);
            orc.dispatch(&merge, serde_json::to_value(&page)?, DispatchOptions::tracked())
                .await?;
        }

        info!("Paged {} branch output(s) into {} merge task(s)", keys.len(), total);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeTask {
    pub project: String,
    /// Fragment prefix of this round
    pub prefix: String,
    /// Objects concatenated into this task's fragment
    pub keys: Vec<String>,
    /// 1-based fragment counter; on the last page, the round's fragment count
    pub page: usize,
    pub last_page: bool,
    /// Fragment already written by an earlier attempt
    #[serde(default)]
    pub skip_append: bool,
    /// Stabilisation retries so far
    #[serde(default)]
    pub attempt: u32,
}

impl MergeTask {
    pub fn new(project: &str, prefix: &str, keys: Vec<String>, page: usize, last_page: bool) -> Self {
        Self {
            project: project.to_string(),
            prefix: prefix.to_string(),
            keys,
            page,
            last_page,
            skip_append: false,
            attempt: 0,
        }
    }
}

pub struct MergeStage;

#[async_trait]
impl StageHandler for MergeStage {
    async fn handle(&self, orc: &mut Orchestrator) -> Result<()> {
        let task: MergeTask = orc.parse_payload()?;
        let regions = orc.services().regions.clone();

        if !task.skip_append {
            let fragment = paths::page_key(&task.prefix, task.page);
            let size = regions.compose(&fragment, regions.as_ref(), &task.keys).await?;
            debug!("Wrote {} from {} object(s) ({} bytes)", fragment, task.keys.len(), size);
        }
        if !task.last_page {
            return Ok(());
        }

        let objects = regions.list(&task.prefix).await?;
        let fragments = round_fragments(&objects, &task.prefix);
        let config = orc.config().clone();

        match plan_round(fragments.len(), task.page, &config) {
            RoundPlan::Retry => {
                if task.attempt >= config.merge_max_retries {
                    return Err(PipelineError::MergeStalled {
                        prefix: task.prefix,
                        expected: task.page,
                        found: fragments.len(),
                        attempts: task.attempt,
                    });
                }
                info!(
                    "{} of {} fragment(s) under {} present, retrying",
                    fragments.len(),
                    task.page,
                    task.prefix
                );
                tokio::time::sleep(orc.deadline().cap(config.merge_retry_interval)).await;
                let retry = MergeTask {
                    skip_append: true,
                    attempt: task.attempt + 1,
                    ..task
                };
                orc.resend_self(serde_json::to_value(&retry)?).await?;
            }
            RoundPlan::Batch { batches } => {
                let next_prefix = paths::next_round_prefix(&task.prefix);
                info!(
                    "Merging {} fragment(s) into {} batch(es) under {}",
                    fragments.len(),
                    batches,
                    next_prefix
                );
                let merge = stage_name(MERGE)?;
                for (idx, batch) in fragments.chunks(config.merge_batch_size).enumerate() {
                    let next = MergeTask::new(
                        &task.project,
                        &next_prefix,
                        batch.to_vec(),
                        idx + 1,
                        idx + 1 == batches,
                    );
                    orc.dispatch(&merge, serde_json::to_value(&next)?, DispatchOptions::tracked())
                        .await?;
                }
            }
            RoundPlan::Finalize => {
                info!("{} fragment(s) left under {}, finalizing", fragments.len(), task.prefix);
                let finalize = FinalizeTask {
                    project: task.project,
                    keys: fragments,
                };
                orc.dispatch(
                    &stage_name(FINALIZE)?,
                    serde_json::to_value(&finalize)?,
                    DispatchOptions::tracked(),
                )
                .await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_task_defaults() {
        let task: MergeTask = serde_json::from_value(serde_json::json!({
            "project": "cohort",
            "prefix": "pages/run-1/page",
            "keys": [],
            "page": 3,
            "last_page": true
        }))
        .unwrap();
        assert!(!task.skip_append);
        assert_eq!(task.attempt, 0);
    }
}
