// ==============================================================================
// reduce_tree.rs - Reduce-Tree Merge Scenarios
// ==============================================================================
// Description: Round structure, ordering and arrival-order independence of the
//              merge tree
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================

mod common;

use serde_json::Value;
use tempfile::TempDir;

use annotation_pipeline::index::PositionIndex;
use annotation_pipeline::jobs::{JobStatus, JobStore};
use annotation_pipeline::paths;
use annotation_pipeline::stages::{stage_name, FinalizeTask, MergeTask, MERGE};
use annotation_pipeline::storage::{BlobStore, StoreSet};
use annotation_pipeline::{DispatchOptions, Outcome, PipelineConfig, PipelineError};

use common::{fast_config, record, Harness, PROJECT, RUN_ID};

async fn seed_fragments(harness: &Harness, run_id: &str, order: impl Iterator<Item = usize>) {
    let prefix = paths::page_prefix(run_id);
    for n in order {
        harness
            .services
            .regions
            .put(&paths::page_key(&prefix, n), record("1", n as u64).into_bytes())
            .await
            .unwrap();
    }
}

async fn start_last_page(harness: &Harness, run_id: &str, expected: usize) {
    let task = MergeTask {
        skip_append: true,
        ..MergeTask::new(PROJECT, &paths::page_prefix(run_id), Vec::new(), expected, true)
    };
    harness
        .ingress(run_id)
        .dispatch(
            &stage_name(MERGE).unwrap(),
            serde_json::to_value(&task).unwrap(),
            DispatchOptions::tracked(),
        )
        .await
        .unwrap();
}

fn expected_content(n: usize) -> String {
    (1..=n).map(|i| record("1", i as u64)).collect()
}

async fn result_content(harness: &Harness, run_id: &str) -> String {
    let key = paths::result_key(PROJECT, run_id, &harness.services.config.result_suffix);
    String::from_utf8(harness.services.results.get(&key).await.unwrap()).unwrap()
}

#[tokio::test]
async fn test_45_fragments_take_two_rounds() {
    let harness = Harness::new(fast_config());
    harness.create_run(RUN_ID).await;
    seed_fragments(&harness, RUN_ID, 1..=45).await;
    start_last_page(&harness, RUN_ID, 45).await;
    let runtime = harness.runtime();

    // round 1: 45 fragments > 10, batches of 20
    runtime.step().await.unwrap().unwrap();
    let round_two: Vec<MergeTask> = harness
        .bus
        .published("merge")
        .iter()
        .skip(1)
        .map(|d| serde_json::from_str::<Value>(&d.body).unwrap())
        .map(|v| serde_json::from_value(v["payload"].clone()).unwrap())
        .collect();
    assert_eq!(round_two.len(), 3);
    assert_eq!(
        round_two.iter().map(|t| t.keys.len()).collect::<Vec<_>>(),
        vec![20, 20, 5]
    );
    assert_eq!(
        round_two.iter().map(|t| t.last_page).collect::<Vec<_>>(),
        vec![false, false, true]
    );
    let round_prefix = paths::next_round_prefix(&paths::page_prefix(RUN_ID));
    assert!(round_prefix.ends_with("page_round"));
    assert!(round_two.iter().all(|t| t.prefix == round_prefix));
    assert_eq!(round_two[0].keys[1], paths::page_key(&paths::page_prefix(RUN_ID), 2));
    assert_eq!(round_two[0].keys[9], paths::page_key(&paths::page_prefix(RUN_ID), 10));

    // round 2: 3 fragments, concatenated directly
    let stats = runtime.run_until_idle(100).await.unwrap();
    assert!(stats.failures.is_empty(), "{:?}", stats.failures);
    let finals = harness.bus.published("finalize");
    assert_eq!(finals.len(), 1);
    let body: Value = serde_json::from_str(&finals[0].body).unwrap();
    let finalize: FinalizeTask = serde_json::from_value(body["payload"].clone()).unwrap();
    assert_eq!(
        finalize.keys,
        (1..=3).map(|n| paths::page_key(&round_prefix, n)).collect::<Vec<_>>()
    );
    assert_eq!(harness.bus.published("merge").len(), 4);

    assert_eq!(result_content(&harness, RUN_ID).await, expected_content(45));
    let record = harness.jobs.get(RUN_ID).await.unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_result_index_is_persisted() {
    let config = PipelineConfig {
        index_page_records: 5,
        ..fast_config()
    };
    let harness = Harness::new(config);
    harness.create_run(RUN_ID).await;
    seed_fragments(&harness, RUN_ID, 1..=12).await;
    start_last_page(&harness, RUN_ID, 12).await;

    harness.runtime().run_until_idle(100).await.unwrap();

    let key = paths::result_key(PROJECT, RUN_ID, ".tsv");
    let bytes = harness.services.results.get(&paths::index_key(&key)).await.unwrap();
    let index = PositionIndex::from_gzip_json(&bytes).unwrap();
    assert_eq!(index.page_counts(), vec![("1".to_string(), 3)]);
    assert_eq!(index.search("1", 7).unwrap().page, 2);

    // intermediates are gone
    assert!(harness
        .services
        .regions
        .list(&paths::run_pages_prefix(RUN_ID))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_arrival_order_does_not_change_output() {
    let dir = TempDir::new().unwrap();
    let stores = StoreSet::open_fs(dir.path()).await.unwrap();
    let harness = Harness::with_stores(fast_config(), stores);

    harness.create_run("forward").await;
    harness.create_run("reverse").await;
    seed_fragments(&harness, "forward", 1..=57).await;
    seed_fragments(&harness, "reverse", (1..=57).rev()).await;
    start_last_page(&harness, "forward", 57).await;
    start_last_page(&harness, "reverse", 57).await;

    let stats = harness.runtime().run_until_idle(200).await.unwrap();
    assert!(stats.failures.is_empty(), "{:?}", stats.failures);

    let forward = result_content(&harness, "forward").await;
    assert_eq!(forward, expected_content(57));
    assert_eq!(result_content(&harness, "reverse").await, forward);
}

#[tokio::test]
async fn test_missing_fragment_retries_then_stalls() {
    let config = PipelineConfig {
        merge_max_retries: 3,
        ..fast_config()
    };
    let harness = Harness::new(config);
    harness.create_run(RUN_ID).await;
    seed_fragments(&harness, RUN_ID, (1..=12).filter(|n| *n != 7)).await;
    start_last_page(&harness, RUN_ID, 12).await;

    let runtime = harness.runtime();
    let stats = runtime.run_until_idle(100).await.unwrap();
    assert_eq!(stats.per_stage.get("merge"), Some(&4));
    assert_eq!(stats.failures.len(), 1);

    let record = harness.jobs.get(RUN_ID).await.unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Failed);
    assert_eq!(record.failed_step.as_deref(), Some("merge"));
    assert!(record.error_message.unwrap().contains("did not stabilise"));
}

#[tokio::test]
async fn test_late_fragment_is_picked_up_on_retry() {
    let harness = Harness::new(fast_config());
    harness.create_run(RUN_ID).await;
    seed_fragments(&harness, RUN_ID, 1..=4).await;
    start_last_page(&harness, RUN_ID, 5).await;
    let runtime = harness.runtime();

    let (_, outcome) = runtime.step().await.unwrap().unwrap();
    assert_eq!(outcome, Outcome::Completed { resent: true });
    assert!(harness.bus.published("finalize").is_empty());

    seed_fragments(&harness, RUN_ID, 5..=5).await;
    runtime.run_until_idle(100).await.unwrap();
    assert_eq!(result_content(&harness, RUN_ID).await, expected_content(5));
}

#[test]
fn test_stall_error_names_prefix() {
    let err = PipelineError::MergeStalled {
        prefix: "pages/r/page".to_string(),
        expected: 12,
        found: 11,
        attempts: 3,
    };
    assert!(err.to_string().contains("pages/r/page"));
}
