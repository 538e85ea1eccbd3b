// ==============================================================================
// fragments.rs - Result Fragment Ordering and Reduce-Tree Planning
// ==============================================================================
// Description: Order keys for fragment names whose counters are not
//              zero-padded, and the per-round decision of the merge tree
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================

use std::cmp::Ordering;

use crate::config::PipelineConfig;
use crate::storage::ObjectMeta;

/// Page counter of a merge fragment written under `prefix`
///
/// Only keys of the form `<prefix><digits>.tsv` are fragments of that round;
/// later rounds (`<prefix>_round...`) share the prefix and are excluded.
pub fn fragment_order(prefix: &str, key: &str) -> Option<u64> {
    let digits = key.strip_prefix(prefix)?.strip_suffix(".tsv")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Fragments of the round under `prefix`, in page-counter order
pub fn round_fragments(objects: &[ObjectMeta], prefix: &str) -> Vec<String> {
    let mut keyed: Vec<(u64, &str)> = objects
        .iter()
        .filter_map(|o| fragment_order(prefix, &o.key).map(|n| (n, o.key.as_str())))
        .collect();
    keyed.sort();
    keyed.into_iter().map(|(_, key)| key.to_string()).collect()
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Chunk {
    Number(u64),
    Text(String),
}

/// Natural ordering key: path segments compared in turn, digit runs inside a
/// segment compared numerically
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NaturalKey(Vec<Vec<Chunk>>);

impl NaturalKey {
    pub fn new(key: &str) -> Self {
        Self(key.split('/').map(chunks).collect())
    }
}

impl Ord for NaturalKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl PartialOrd for NaturalKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn chunks(segment: &str) -> Vec<Chunk> {
    let mut out = Vec::new();
    let mut rest = segment;
    while let Some(first) = rest.chars().next() {
        let numeric = first.is_ascii_digit();
        let end = rest
            .find(|c: char| c.is_ascii_digit() != numeric)
            .unwrap_or(rest.len());
        let (run, tail) = rest.split_at(end);
        out.push(match run.parse::<u64>() {
            Ok(n) if numeric => Chunk::Number(n),
            _ => Chunk::Text(run.to_string()),
        });
        rest = tail;
    }
    out
}

/// Sort object keys in natural order
pub fn natural_sort(keys: &mut [String]) {
    keys.sort_by_cached_key(|k| NaturalKey::new(k));
}

/// What a merge round does with the fragments it found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundPlan {
    /// Producers still in flight; look again later
    Retry,
    /// Concatenate into this many batches for another round
    Batch { batches: usize },
    /// Few enough to finish in a single step
    Finalize,
}

pub fn plan_round(found: usize, expected: usize, config: &PipelineConfig) -> RoundPlan {
    if found != expected || found == 0 {
        RoundPlan::Retry
    } else if found > config.merge_direct_threshold {
        RoundPlan::Batch {
            batches: found.div_ceil(config.merge_batch_size),
        }
    } else {
        RoundPlan::Finalize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn meta(key: &str) -> ObjectMeta {
        ObjectMeta {
            key: key.to_string(),
            size: 1,
            last_modified: Utc::now(),
        }
    }

    #[test]
    fn test_fragment_order_is_numeric() {
        let prefix = "pages/run-1/page";
        let objects: Vec<_> = ["page10.tsv", "page2.tsv", "page1.tsv", "page_round1.tsv", "page3.tmp"]
            .iter()
            .map(|k| meta(&format!("pages/run-1/{}", k)))
            .collect();

        assert_eq!(
            round_fragments(&objects, prefix),
            vec![
                "pages/run-1/page1.tsv",
                "pages/run-1/page2.tsv",
                "pages/run-1/page10.tsv"
            ]
        );
        assert_eq!(fragment_order(prefix, "pages/run-1/page.tsv"), None);
    }

    #[test]
    fn test_natural_order_of_branch_outputs() {
        let mut keys = vec![
            "branches/r/0_split1/0_annotate/0_format.tsv".to_string(),
            "branches/r/0_split/12_annotate/0_format.tsv".to_string(),
            "branches/r/0_split/3_annotate/0_format.tsv".to_string(),
            "branches/r/0_split/3_annotate/1_format.tsv".to_string(),
        ];
        natural_sort(&mut keys);
        assert_eq!(
            keys,
            vec![
                "branches/r/0_split/3_annotate/0_format.tsv",
                "branches/r/0_split/3_annotate/1_format.tsv",
                "branches/r/0_split/12_annotate/0_format.tsv",
                "branches/r/0_split1/0_annotate/0_format.tsv",
            ]
        );
    }

    #[test]
    fn test_plan_round() {
        let config = PipelineConfig::default();
        assert_eq!(plan_round(44, 45, &config), RoundPlan::Retry);
        assert_eq!(plan_round(0, 0, &config), RoundPlan::Retry);
        assert_eq!(plan_round(45, 45, &config), RoundPlan::Batch { batches: 3 });
        assert_eq!(plan_round(11, 11, &config), RoundPlan::Batch { batches: 1 });
        assert_eq!(plan_round(10, 10, &config), RoundPlan::Finalize);
        assert_eq!(plan_round(1, 1, &config), RoundPlan::Finalize);
    }

    #[test]
    fn test_rounds_shrink_to_one_step() {
        let config = PipelineConfig::default();
        let mut count = 1_000;
        let mut rounds = 0;
        loop {
            rounds += 1;
            match plan_round(count, count, &config) {
                RoundPlan::Batch { batches } => count = batches,
                RoundPlan::Finalize => break,
                RoundPlan::Retry => unreachable!(),
            }
        }
        // 1000 -> 50 -> 3 -> finalize
        assert_eq!(rounds, 3);
    }
}
