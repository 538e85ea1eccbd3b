// ==============================================================================
// paths.rs - Object Key Layout
// ==============================================================================
// Description: Where each kind of pipeline object lives in the blob stores
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================
//
// temp store:     markers/<lineage>.live                 liveness markers
//                 payloads/<run>/<sha256>.json           offloaded payloads
// regions store:  branches/<lineage>.tsv                 branch outputs
//                 pages/<run>/page<n>.tsv                merge fragments
// results store:  projects/<project>/runs/<run><suffix>  final result
//                 ...<suffix>.index.json.gz              position index
// ==============================================================================

use sha2::{Digest, Sha256};

use crate::lineage::Lineage;

const MARKERS: &str = "markers";
const PAYLOADS: &str = "payloads";
const BRANCHES: &str = "branches";
const PAGES: &str = "pages";

/// Leaf suffix of a marker object. A task's marker is a file while its
/// children's markers live in a directory of the same name, so the two
/// must never share a path.
const MARKER_SUFFIX: &str = ".live";

/// Prefix under which merge fragments of the first round are written
pub const PAGE_STEM: &str = "page";

/// Appended to a fragment prefix for each further reduce-tree round
pub const ROUND_SUFFIX: &str = "_round";

pub fn marker_key(lineage: &Lineage) -> String {
    format!("{}/{}{}", MARKERS, lineage, MARKER_SUFFIX)
}

/// Prefix matching every marker of a run, or of one subtree when given a
/// non-root lineage
pub fn marker_prefix(lineage: &Lineage) -> String {
    format!("{}/{}", MARKERS, lineage.descendant_prefix())
}

pub fn lineage_from_marker_key(key: &str) -> Option<Lineage> {
    key.strip_prefix(MARKERS)?
        .strip_prefix('/')?
        .strip_suffix(MARKER_SUFFIX)?
        .parse()
        .ok()
}

/// Deterministic key for a payload offloaded by the task holding `lineage`
pub fn payload_key(lineage: &Lineage) -> String {
    let digest = Sha256::digest(lineage.to_string().as_bytes());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    format!("{}/{}/{}.json", PAYLOADS, lineage.run_id(), hex)
}

pub fn payload_prefix(run_id: &str) -> String {
    format!("{}/{}/", PAYLOADS, run_id)
}

pub fn branch_key(lineage: &Lineage) -> String {
    format!("{}/{}.tsv", BRANCHES, lineage)
}

pub fn branch_prefix(run_id: &str) -> String {
    format!("{}/{}/", BRANCHES, run_id)
}

/// Prefix of first-round merge fragments for a run
pub fn page_prefix(run_id: &str) -> String {
    format!("{}/{}/{}", PAGES, run_id, PAGE_STEM)
}

/// Prefix of the round after the one writing under `prefix`
pub fn next_round_prefix(prefix: &str) -> String {
    format!("{}{}", prefix, ROUND_SUFFIX)
}

/// Key of page `n` under a fragment prefix. Counters are not zero-padded.
pub fn page_key(prefix: &str, n: usize) -> String {
    format!("{}{}.tsv", prefix, n)
}

pub fn run_pages_prefix(run_id: &str) -> String {
    format!("{}/{}/", PAGES, run_id)
}

pub fn result_key(project: &str, run_id: &str, suffix: &str) -> String {
    format!("projects/{}/runs/{}{}", project, run_id, suffix)
}

pub fn index_key(result_key: &str) -> String {
    format!("{}.index.json.gz", result_key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lineage::{DispatchCounter, StageName};

    #[test]
    fn test_marker_keys_follow_lineage() {
        let root = Lineage::root("run-1").unwrap();
        let mut counter = DispatchCounter::new();
        let child = root
            .child(&StageName::new("split").unwrap(), None, &mut counter)
            .unwrap();

        assert_eq!(marker_key(&child), "markers/run-1/0_split.live");
        assert!(marker_key(&child).starts_with(&marker_prefix(&root)));
        assert_eq!(lineage_from_marker_key("markers/run-1/0_split.live"), Some(child.clone()));
        assert_eq!(lineage_from_marker_key("markers/run-1/0_split"), None);
        assert_eq!(lineage_from_marker_key("payloads/run-1/x"), None);

        // a task's own marker is not inside the prefix of its children
        assert!(!marker_key(&child).starts_with(&marker_prefix(&child)));
    }

    #[test]
    fn test_payload_key_is_deterministic() {
        let lineage: Lineage = "run-1/0_split/3_annotate".parse().unwrap();
        assert_eq!(payload_key(&lineage), payload_key(&lineage));
        assert!(payload_key(&lineage).starts_with(&payload_prefix("run-1")));
        assert!(payload_key(&lineage).ends_with(".json"));
    }

    #[test]
    fn test_page_layout() {
        let prefix = page_prefix("run-1");
        assert_eq!(page_key(&prefix, 12), "pages/run-1/page12.tsv");
        let next = next_round_prefix(&prefix);
        assert_eq!(page_key(&next, 1), "pages/run-1/page_round1.tsv");
        assert!(next.starts_with(&prefix));
        assert!(next.starts_with(&run_pages_prefix("run-1")));
    }

    #[test]
    fn test_result_layout() {
        let key = result_key("cohort", "run-1", ".tsv");
        assert_eq!(key, "projects/cohort/runs/run-1.tsv");
        assert_eq!(index_key(&key), "projects/cohort/runs/run-1.tsv.index.json.gz");
    }
}
