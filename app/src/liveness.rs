// ==============================================================================
// liveness.rs - Liveness Marker Store
// ==============================================================================
// Description: Zero-byte temp-store objects, one per in-flight tracked task.
//              An empty marker set under a prefix means that subtree is done.
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================

use std::sync::Arc;
use tracing::debug;

use crate::error::Result;
use crate::lineage::Lineage;
use crate::paths;
use crate::storage::BlobStore;

#[derive(Clone)]
pub struct LivenessMarkers {
    store: Arc<dyn BlobStore>,
}

impl LivenessMarkers {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self { store }
    }

    pub async fn create(&self, lineage: &Lineage) -> Result<()> {
        debug!("Creating marker {}", lineage);
        self.store.put(&paths::marker_key(lineage), Vec::new()).await
    }

    pub async fn delete(&self, lineage: &Lineage) -> Result<()> {
        debug!("Deleting marker {}", lineage);
        self.store.delete(&paths::marker_key(lineage)).await
    }

    /// Lineages of tracked tasks still in flight below `scope`
    pub async fn outstanding(&self, scope: &Lineage) -> Result<Vec<Lineage>> {
        let objects = self.store.list(&paths::marker_prefix(scope)).await?;
        let mut lineages: Vec<Lineage> = objects
            .iter()
            .filter_map(|o| paths::lineage_from_marker_key(&o.key))
            .collect();
        lineages.sort_by_key(|l| l.to_string());
        Ok(lineages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBlobStore;

    #[tokio::test]
    async fn test_outstanding_is_scoped_to_run() {
        let markers = LivenessMarkers::new(Arc::new(MemoryBlobStore::new()));
        let a: Lineage = "run-1/0_split".parse().unwrap();
        let b: Lineage = "run-1/0_split/2_annotate".parse().unwrap();
        let other: Lineage = "run-10/0_split".parse().unwrap();
        for lineage in [&a, &b, &other] {
            markers.create(lineage).await.unwrap();
        }

        let root = Lineage::root("run-1").unwrap();
        assert_eq!(markers.outstanding(&root).await.unwrap(), vec![a.clone(), b.clone()]);
        assert_eq!(markers.outstanding(&a).await.unwrap(), vec![b.clone()]);

        markers.delete(&a).await.unwrap();
        markers.delete(&b).await.unwrap();
        markers.delete(&b).await.unwrap();
        assert!(markers.outstanding(&root).await.unwrap().is_empty());
    }
}
