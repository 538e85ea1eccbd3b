// ==============================================================================
// storage/memory.rs - In-Memory Blob Store
// ==============================================================================
// Description: Thread-safe in-memory BlobStore for tests and local runs
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::RwLock;
use std::time::Duration;

use super::{clamp_range, expiry_from_now, write_sources, BlobStore, ObjectMeta, ReadHandle};
use crate::error::{PipelineError, Result};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    last_modified: DateTime<Utc>,
}

/// In-memory blob store. Not suitable for production.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    objects: RwLock<BTreeMap<String, StoredObject>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects
    pub fn len(&self) -> usize {
        self.objects.read().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All keys in lexical order
    pub fn keys(&self) -> Vec<String> {
        self.objects
            .read()
            .map(|o| o.keys().cloned().collect())
            .unwrap_or_default()
    }
}

fn poisoned() -> PipelineError {
    PipelineError::Storage("blob store lock poisoned".to_string())
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let objects = self.objects.read().map_err(|_| poisoned())?;
        objects
            .get(key)
            .map(|o| o.data.clone())
            .ok_or_else(|| PipelineError::NotFound(key.to_string()))
    }

    async fn get_range(&self, key: &str, range: Range<u64>) -> Result<Vec<u8>> {
        let data = self.get(key).await?;
        let range = clamp_range(range, data.len() as u64);
        Ok(data[range.start as usize..range.end as usize].to_vec())
    }

    async fn put(&self, key: &str, data: Vec<u8>) -> Result<()> {
        let mut objects = self.objects.write().map_err(|_| poisoned())?;
        objects.insert(
            key.to_string(),
            StoredObject {
                data,
                last_modified: Utc::now(),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut objects = self.objects.write().map_err(|_| poisoned())?;
        objects.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let objects = self.objects.read().map_err(|_| poisoned())?;
        Ok(objects
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, o)| ObjectMeta {
                key: key.clone(),
                size: o.data.len() as u64,
                last_modified: o.last_modified,
            })
            .collect())
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectMeta>> {
        let objects = self.objects.read().map_err(|_| poisoned())?;
        Ok(objects.get(key).map(|o| ObjectMeta {
            key: key.to_string(),
            size: o.data.len() as u64,
            last_modified: o.last_modified,
        }))
    }

    async fn read_handle(&self, key: &str, ttl: Duration) -> Result<ReadHandle> {
        if self.head(key).await?.is_none() {
            return Err(PipelineError::NotFound(key.to_string()));
        }
        let expires_at = expiry_from_now(ttl);
        Ok(ReadHandle {
            url: format!("memory://{}?expires={}", key, expires_at.timestamp()),
            expires_at,
        })
    }

    async fn compose(&self, dest: &str, from: &dyn BlobStore, sources: &[String]) -> Result<u64> {
        let mut data = Vec::new();
        let written = write_sources(from, sources, &mut data).await?;
        self.put(dest, data).await?;
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::delete_prefix;

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = MemoryBlobStore::new();
        store.put("a/1", b"hello".to_vec()).await.unwrap();

        assert_eq!(store.get("a/1").await.unwrap(), b"hello");
        assert_eq!(store.get_range("a/1", 1..3).await.unwrap(), b"el");
        assert_eq!(store.get_range("a/1", 3..99).await.unwrap(), b"lo");

        store.delete("a/1").await.unwrap();
        store.delete("a/1").await.unwrap();
        assert!(matches!(store.get("a/1").await, Err(PipelineError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_list_by_prefix() {
        let store = MemoryBlobStore::new();
        for key in ["run/1", "run/2", "runner/1", "other"] {
            store.put(key, Vec::new()).await.unwrap();
        }

        let keys: Vec<_> = store
            .list("run/")
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.key)
            .collect();
        assert_eq!(keys, vec!["run/1", "run/2"]);

        assert_eq!(delete_prefix(&store, "run").await.unwrap(), 3);
        assert_eq!(store.keys(), vec!["other"]);
    }

    #[tokio::test]
    async fn test_compose_keeps_records_apart() {
        let regions = MemoryBlobStore::new();
        regions.put("f1", b"r1".to_vec()).await.unwrap();
        regions.put("f2", Vec::new()).await.unwrap();
        regions.put("f3", b"r2\nr3\n".to_vec()).await.unwrap();
        let keys: Vec<String> = ["f1", "f2", "f3"].iter().map(|k| k.to_string()).collect();

        let results = MemoryBlobStore::new();
        assert_eq!(results.compose("out", &regions, &keys).await.unwrap(), 9);
        assert_eq!(results.get("out").await.unwrap(), b"r1\nr2\nr3\n");

        // composing within one store
        assert_eq!(regions.compose("f1", &regions, &keys).await.unwrap(), 9);
        assert_eq!(regions.get("f1").await.unwrap(), b"r1\nr2\nr3\n");
    }

    #[tokio::test]
    async fn test_compose_missing_source() {
        let store = MemoryBlobStore::new();
        let keys = vec!["absent".to_string()];
        assert!(matches!(
            store.compose("out", &store, &keys).await,
            Err(PipelineError::NotFound(_))
        ));
        assert!(store.head("out").await.unwrap().is_none());
    }
}
