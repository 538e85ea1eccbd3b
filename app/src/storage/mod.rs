// ==============================================================================
// storage/mod.rs - Blob Store Abstraction
// ==============================================================================
// Description: Key/value object storage used for liveness markers, oversized
//              payloads, result fragments and final results
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::error::{PipelineError, Result};

pub mod fs;
pub mod memory;

pub use fs::FsBlobStore;
pub use memory::MemoryBlobStore;

/// Metadata about a stored object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

/// Time-limited direct read access to an object
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ReadHandle {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

/// Object storage contract
///
/// All mutations are single-key and idempotent; there are no cross-key
/// transactions.
#[async_trait]
pub trait BlobStore: Send + Sync + 'static {
    /// Read an entire object. `PipelineError::NotFound` if absent.
    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Read `range` of an object; the end is clamped to the object length
    async fn get_range(&self, key: &str, range: Range<u64>) -> Result<Vec<u8>>;

    /// Create or overwrite an object
    async fn put(&self, key: &str, data: Vec<u8>) -> Result<()>;

    /// Delete an object. Succeeds when the object does not exist.
    async fn delete(&self, key: &str) -> Result<()>;

    /// List objects whose key starts with `prefix`, in arbitrary order
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>>;

    /// Object metadata, `None` if absent
    async fn head(&self, key: &str) -> Result<Option<ObjectMeta>>;

    /// Direct read handle valid for `ttl`
    async fn read_handle(&self, key: &str, ttl: Duration) -> Result<ReadHandle>;

    /// Write the concatenation of `sources`, read from `from`, to `dest`
    ///
    /// Sources are streamed in chunks of at most [`READ_CHUNK_BYTES`] and
    /// every non-empty source is newline-terminated so records never run
    /// together. Returns the size of the new object.
    async fn compose(&self, dest: &str, from: &dyn BlobStore, sources: &[String]) -> Result<u64>;
}

/// Bytes requested per read when streaming an object
pub const READ_CHUNK_BYTES: u64 = 8 * 1024 * 1024;

/// Sequential ranged reads over one object
pub struct ChunkReader<'a> {
    store: &'a dyn BlobStore,
    key: String,
    len: u64,
    offset: u64,
    chunk: u64,
}

impl<'a> ChunkReader<'a> {
    pub async fn open(store: &'a dyn BlobStore, key: &str, chunk: u64) -> Result<Self> {
        let meta = store
            .head(key)
            .await?
            .ok_or_else(|| PipelineError::NotFound(key.to_string()))?;
        Ok(Self {
            store,
            key: key.to_string(),
            len: meta.size,
            offset: 0,
            chunk: chunk.max(1),
        })
    }

    /// Next chunk of the object, `None` once it is exhausted
    pub async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        if self.offset >= self.len {
            return Ok(None);
        }
        let end = self.offset.saturating_add(self.chunk).min(self.len);
        let bytes = self.store.get_range(&self.key, self.offset..end).await?;
        if bytes.is_empty() {
            // object shrank underneath us
            return Ok(None);
        }
        self.offset += bytes.len() as u64;
        Ok(Some(bytes))
    }
}

/// Stream `sources` from `from` into `out`, newline-terminating each
/// non-empty source. Returns the number of bytes written.
pub(crate) async fn write_sources<W>(
    from: &dyn BlobStore,
    sources: &[String],
    out: &mut W,
) -> Result<u64>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut written = 0u64;
    for key in sources {
        let mut reader = ChunkReader::open(from, key, READ_CHUNK_BYTES).await?;
        let mut last = None;
        while let Some(chunk) = reader.next_chunk().await? {
            last = chunk.last().copied();
            out.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        if last.is_some_and(|b| b != b'\n') {
            out.write_all(b"\n").await?;
            written += 1;
        }
    }
    out.flush().await?;
    Ok(written)
}

/// The three stores a pipeline deployment uses
#[derive(Clone)]
pub struct StoreSet {
    /// Liveness markers and offloaded payloads
    pub temp: Arc<dyn BlobStore>,
    /// Branch outputs and merge fragments
    pub regions: Arc<dyn BlobStore>,
    /// Final results and their indexes
    pub results: Arc<dyn BlobStore>,
}

impl StoreSet {
    /// Filesystem stores under `<root>/temp`, `<root>/regions` and
    /// `<root>/results`
    pub async fn open_fs(root: &Path) -> Result<Self> {
        Ok(Self {
            temp: Arc::new(FsBlobStore::open(root.join("temp")).await?),
            regions: Arc::new(FsBlobStore::open(root.join("regions")).await?),
            results: Arc::new(FsBlobStore::open(root.join("results")).await?),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            temp: Arc::new(MemoryBlobStore::new()),
            regions: Arc::new(MemoryBlobStore::new()),
            results: Arc::new(MemoryBlobStore::new()),
        }
    }
}

/// Delete every object under `prefix`, returning how many were removed
pub async fn delete_prefix(store: &dyn BlobStore, prefix: &str) -> Result<usize> {
    let objects = store.list(prefix).await?;
    for object in &objects {
        store.delete(&object.key).await?;
    }
    debug!("Deleted {} object(s) under {}", objects.len(), prefix);
    Ok(objects.len())
}

pub(crate) fn expiry_from_now(ttl: Duration) -> DateTime<Utc> {
    let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(365));
    Utc::now().checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Clamp a requested byte range to an object of `len` bytes
pub(crate) fn clamp_range(range: Range<u64>, len: u64) -> Range<u64> {
    let end = range.end.min(len);
    let start = range.start.min(end);
    start..end
}
