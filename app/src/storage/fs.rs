// ==============================================================================
// fs.rs - Filesystem Blob Store
// ==============================================================================
// Description: BlobStore rooted at a directory on the data volume. Keys map to
//              relative paths; writes are staged and renamed into place.
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::ops::Range;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{clamp_range, expiry_from_now, write_sources, BlobStore, ObjectMeta, ReadHandle};
use crate::error::{PipelineError, Result};

const STAGING_DIR: &str = ".staging";

/// Directory-backed blob store
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Open (and create if needed) a store rooted at `root`
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(root.join(STAGING_DIR)).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let safe = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)))
            && !key.starts_with(STAGING_DIR);
        if !safe {
            return Err(PipelineError::Storage(format!("invalid object key '{}'", key)));
        }
        Ok(self.root.join(relative))
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<_> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(parts.join("/"))
    }

    async fn meta_for(&self, key: String, path: &Path) -> Result<Option<ObjectMeta>> {
        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_file() => {
                let last_modified = meta
                    .modified()
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| Utc::now());
                Ok(Some(ObjectMeta {
                    key,
                    size: meta.len(),
                    last_modified,
                }))
            }
            Ok(_) => Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Target path for `key` plus a fresh staging file to write it through
    async fn stage(&self, key: &str) -> Result<(PathBuf, PathBuf)> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let staged = self.root.join(STAGING_DIR).join(Uuid::new_v4().to_string());
        Ok((staged, path))
    }

    async fn commit(staged: &Path, path: &Path) -> Result<()> {
        if let Err(e) = tokio::fs::rename(staged, path).await {
            let _ = tokio::fs::remove_file(staged).await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Deepest directory that can contain keys starting with `prefix`
    fn list_root(&self, prefix: &str) -> PathBuf {
        match prefix.rfind('/') {
            Some(idx) => self.root.join(&prefix[..idx]),
            None => self.root.clone(),
        }
    }
}

fn not_found(key: &str, e: std::io::Error) -> PipelineError {
    if e.kind() == ErrorKind::NotFound {
        PipelineError::NotFound(key.to_string())
    } else {
        e.into()
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key)?;
        tokio::fs::read(&path).await.map_err(|e| not_found(key, e))
    }

    async fn get_range(&self, key: &str, range: Range<u64>) -> Result<Vec<u8>> {
        let path = self.path_for(key)?;
        let mut file = tokio::fs::File::open(&path).await.map_err(|e| not_found(key, e))?;
        let len = file.metadata().await?.len();
        let range = clamp_range(range, len);

        file.seek(std::io::SeekFrom::Start(range.start)).await?;
        let mut buf = Vec::with_capacity((range.end - range.start) as usize);
        file.take(range.end - range.start).read_to_end(&mut buf).await?;
        Ok(buf)
    }

    async fn put(&self, key: &str, data: Vec<u8>) -> Result<()> {
        let (staged, path) = self.stage(key).await?;
        let mut file = tokio::fs::File::create(&staged).await?;
        file.write_all(&data).await?;
        file.flush().await?;
        drop(file);

        Self::commit(&staged, &path).await?;
        debug!("Stored {} ({} bytes)", key, data.len());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let mut found = Vec::new();
        let mut pending = vec![self.list_root(prefix)];
        let staging = self.root.join(STAGING_DIR);

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path == staging {
                    continue;
                }
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    pending.push(path);
                    continue;
                }
                let Some(key) = self.key_for(&path) else {
                    warn!("Skipping path outside store root: {:?}", path);
                    continue;
                };
                if !key.starts_with(prefix) {
                    continue;
                }
                if let Some(meta) = self.meta_for(key, &path).await? {
                    found.push(meta);
                }
            }
        }

        Ok(found)
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectMeta>> {
        let path = self.path_for(key)?;
        self.meta_for(key.to_string(), &path).await
    }

    async fn read_handle(&self, key: &str, ttl: Duration) -> Result<ReadHandle> {
        let path = self.path_for(key)?;
        if self.meta_for(key.to_string(), &path).await?.is_none() {
            return Err(PipelineError::NotFound(key.to_string()));
        }
        let expires_at = expiry_from_now(ttl);
        Ok(ReadHandle {
            url: format!("file://{}?expires={}", path.display(), expires_at.timestamp()),
            expires_at,
        })
    }

    async fn compose(&self, dest: &str, from: &dyn BlobStore, sources: &[String]) -> Result<u64> {
        let (staged, path) = self.stage(dest).await?;
        let mut file = tokio::fs::File::create(&staged).await?;
        let written = match write_sources(from, sources, &mut file).await {
            Ok(written) => written,
            Err(e) => {
                drop(file);
                let _ = tokio::fs::remove_file(&staged).await;
                return Err(e);
            }
        };
        drop(file);

        Self::commit(&staged, &path).await?;
        debug!("Composed {} from {} object(s) ({} bytes)", dest, sources.len(), written);
        Ok(written)
    }
}
