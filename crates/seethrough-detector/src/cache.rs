//! Persistent byte store for downloaded model binaries
//!
//! The cache is an optimization: the loader treats every error coming out
//! of it as a miss (reads) or ignores it (writes).

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use seethrough_core::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Content type recorded for model binaries
pub const MODEL_CONTENT_TYPE: &str = "application/octet-stream";

/// A cached model binary and its metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedModelBlob {
    pub bytes: Bytes,
    pub version: String,
    pub content_type: String,
    /// Hex SHA-256 of `bytes`
    pub sha256: String,
    pub stored_at: DateTime<Utc>,
}

impl CachedModelBlob {
    pub fn new(bytes: Bytes, version: impl Into<String>) -> Self {
        let sha256 = sha256_hex(&bytes);
        Self {
            bytes,
            version: version.into(),
            content_type: MODEL_CONTENT_TYPE.to_string(),
            sha256,
            stored_at: Utc::now(),
        }
    }
}

/// Key-value store for model binaries
#[async_trait]
pub trait ModelCache: Send + Sync {
    /// Look up a binary; `Ok(None)` on a miss
    async fn lookup(&self, key: &str) -> Result<Option<CachedModelBlob>>;

    /// Store a binary, replacing any previous entry for `key`
    async fn store(&self, key: &str, bytes: Bytes, version: &str) -> Result<()>;

    /// Drop a single entry
    async fn remove(&self, key: &str) -> Result<()>;

    /// Drop every entry
    async fn clear(&self) -> Result<()>;
}

/// Filesystem-backed cache that survives process restarts
///
/// Each entry is a `<digest>.bin` payload plus a `<digest>.json` metadata
/// file, both written through a temporary file and renamed into place.
#[derive(Debug, Clone)]
pub struct DiskModelCache {
    dir: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct EntryMetadata {
    key: String,
    version: String,
    content_type: String,
    sha256: String,
    size: u64,
    stored_at: DateTime<Utc>,
}

impl DiskModelCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_paths(&self, key: &str) -> (PathBuf, PathBuf) {
        let stem = &sha256_hex(key.as_bytes())[..32];
        (
            self.dir.join(format!("{}.bin", stem)),
            self.dir.join(format!("{}.json", stem)),
        )
    }
}

#[async_trait]
impl ModelCache for DiskModelCache {
    async fn lookup(&self, key: &str) -> Result<Option<CachedModelBlob>> {
        let (bin_path, meta_path) = self.entry_paths(key);

        let meta_raw = match tokio::fs::read(&meta_path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::cache(format!("Failed to read cache metadata: {}", e))),
        };
        let meta: EntryMetadata = serde_json::from_slice(&meta_raw)
            .map_err(|e| Error::cache(format!("Corrupt cache metadata: {}", e)))?;

        if meta.key != key {
            return Ok(None);
        }

        let bytes = match tokio::fs::read(&bin_path).await {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::cache(format!("Failed to read cached model: {}", e))),
        };

        if bytes.len() as u64 != meta.size {
            return Err(Error::cache(format!(
                "Cached model is truncated ({} of {} bytes)",
                bytes.len(),
                meta.size
            )));
        }

        let digest = {
            let bytes = bytes.clone();
            tokio::task::spawn_blocking(move || sha256_hex(&bytes))
                .await
                .map_err(|e| Error::internal(format!("Digest task failed: {}", e)))?
        };
        if digest != meta.sha256 {
            return Err(Error::cache("Cached model failed its checksum"));
        }

        tracing::debug!("Cache hit for {} ({} bytes)", key, bytes.len());
        Ok(Some(CachedModelBlob {
            bytes,
            version: meta.version,
            content_type: meta.content_type,
            sha256: meta.sha256,
            stored_at: meta.stored_at,
        }))
    }

    async fn store(&self, key: &str, bytes: Bytes, version: &str) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| Error::cache(format!("Failed to create cache directory: {}", e)))?;

        let blob = {
            let bytes = bytes.clone();
            let version = version.to_string();
            tokio::task::spawn_blocking(move || CachedModelBlob::new(bytes, version))
                .await
                .map_err(|e| Error::internal(format!("Digest task failed: {}", e)))?
        };

        let (bin_path, meta_path) = self.entry_paths(key);
        write_atomic(&bin_path, &bytes).await?;

        let meta = EntryMetadata {
            key: key.to_string(),
            version: blob.version,
            content_type: blob.content_type,
            sha256: blob.sha256,
            size: bytes.len() as u64,
            stored_at: blob.stored_at,
        };
        let meta_raw = serde_json::to_vec_pretty(&meta)?;
        write_atomic(&meta_path, &meta_raw).await?;

        tracing::debug!("Cached {} bytes under {}", bytes.len(), key);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let (bin_path, meta_path) = self.entry_paths(key);
        for path in [meta_path, bin_path] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(Error::cache(format!(
                        "Failed to remove {}: {}",
                        path.display(),
                        e
                    )))
                }
            }
        }
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::cache(format!("Failed to clear model cache: {}", e))),
        }
    }
}

// Temp names are unique per write so concurrent writers never share one
async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
    if let Err(e) = tokio::fs::write(&tmp, contents).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(Error::cache(format!("Failed to write {}: {}", tmp.display(), e)));
    }
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| Error::cache(format!("Failed to move {} into place: {}", path.display(), e)))
}

/// Process-local cache
#[derive(Debug, Default)]
pub struct MemoryModelCache {
    entries: Mutex<HashMap<String, CachedModelBlob>>,
}

impl MemoryModelCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl ModelCache for MemoryModelCache {
    async fn lookup(&self, key: &str) -> Result<Option<CachedModelBlob>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn store(&self, key: &str, bytes: Bytes, version: &str) -> Result<()> {
        let blob = CachedModelBlob::new(bytes, version);
        self.entries.lock().insert(key.to_string(), blob);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.entries.lock().clear();
        Ok(())
    }
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}
