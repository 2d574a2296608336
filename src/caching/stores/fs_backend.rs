//! # Filesystem Storage Backend
//!
//! A reference `StorageBackend` that keeps one file per key inside a
//! directory, with file names hex-encoded so any fingerprint is a valid
//! path component. The byte quota covers the stored values; a write that
//! would exceed it is rejected with `QuotaExceeded` so the persistent cache
//! tier can run its eviction pass.

use super::{StorageBackend, StorageError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Filesystem-backed key-value store with a byte quota
#[derive(Debug)]
pub struct FsBackend {
    /// Directory holding one file per key
    root: PathBuf,

    /// Maximum total value bytes
    max_bytes: u64,

    /// Current usage, maintained incrementally after the initial scan
    used_bytes: AtomicU64,

    /// Serializes writers so quota accounting cannot race
    write_lock: Mutex<()>,
}

impl FsBackend {
    /// Open (creating if needed) a backend rooted at `root` with the given
    /// byte quota. Scans existing files once to initialize usage accounting.
    pub async fn open<P: AsRef<Path>>(root: P, max_bytes: u64) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| StorageError::backend(format!("failed to create {:?}: {}", root, e)))?;

        let mut used = 0u64;
        let mut dir = tokio::fs::read_dir(&root)
            .await
            .map_err(|e| StorageError::backend(format!("failed to read {:?}: {}", root, e)))?;
        while let Some(dirent) = dir
            .next_entry()
            .await
            .map_err(|e| StorageError::backend(format!("failed to scan {:?}: {}", root, e)))?
        {
            if let Ok(meta) = dirent.metadata().await {
                if meta.is_file() {
                    used += meta.len();
                }
            }
        }

        info!(
            "Filesystem cache backend opened at {:?} ({} bytes used of {})",
            root, used, max_bytes
        );

        Ok(Self {
            root,
            max_bytes,
            used_bytes: AtomicU64::new(used),
            write_lock: Mutex::new(()),
        })
    }

    /// Bytes currently stored
    pub fn used_bytes(&self) -> u64 {
        self.used_bytes.load(Ordering::Relaxed)
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(hex::encode(key.as_bytes()))
    }

    async fn existing_len(&self, path: &Path) -> u64 {
        match tokio::fs::metadata(path).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        }
    }
}

#[async_trait]
impl StorageBackend for FsBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::backend(format!(
                "failed to read key {}: {}",
                key, e
            ))),
        }
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;

        let path = self.path_for(key);
        let old_len = self.existing_len(&path).await;
        let new_len = value.len() as u64;
        let used = self.used_bytes.load(Ordering::Relaxed);
        let projected = used - old_len + new_len;

        if projected > self.max_bytes {
            debug!(
                "Rejecting write of {} bytes for key {} ({} of {} bytes used)",
                new_len, key, used, self.max_bytes
            );
            return Err(StorageError::QuotaExceeded);
        }

        tokio::fs::write(&path, value)
            .await
            .map_err(|e| StorageError::backend(format!("failed to write key {}: {}", key, e)))?;

        self.used_bytes.store(projected, Ordering::Relaxed);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let _guard = self.write_lock.lock().await;

        let path = self.path_for(key);
        let old_len = self.existing_len(&path).await;

        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                self.used_bytes.fetch_sub(old_len, Ordering::Relaxed);
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::backend(format!(
                "failed to delete key {}: {}",
                key, e
            ))),
        }
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| StorageError::backend(format!("failed to list keys: {}", e)))?;

        while let Some(dirent) = dir
            .next_entry()
            .await
            .map_err(|e| StorageError::backend(format!("failed to list keys: {}", e)))?
        {
            let name = dirent.file_name();
            let Some(name) = name.to_str() else { continue };
            match hex::decode(name).map(String::from_utf8) {
                Ok(Ok(key)) => keys.push(key),
                _ => {
                    warn!("Ignoring foreign file {:?} in cache directory", name);
                }
            }
        }

        Ok(keys)
    }
}
