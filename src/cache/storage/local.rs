//! Local Tier Storage
//!
//! File-based key/value storage. One data file plus a JSON `.meta` sidecar
//! per key; file names are the SHA-256 of the storage key, sharded into
//! subdirectories by the first hash byte.

use crate::cache::entry::{valid_at, CacheEntry, CacheKey, StoredEntry};
use crate::cache::storage::TierStorage;
use crate::cache::tier::CacheTier;
use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

// =============================================================================
// Local Storage Configuration
// =============================================================================

/// Configuration for local storage
#[derive(Debug, Clone)]
pub struct LocalStorageConfig {
    /// Root directory for cache files
    pub root_path: PathBuf,
    /// Whether to sync writes to disk
    pub sync_writes: bool,
}

impl LocalStorageConfig {
    pub fn new(root_path: impl Into<PathBuf>) -> Self {
        Self {
            root_path: root_path.into(),
            sync_writes: false,
        }
    }
}

// =============================================================================
// Entry Metadata (stored alongside data)
// =============================================================================

/// Metadata stored with each cache file
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredMetadata {
    key: CacheKey,
    created_at: DateTime<Utc>,
    ttl_ms: Option<u64>,
    size: u64,
}

impl StoredMetadata {
    fn ttl(&self) -> Option<Duration> {
        self.ttl_ms.map(Duration::from_millis)
    }
}

/// In-memory index record for one file
#[derive(Debug, Clone)]
struct IndexEntry {
    path: PathBuf,
    key: CacheKey,
    size: u64,
    created_at: DateTime<Utc>,
    ttl: Option<Duration>,
}

impl IndexEntry {
    fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        valid_at(self.created_at, self.ttl, now)
    }
}

// =============================================================================
// Local Storage
// =============================================================================

/// Local tier storage
pub struct LocalStorage {
    /// Root directory for cache files
    root_path: PathBuf,
    /// Index of cached files (storage key -> record)
    index: RwLock<HashMap<String, IndexEntry>>,
    /// Whether to sync writes
    sync_writes: bool,
}

impl LocalStorage {
    /// Create new local storage rooted at `root_path`
    pub async fn with_path(root_path: impl Into<PathBuf>) -> Result<Self> {
        Self::with_config(LocalStorageConfig::new(root_path)).await
    }

    /// Create new local storage with full config
    pub async fn with_config(config: LocalStorageConfig) -> Result<Self> {
        fs::create_dir_all(&config.root_path).await?;

        let storage = Self {
            root_path: config.root_path,
            index: RwLock::new(HashMap::new()),
            sync_writes: config.sync_writes,
        };

        storage.rebuild_index().await?;

        Ok(storage)
    }

    /// Root directory
    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    /// Rebuild index from disk
    async fn rebuild_index(&self) -> Result<()> {
        let mut rebuilt = HashMap::new();

        let mut root_entries = fs::read_dir(&self.root_path).await?;
        while let Some(root_entry) = root_entries.next_entry().await? {
            if !root_entry.file_type().await?.is_dir() {
                continue;
            }

            let mut shard_entries = match fs::read_dir(root_entry.path()).await {
                Ok(e) => e,
                Err(_) => continue,
            };

            while let Some(entry) = shard_entries.next_entry().await? {
                let meta_path = entry.path();
                if meta_path.extension().map(|e| e != "meta").unwrap_or(true) {
                    continue;
                }

                let Some(metadata) = read_metadata(&meta_path).await else {
                    continue;
                };

                let data_path = meta_path.with_extension("");
                if fs::metadata(&data_path).await.is_err() {
                    continue;
                }

                rebuilt.insert(
                    metadata.key.to_storage_key(),
                    IndexEntry {
                        path: data_path,
                        size: metadata.size,
                        created_at: metadata.created_at,
                        ttl: metadata.ttl(),
                        key: metadata.key,
                    },
                );
            }
        }

        debug!(
            entries = rebuilt.len(),
            root = %self.root_path.display(),
            "Local cache index rebuilt"
        );
        *self.index.write() = rebuilt;

        Ok(())
    }

    /// Get file path for a key
    fn get_file_path(&self, key: &CacheKey) -> PathBuf {
        let digest = Sha256::digest(key.to_storage_key().as_bytes());
        let filename = hex::encode(digest);
        self.root_path.join(&filename[..2]).join(filename)
    }

    /// Remove the files behind an index record
    async fn remove_files(&self, data_path: &Path) {
        let meta_path = data_path.with_extension("meta");
        // Meta first: a data file without metadata is ignored on rebuild
        if let Err(e) = fs::remove_file(&meta_path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %meta_path.display(), error = %e, "Failed to remove cache metadata");
            }
        }
        if let Err(e) = fs::remove_file(data_path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %data_path.display(), error = %e, "Failed to remove cache data");
            }
        }
    }

    /// Remove every indexed entry matching `predicate`
    async fn remove_where<F>(&self, predicate: F) -> u64
    where
        F: Fn(&IndexEntry) -> bool,
    {
        let removed: Vec<PathBuf> = {
            let mut index = self.index.write();
            let keys: Vec<String> = index
                .iter()
                .filter(|(_, record)| predicate(record))
                .map(|(k, _)| k.clone())
                .collect();
            keys.iter()
                .filter_map(|k| index.remove(k).map(|record| record.path))
                .collect()
        };

        for path in &removed {
            self.remove_files(path).await;
        }
        removed.len() as u64
    }
}

async fn read_metadata(meta_path: &Path) -> Option<StoredMetadata> {
    let json = fs::read_to_string(meta_path).await.ok()?;
    serde_json::from_str(&json).ok()
}

#[async_trait]
impl TierStorage for LocalStorage {
    fn tier(&self) -> CacheTier {
        CacheTier::Local
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<StoredEntry>> {
        let data_path = {
            let index = self.index.read();
            match index.get(&key.to_storage_key()) {
                Some(record) => record.path.clone(),
                None => return Ok(None),
            }
        };

        let Some(metadata) = read_metadata(&data_path.with_extension("meta")).await else {
            return Ok(None);
        };

        let data = match fs::read(&data_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        Ok(Some(CacheEntry {
            key: metadata.key.clone(),
            value: Bytes::from(data),
            created_at: metadata.created_at,
            ttl: metadata.ttl(),
        }))
    }

    async fn put(&self, entry: StoredEntry) -> Result<()> {
        let data_path = self.get_file_path(&entry.key);
        let meta_path = data_path.with_extension("meta");

        if let Some(parent) = data_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = fs::File::create(&data_path).await?;
        file.write_all(&entry.value).await?;
        if self.sync_writes {
            file.sync_all().await?;
        }

        let metadata = StoredMetadata {
            key: entry.key.clone(),
            created_at: entry.created_at,
            ttl_ms: entry.ttl.map(|ttl| ttl.as_millis() as u64),
            size: entry.size(),
        };
        fs::write(&meta_path, serde_json::to_vec(&metadata)?).await?;

        self.index.write().insert(
            entry.key.to_storage_key(),
            IndexEntry {
                path: data_path,
                size: metadata.size,
                created_at: metadata.created_at,
                ttl: metadata.ttl(),
                key: metadata.key,
            },
        );

        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool> {
        let removed = self.index.write().remove(&key.to_storage_key());
        match removed {
            Some(record) => {
                self.remove_files(&record.path).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn remove_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        Ok(self.remove_where(|record| !record.is_valid_at(now)).await)
    }

    async fn clear_namespace(&self, namespace: &str) -> Result<u64> {
        Ok(self
            .remove_where(|record| record.key.namespace == namespace)
            .await)
    }

    async fn entry_count(&self, namespace: &str) -> Result<u64> {
        let index = self.index.read();
        Ok(index
            .values()
            .filter(|record| record.key.namespace == namespace)
            .count() as u64)
    }

    async fn size_bytes(&self, namespace: &str) -> Result<u64> {
        let index = self.index.read();
        Ok(index
            .values()
            .filter(|record| record.key.namespace == namespace)
            .map(|record| record.size)
            .sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn test_storage() -> (LocalStorage, TempDir) {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::with_path(tmp.path()).await.unwrap();
        (storage, tmp)
    }

    fn test_entry(namespace: &str, id: &str, data: &[u8]) -> StoredEntry {
        CacheEntry::new(
            CacheKey::new(namespace, id),
            Bytes::copy_from_slice(data),
            Some(Duration::from_secs(3600)),
        )
    }

    #[tokio::test]
    async fn test_basic_operations() {
        let (storage, _tmp) = test_storage().await;

        let entry = test_entry("test", "file1", b"hello world");
        storage.put(entry.clone()).await.unwrap();

        assert_eq!(storage.entry_count("test").await.unwrap(), 1);
        assert_eq!(storage.size_bytes("test").await.unwrap(), 11);

        let key = CacheKey::new("test", "file1");
        let retrieved = storage.get(&key).await.unwrap().unwrap();
        assert_eq!(retrieved.key, key);
        assert_eq!(retrieved.value.as_ref(), b"hello world");
        assert_eq!(retrieved.created_at, entry.created_at);
        assert_eq!(retrieved.ttl, entry.ttl);

        assert!(storage.delete(&key).await.unwrap());
        assert!(!storage.delete(&key).await.unwrap());
        assert!(storage.get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_with_missing_data_file() {
        let (storage, tmp) = test_storage().await;
        let key = CacheKey::new("test", "orphan");
        storage.put(test_entry("test", "orphan", b"gone")).await.unwrap();

        let data_path = storage.get_file_path(&key);
        std::fs::remove_file(&data_path).unwrap();

        assert!(storage.delete(&key).await.unwrap());
        assert!(!data_path.with_extension("meta").exists());

        let reopened = LocalStorage::with_path(tmp.path()).await.unwrap();
        assert_eq!(reopened.entry_count("test").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_persistence() {
        let tmp = TempDir::new().unwrap();

        {
            let storage = LocalStorage::with_path(tmp.path()).await.unwrap();
            storage
                .put(test_entry("test", "persistent", b"data that persists"))
                .await
                .unwrap();
        }

        let storage = LocalStorage::with_path(tmp.path()).await.unwrap();
        assert_eq!(storage.entry_count("test").await.unwrap(), 1);

        let entry = storage
            .get(&CacheKey::new("test", "persistent"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.value.as_ref(), b"data that persists");
    }

    #[tokio::test]
    async fn test_clear_namespace_leaves_foreign_entries() {
        let (storage, tmp) = test_storage().await;

        storage.put(test_entry("ours", "a", b"1")).await.unwrap();
        storage.put(test_entry("ours", "b", b"2")).await.unwrap();
        storage.put(test_entry("theirs", "a", b"3")).await.unwrap();
        std::fs::write(tmp.path().join("unrelated.txt"), b"keep me").unwrap();

        assert_eq!(storage.clear_namespace("ours").await.unwrap(), 2);
        assert_eq!(storage.entry_count("ours").await.unwrap(), 0);
        assert_eq!(storage.entry_count("theirs").await.unwrap(), 1);
        assert!(tmp.path().join("unrelated.txt").exists());
    }

    #[tokio::test]
    async fn test_remove_expired() {
        let (storage, _tmp) = test_storage().await;

        let mut stale = test_entry("test", "stale", b"old");
        stale.ttl = Some(Duration::from_secs(1));
        stale.created_at = Utc::now() - chrono::Duration::seconds(10);
        storage.put(stale).await.unwrap();
        storage.put(test_entry("test", "fresh", b"new")).await.unwrap();

        assert_eq!(storage.remove_expired(Utc::now()).await.unwrap(), 1);
        assert!(storage
            .get(&CacheKey::new("test", "stale"))
            .await
            .unwrap()
            .is_none());
        assert_eq!(storage.entry_count("test").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_file_layout() {
        let (storage, _tmp) = test_storage().await;
        let key = CacheKey::new("test", "layout");
        let path = storage.get_file_path(&key);

        let name = path.file_name().unwrap().to_str().unwrap().to_string();
        let shard = path.parent().unwrap().file_name().unwrap().to_str().unwrap();
        assert_eq!(name.len(), 64);
        assert_eq!(shard, &name[..2]);
    }
}
