//! Durable Tier Storage
//!
//! Structured storage in the shared SQLite database, table `cache_entries`.
//! `created_at` is kept as Unix microseconds, `ttl_seconds` as REAL so the
//! expiry sweep can run as a single statement.

use crate::cache::entry::{CacheEntry, CacheKey, StoredEntry};
use crate::cache::storage::TierStorage;
use crate::cache::tier::CacheTier;
use crate::db::Database;
use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use std::time::Duration;
use tracing::warn;

/// Durable tier storage
#[derive(Debug, Clone)]
pub struct DurableStorage {
    db: Database,
}

impl DurableStorage {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl TierStorage for DurableStorage {
    fn tier(&self) -> CacheTier {
        CacheTier::Durable
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<StoredEntry>> {
        let storage_key = key.to_storage_key();
        let row = self
            .db
            .call(move |conn| {
                conn.query_row(
                    "SELECT data, created_at, ttl_seconds FROM cache_entries WHERE key = ?1",
                    params![storage_key],
                    |row| {
                        Ok((
                            row.get::<_, Vec<u8>>(0)?,
                            row.get::<_, i64>(1)?,
                            row.get::<_, Option<f64>>(2)?,
                        ))
                    },
                )
                .optional()
            })
            .await?;

        let Some((data, created_us, ttl_seconds)) = row else {
            return Ok(None);
        };

        // An unreadable timestamp cannot be aged, so the row is dropped
        let Some(created_at) = DateTime::from_timestamp_micros(created_us) else {
            warn!(
                key = %key,
                created_at = created_us,
                "Dropping durable entry with invalid timestamp"
            );
            self.delete(key).await?;
            return Ok(None);
        };

        Ok(Some(CacheEntry {
            key: key.clone(),
            value: Bytes::from(data),
            created_at,
            ttl: ttl_seconds.map(|secs| Duration::from_secs_f64(secs.max(0.0))),
        }))
    }

    async fn put(&self, entry: StoredEntry) -> Result<()> {
        let size = entry.size() as i64;
        self.db
            .call(move |conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO cache_entries
                         (key, namespace, data, created_at, ttl_seconds, size)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        entry.key.to_storage_key(),
                        entry.key.namespace,
                        entry.value.as_ref(),
                        entry.created_at.timestamp_micros(),
                        entry.ttl.map(|ttl| ttl.as_secs_f64()),
                        size,
                    ],
                )
            })
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool> {
        let storage_key = key.to_storage_key();
        let changed = self
            .db
            .call(move |conn| {
                conn.execute(
                    "DELETE FROM cache_entries WHERE key = ?1",
                    params![storage_key],
                )
            })
            .await?;
        Ok(changed > 0)
    }

    async fn remove_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let now_us = now.timestamp_micros();
        let removed = self
            .db
            .call(move |conn| {
                conn.execute(
                    "DELETE FROM cache_entries
                     WHERE ttl_seconds IS NOT NULL
                       AND created_at + ttl_seconds * 1000000.0 <= ?1",
                    params![now_us],
                )
            })
            .await?;
        Ok(removed as u64)
    }

    async fn clear_namespace(&self, namespace: &str) -> Result<u64> {
        let namespace = namespace.to_string();
        let removed = self
            .db
            .call(move |conn| {
                conn.execute(
                    "DELETE FROM cache_entries WHERE namespace = ?1",
                    params![namespace],
                )
            })
            .await?;
        Ok(removed as u64)
    }

    async fn entry_count(&self, namespace: &str) -> Result<u64> {
        let namespace = namespace.to_string();
        let count: i64 = self
            .db
            .call(move |conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM cache_entries WHERE namespace = ?1",
                    params![namespace],
                    |row| row.get(0),
                )
            })
            .await?;
        Ok(count as u64)
    }

    async fn size_bytes(&self, namespace: &str) -> Result<u64> {
        let namespace = namespace.to_string();
        let size: i64 = self
            .db
            .call(move |conn| {
                conn.query_row(
                    "SELECT COALESCE(SUM(size), 0) FROM cache_entries WHERE namespace = ?1",
                    params![namespace],
                    |row| row.get(0),
                )
            })
            .await?;
        Ok(size as u64)
    }
}
