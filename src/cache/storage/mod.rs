//! Cache Storage Backends
//!
//! Implementations for each cache tier's storage layer. The memory tier is
//! synchronous and holds native values; the persistent tiers implement
//! [`TierStorage`] over serialized bytes.

mod durable;
mod local;
mod memory;

pub use durable::DurableStorage;
pub use local::{LocalStorage, LocalStorageConfig};
pub use memory::MemoryStorage;

use crate::cache::entry::{CacheKey, StoredEntry};
use crate::cache::tier::CacheTier;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

// =============================================================================
// TierStorage Trait
// =============================================================================

/// Trait for persistent tier storage operations
///
/// Every method may suspend on I/O. Namespace-scoped methods must never
/// touch entries that belong to another namespace.
#[async_trait]
pub trait TierStorage: Send + Sync {
    /// Get the tier this storage serves
    fn tier(&self) -> CacheTier;

    /// Get an entry by key, expired or not
    async fn get(&self, key: &CacheKey) -> Result<Option<StoredEntry>>;

    /// Store an entry, replacing any previous value
    async fn put(&self, entry: StoredEntry) -> Result<()>;

    /// Delete an entry by key
    ///
    /// Returns true if the entry existed.
    async fn delete(&self, key: &CacheKey) -> Result<bool>;

    /// Remove every entry that is no longer valid at `now`
    async fn remove_expired(&self, now: DateTime<Utc>) -> Result<u64>;

    /// Remove every entry of `namespace`
    async fn clear_namespace(&self, namespace: &str) -> Result<u64>;

    /// Entry count for `namespace`
    async fn entry_count(&self, namespace: &str) -> Result<u64>;

    /// Stored bytes for `namespace`
    async fn size_bytes(&self, namespace: &str) -> Result<u64>;
}

/// Shared handle to a persistent tier
pub type SharedTierStorage = Arc<dyn TierStorage>;
