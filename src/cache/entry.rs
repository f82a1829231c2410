//! Cache Entry Types
//!
//! Defines cache keys and entries. Entries are generic over their value:
//! the memory tier holds native values, the persistent tiers hold
//! serialized bytes ([`StoredEntry`]).

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// Cache Key
// =============================================================================

/// Unique identifier for cached data
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    /// Namespace owning the entry
    pub namespace: String,
    /// Caller-visible key within the namespace
    pub id: String,
}

impl CacheKey {
    /// Create a new cache key
    pub fn new(namespace: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            id: id.into(),
        }
    }

    /// Get a string representation for storage
    pub fn to_storage_key(&self) -> String {
        format!("{}:{}", self.namespace, self.id)
    }

    /// Parse from storage key string
    pub fn from_storage_key(key: &str) -> Option<Self> {
        let (namespace, id) = key.split_once(':')?;
        if namespace.is_empty() {
            return None;
        }
        Some(Self::new(namespace, id))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_storage_key())
    }
}

// =============================================================================
// Cache Entry
// =============================================================================

/// A cached value with its freshness metadata
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// Unique key for this entry
    pub key: CacheKey,
    /// The cached value
    pub value: V,
    /// Time when the entry was created
    pub created_at: DateTime<Utc>,
    /// Time-to-live (None = never expires)
    pub ttl: Option<Duration>,
}

/// Entry as held by the persistent tiers
pub type StoredEntry = CacheEntry<Bytes>;

/// Type-erased native value held by the memory tier
pub type NativeValue = Arc<dyn Any + Send + Sync>;

impl<V> CacheEntry<V> {
    /// Create a new entry stamped with the current time
    pub fn new(key: CacheKey, value: V, ttl: Option<Duration>) -> Self {
        Self {
            key,
            value,
            created_at: Utc::now(),
            ttl,
        }
    }

    /// Instant after which the entry is no longer valid
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        expires_at(self.created_at, self.ttl?)
    }

    /// Check validity at a given instant
    ///
    /// Valid strictly before `created_at + ttl`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        valid_at(self.created_at, self.ttl, now)
    }

    /// Check validity now
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    /// Check if the entry has expired
    pub fn is_expired(&self) -> bool {
        !self.is_valid()
    }

    /// Replace the value, keeping key and freshness metadata
    pub fn with_value<U>(&self, value: U) -> CacheEntry<U> {
        CacheEntry {
            key: self.key.clone(),
            value,
            created_at: self.created_at,
            ttl: self.ttl,
        }
    }
}

fn expires_at(created_at: DateTime<Utc>, ttl: Duration) -> Option<DateTime<Utc>> {
    let ttl = chrono::Duration::from_std(ttl).ok()?;
    created_at.checked_add_signed(ttl)
}

/// Freshness check shared by entries and on-disk index records
pub(crate) fn valid_at(
    created_at: DateTime<Utc>,
    ttl: Option<Duration>,
    now: DateTime<Utc>,
) -> bool {
    match ttl {
        None => true,
        Some(ttl) => match expires_at(created_at, ttl) {
            Some(deadline) => now < deadline,
            // TTL too large to represent: treat as unbounded
            None => true,
        },
    }
}

impl StoredEntry {
    /// Stored size in bytes
    pub fn size(&self) -> u64 {
        self.value.len() as u64
    }
}
