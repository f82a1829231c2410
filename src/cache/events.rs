//! Cache Events
//!
//! Events emitted by the cache engine for monitoring and observability.

use crate::cache::entry::CacheKey;
use crate::cache::tier::CacheTier;
use serde::{Deserialize, Serialize};

/// Events emitted by the cache engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CacheEvent {
    /// Entry was stored in a tier
    Put { key: String, tier: CacheTier },

    /// Cache hit
    Hit {
        key: String,
        tier: CacheTier,
        promoted: bool,
    },

    /// Cache miss (not found in any probed tier)
    Miss { key: String },

    /// Entry was deleted from all tiers
    Delete { key: String },

    /// Entry was copied into a faster tier
    Promote {
        key: String,
        from_tier: CacheTier,
        to_tier: CacheTier,
    },

    /// Entry was removed by the engine
    Evict {
        key: String,
        tier: CacheTier,
        reason: EvictionReason,
    },

    /// A tier operation failed and was swallowed
    TierFailure {
        tier: CacheTier,
        operation: String,
        error: String,
    },

    /// Namespace cleared from every tier
    Cleared { entries_removed: u64 },

    /// Expiry sweep finished
    Swept {
        expired: u64,
        evicted_for_capacity: u64,
    },
}

/// Reason for eviction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvictionReason {
    /// Memory tier capacity reached
    Capacity,
    /// Entry expired (TTL)
    Expired,
}

impl std::fmt::Display for EvictionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvictionReason::Capacity => write!(f, "capacity"),
            EvictionReason::Expired => write!(f, "expired"),
        }
    }
}

impl CacheEvent {
    /// Create a Put event
    pub fn put(key: &CacheKey, tier: CacheTier) -> Self {
        CacheEvent::Put {
            key: key.to_storage_key(),
            tier,
        }
    }

    /// Create a Hit event
    pub fn hit(key: &CacheKey, tier: CacheTier, promoted: bool) -> Self {
        CacheEvent::Hit {
            key: key.to_storage_key(),
            tier,
            promoted,
        }
    }

    /// Create a Miss event
    pub fn miss(key: &CacheKey) -> Self {
        CacheEvent::Miss {
            key: key.to_storage_key(),
        }
    }

    /// Create a Promote event
    pub fn promote(key: &CacheKey, from_tier: CacheTier, to_tier: CacheTier) -> Self {
        CacheEvent::Promote {
            key: key.to_storage_key(),
            from_tier,
            to_tier,
        }
    }

    /// Create an Evict event
    pub fn evict(key: &CacheKey, tier: CacheTier, reason: EvictionReason) -> Self {
        CacheEvent::Evict {
            key: key.to_storage_key(),
            tier,
            reason,
        }
    }

    /// Create a TierFailure event
    pub fn tier_failure(tier: CacheTier, operation: &str, error: impl ToString) -> Self {
        CacheEvent::TierFailure {
            tier,
            operation: operation.to_string(),
            error: error.to_string(),
        }
    }

    /// Key the event refers to, if any
    pub fn key(&self) -> Option<&str> {
        match self {
            CacheEvent::Put { key, .. }
            | CacheEvent::Hit { key, .. }
            | CacheEvent::Miss { key }
            | CacheEvent::Delete { key }
            | CacheEvent::Promote { key, .. }
            | CacheEvent::Evict { key, .. } => Some(key),
            CacheEvent::TierFailure { .. } | CacheEvent::Cleared { .. } | CacheEvent::Swept { .. } => {
                None
            }
        }
    }
}
