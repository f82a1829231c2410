//! Cache Metrics
//!
//! Cache-line aligned per-tier counters plus the read-only [`CacheStats`]
//! snapshot handed to callers.

use crate::cache::tier::CacheTier;
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Cache line size for alignment (64 bytes on most modern CPUs)
pub const CACHE_LINE_SIZE: usize = 64;

// =============================================================================
// Per-Tier Metrics (Cache-Line Aligned)
// =============================================================================

/// Counters for a single cache tier, aligned to prevent false sharing
#[repr(C, align(64))]
#[derive(Debug)]
pub struct CacheTierMetrics {
    /// Lookups answered by this tier
    pub hits: AtomicU64,
    /// Lookups this tier could not answer
    pub misses: AtomicU64,
    /// Entries copied into this tier from a slower one
    pub promotions: AtomicU64,
    /// Entries removed for capacity or expiry
    pub evictions: AtomicU64,
    /// Swallowed I/O failures
    pub failures: AtomicU64,
    /// Last update timestamp (Unix millis)
    pub last_update_ms: AtomicU64,
}

const _: () = assert!(std::mem::size_of::<CacheTierMetrics>() <= CACHE_LINE_SIZE);

impl Default for CacheTierMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheTierMetrics {
    /// Create new zeroed metrics
    pub fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            promotions: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            last_update_ms: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    #[inline]
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    #[inline]
    pub fn record_promotion(&self) {
        self.promotions.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    #[inline]
    pub fn record_evictions(&self, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
        self.touch();
    }

    #[inline]
    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    #[inline]
    fn touch(&self) {
        self.last_update_ms
            .store(Utc::now().timestamp_millis() as u64, Ordering::Release);
    }

    /// Calculate hit ratio (0.0 to 1.0)
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let total = hits + self.misses.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Create a snapshot of current counters
    pub fn snapshot(&self) -> TierCounters {
        TierCounters {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            promotions: self.promotions.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of one tier's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TierCounters {
    pub hits: u64,
    pub misses: u64,
    pub promotions: u64,
    pub evictions: u64,
    pub failures: u64,
}

// =============================================================================
// Engine Metrics
// =============================================================================

/// Counters for all tiers
#[derive(Debug, Default)]
pub struct CacheMetrics {
    pub memory: CacheTierMetrics,
    pub local: CacheTierMetrics,
    pub durable: CacheTierMetrics,
    /// Lookups that missed every probed tier
    pub lookups_missed: AtomicU64,
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get metrics for a specific tier
    pub fn tier(&self, tier: CacheTier) -> &CacheTierMetrics {
        match tier {
            CacheTier::Memory => &self.memory,
            CacheTier::Local => &self.local,
            CacheTier::Durable => &self.durable,
        }
    }

    pub fn record_lookup_miss(&self) {
        self.lookups_missed.fetch_add(1, Ordering::Relaxed);
    }

    /// Counters per tier
    pub fn counters(&self) -> BTreeMap<CacheTier, TierCounters> {
        CacheTier::lookup_order()
            .iter()
            .map(|tier| (*tier, self.tier(*tier).snapshot()))
            .collect()
    }
}

// =============================================================================
// Cache Stats
// =============================================================================

/// Read-only aggregate snapshot, computed on demand and never persisted
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    /// Entries held by each tier (own namespace only for persistent tiers)
    pub entries_per_tier: BTreeMap<CacheTier, u64>,
    /// Bytes held by the durable tier
    pub durable_bytes: u64,
    /// Hit/miss/promotion counters per tier
    pub counters: BTreeMap<CacheTier, TierCounters>,
    /// Lookups that missed every probed tier
    pub lookups_missed: u64,
}

impl CacheStats {
    /// Entry count for one tier
    pub fn entries(&self, tier: CacheTier) -> u64 {
        self.entries_per_tier.get(&tier).copied().unwrap_or(0)
    }

    /// Hits across every tier
    pub fn total_hits(&self) -> u64 {
        self.counters.values().map(|c| c.hits).sum()
    }

    /// Overall hit ratio of top-level lookups
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.total_hits();
        let total = hits + self.lookups_missed;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}
