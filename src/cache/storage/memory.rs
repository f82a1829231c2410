//! Memory Tier Storage
//!
//! In-process map of native values backed by DashMap. Never suspends.
//! Capacity is an entry count; when it is exceeded the entry with the
//! oldest `created_at` is evicted (insertion sequence breaks ties).

use crate::cache::entry::{CacheEntry, CacheKey, NativeValue};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Default memory tier capacity in entries
pub const DEFAULT_MEMORY_CAPACITY: usize = 100;

/// Entry plus its insertion sequence
#[derive(Debug, Clone)]
struct Slot {
    entry: CacheEntry<NativeValue>,
    seq: u64,
}

/// Memory tier storage
pub struct MemoryStorage {
    /// The actual storage map, keyed by storage key
    entries: DashMap<String, Slot>,
    /// Maximum entry count
    capacity: usize,
    /// Monotonic insertion counter
    seq: AtomicU64,
    /// Serializes insert-then-evict so concurrent writers never overshoot
    write_lock: Mutex<()>,
}

impl MemoryStorage {
    /// Create new memory storage with the default capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MEMORY_CAPACITY)
    }

    /// Create new memory storage holding at most `capacity` entries
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            capacity,
            seq: AtomicU64::new(0),
            write_lock: Mutex::new(()),
        }
    }

    /// Maximum entry count
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current entry count
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check if a key is present (valid or not)
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.contains_key(&key.to_storage_key())
    }

    /// Get an entry by key, expired or not
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry<NativeValue>> {
        self.entries
            .get(&key.to_storage_key())
            .map(|slot| slot.entry.clone())
    }

    /// Store an entry, evicting the oldest ones if over capacity
    ///
    /// Returns the keys evicted to make room.
    pub fn put(&self, entry: CacheEntry<NativeValue>) -> Vec<CacheKey> {
        let _guard = self.write_lock.lock();
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        self.entries
            .insert(entry.key.to_storage_key(), Slot { entry, seq });
        self.evict_over_capacity()
    }

    /// Delete an entry by key
    pub fn delete(&self, key: &CacheKey) -> bool {
        let _guard = self.write_lock.lock();
        self.entries.remove(&key.to_storage_key()).is_some()
    }

    /// Remove every entry that is no longer valid at `now`
    pub fn remove_expired(&self, now: DateTime<Utc>) -> Vec<CacheKey> {
        let _guard = self.write_lock.lock();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|slot| !slot.entry.is_valid_at(now))
            .map(|slot| slot.key().clone())
            .collect();

        expired
            .into_iter()
            .filter_map(|k| self.entries.remove(&k).map(|(_, slot)| slot.entry.key))
            .collect()
    }

    /// Evict oldest-created entries until within capacity
    pub fn enforce_capacity(&self) -> Vec<CacheKey> {
        let _guard = self.write_lock.lock();
        self.evict_over_capacity()
    }

    /// Remove everything, returning the number of entries dropped
    pub fn clear(&self) -> u64 {
        let _guard = self.write_lock.lock();
        let count = self.entries.len() as u64;
        self.entries.clear();
        count
    }

    // Caller must hold `write_lock`
    fn evict_over_capacity(&self) -> Vec<CacheKey> {
        let mut evicted = Vec::new();
        while self.entries.len() > self.capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|slot| (slot.entry.created_at, slot.seq))
                .map(|slot| slot.key().clone());

            match oldest.and_then(|k| self.entries.remove(&k)) {
                Some((_, slot)) => evicted.push(slot.entry.key),
                None => break,
            }
        }
        evicted
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("entries", &self.entries.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
