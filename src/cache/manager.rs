//! Cache Engine
//!
//! Coordinates the three tiers: read-through lookup fastest-first with
//! promotion into faster tiers, write-through saves, lazy and periodic
//! expiry, and memory-tier capacity enforcement.
//!
//! Tier I/O failures are logged, counted and broadcast as
//! [`CacheEvent::TierFailure`], never returned to the caller.

use crate::cache::entry::{CacheEntry, CacheKey, NativeValue, StoredEntry};
use crate::cache::events::{CacheEvent, EvictionReason};
use crate::cache::metrics::{CacheMetrics, CacheStats};
use crate::cache::storage::{
    DurableStorage, LocalStorage, MemoryStorage, SharedTierStorage, TierStorage,
};
use crate::cache::tier::CacheTier;
use crate::config::{CacheConfig, ResilienceConfig};
use crate::db::Database;
use crate::error::{Error, Result};
use bytes::Bytes;
use chrono::Utc;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

// =============================================================================
// Configuration
// =============================================================================

/// Runtime configuration for the cache engine
#[derive(Debug, Clone)]
pub struct CacheEngineConfig {
    /// Namespace every key is scoped to
    pub namespace: String,
    /// TTL applied by [`Ttl::Default`]
    pub default_ttl: Duration,
    /// Memory tier capacity in entries
    pub memory_capacity: usize,
    /// Period of the background expiry sweep
    pub cleanup_interval: Duration,
    /// Event channel capacity
    pub event_channel_capacity: usize,
}

impl Default for CacheEngineConfig {
    fn default() -> Self {
        Self::from(&CacheConfig::default())
    }
}

impl From<&CacheConfig> for CacheEngineConfig {
    fn from(config: &CacheConfig) -> Self {
        Self {
            namespace: config.namespace.clone(),
            default_ttl: config.default_ttl(),
            memory_capacity: config.memory_capacity,
            cleanup_interval: config.cleanup_interval(),
            event_channel_capacity: config.event_channel_capacity,
        }
    }
}

// =============================================================================
// Save Options
// =============================================================================

/// Time-to-live requested for a save
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Ttl {
    /// Engine default (one hour unless configured)
    #[default]
    Default,
    /// Never expires
    Never,
    /// Expires after the given duration
    After(Duration),
}

/// Options for [`CacheEngine::save`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveOptions {
    pub ttl: Ttl,
    /// Slowest tier written; every faster tier is written too
    pub ceiling: CacheTier,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            ttl: Ttl::Default,
            ceiling: CacheTier::ALL,
        }
    }
}

impl SaveOptions {
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Ttl::After(ttl);
        self
    }

    pub fn never_expire(mut self) -> Self {
        self.ttl = Ttl::Never;
        self
    }

    pub fn ceiling(mut self, ceiling: CacheTier) -> Self {
        self.ceiling = ceiling;
        self
    }
}

/// Outcome of one expiry sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Expired entries removed across all tiers
    pub expired: u64,
    /// Memory entries evicted to get back under capacity
    pub evicted_for_capacity: u64,
}

// =============================================================================
// Cache Engine
// =============================================================================

/// Three-tier read-through/write-through cache
pub struct CacheEngine {
    config: CacheEngineConfig,
    /// Memory tier
    memory: MemoryStorage,
    /// Local tier
    local: SharedTierStorage,
    /// Durable tier
    durable: SharedTierStorage,
    /// Metrics
    metrics: CacheMetrics,
    /// Event broadcaster
    event_tx: broadcast::Sender<CacheEvent>,
    /// Stops the cleanup task
    shutdown: CancellationToken,
    /// Background cleanup task, if started
    cleanup_task: Mutex<Option<JoinHandle<()>>>,
}

impl CacheEngine {
    /// Open the engine over the configured data directory
    ///
    /// The durable tier shares `db` with the offline queue.
    pub async fn open(config: &ResilienceConfig, db: Database) -> Result<Arc<Self>> {
        let local = LocalStorage::with_path(config.local_cache_dir()).await?;
        Ok(Self::with_storages(
            CacheEngineConfig::from(&config.cache),
            Arc::new(local),
            Arc::new(DurableStorage::new(db)),
        ))
    }

    /// Create an engine over explicit persistent tiers
    pub fn with_storages(
        config: CacheEngineConfig,
        local: SharedTierStorage,
        durable: SharedTierStorage,
    ) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(config.event_channel_capacity.max(1));

        info!(
            namespace = %config.namespace,
            memory_capacity = config.memory_capacity,
            "Cache engine initialized"
        );

        Arc::new(Self {
            memory: MemoryStorage::with_capacity(config.memory_capacity),
            local,
            durable,
            metrics: CacheMetrics::new(),
            event_tx,
            shutdown: CancellationToken::new(),
            cleanup_task: Mutex::new(None),
            config,
        })
    }

    /// Namespace this engine owns
    pub fn namespace(&self) -> &str {
        &self.config.namespace
    }

    /// Scope a caller key to this engine's namespace
    pub fn key(&self, id: &str) -> CacheKey {
        CacheKey::new(self.config.namespace.as_str(), id)
    }

    /// Subscribe to cache events
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.event_tx.subscribe()
    }

    /// Emit a cache event
    fn emit_event(&self, event: CacheEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Get storage for a persistent tier
    fn persistent(&self, tier: CacheTier) -> Option<&dyn TierStorage> {
        match tier {
            CacheTier::Memory => None,
            CacheTier::Local => Some(self.local.as_ref()),
            CacheTier::Durable => Some(self.durable.as_ref()),
        }
    }

    /// Record a swallowed tier failure
    fn tier_failed(&self, tier: CacheTier, operation: &str, err: &Error) {
        warn!(tier = %tier, operation, error = %err, "Cache tier operation failed");
        self.metrics.tier(tier).record_failure();
        self.emit_event(CacheEvent::tier_failure(tier, operation, err));
    }

    fn resolve_ttl(&self, ttl: Ttl) -> Option<Duration> {
        match ttl {
            Ttl::Default => Some(self.config.default_ttl),
            Ttl::Never => None,
            Ttl::After(d) => Some(d),
        }
    }

    fn record_evictions(&self, keys: Vec<CacheKey>, reason: EvictionReason) -> u64 {
        let count = keys.len() as u64;
        if count == 0 {
            return 0;
        }
        self.metrics.memory.record_evictions(count);
        for key in keys {
            debug!(key = %key, reason = %reason, "Evicted memory entry");
            self.emit_event(CacheEvent::evict(&key, CacheTier::Memory, reason));
        }
        count
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Look up `id`, probing tiers fastest-first up to `ceiling`
    ///
    /// A hit in a slower tier is written into every faster tier before
    /// returning. Expired entries met on the way are deleted.
    pub async fn get<V>(&self, id: &str, ceiling: CacheTier) -> Option<V>
    where
        V: DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let key = self.key(id);
        let now = Utc::now();

        for tier in ceiling.up_to() {
            let tier = *tier;

            if tier == CacheTier::Memory {
                match self.memory.get(&key) {
                    Some(entry) if !entry.is_valid_at(now) => {
                        if self.memory.delete(&key) {
                            self.record_evictions(vec![key.clone()], EvictionReason::Expired);
                        }
                    }
                    Some(entry) => {
                        if let Some(value) = entry.value.downcast_ref::<V>() {
                            self.metrics.memory.record_hit();
                            self.emit_event(CacheEvent::hit(&key, tier, false));
                            return Some(value.clone());
                        }
                        debug!(key = %key, "Memory entry holds a different type");
                    }
                    None => {}
                }
                self.metrics.memory.record_miss();
                continue;
            }

            let Some(storage) = self.persistent(tier) else {
                continue;
            };

            let entry = match storage.get(&key).await {
                Ok(Some(entry)) => entry,
                Ok(None) => {
                    self.metrics.tier(tier).record_miss();
                    continue;
                }
                Err(e) => {
                    self.tier_failed(tier, "get", &e);
                    continue;
                }
            };

            if !entry.is_valid_at(now) {
                self.metrics.tier(tier).record_miss();
                match storage.delete(&key).await {
                    Ok(_) => {
                        self.metrics.tier(tier).record_evictions(1);
                        self.emit_event(CacheEvent::evict(&key, tier, EvictionReason::Expired));
                    }
                    Err(e) => self.tier_failed(tier, "delete", &e),
                }
                continue;
            }

            let value: V = match serde_json::from_slice(&entry.value) {
                Ok(value) => value,
                Err(e) => {
                    warn!(key = %key, tier = %tier, error = %e, "Cached value does not decode");
                    self.metrics.tier(tier).record_miss();
                    continue;
                }
            };

            self.metrics.tier(tier).record_hit();
            let promoted = self.promote(&entry, &value, tier).await;
            self.emit_event(CacheEvent::hit(&key, tier, promoted));
            return Some(value);
        }

        self.metrics.record_lookup_miss();
        self.emit_event(CacheEvent::miss(&key));
        None
    }

    /// Copy an entry found in `found_in` into every faster tier
    ///
    /// Keeps the original `created_at` and TTL so promotion never extends
    /// an entry's life.
    async fn promote<V>(&self, entry: &StoredEntry, value: &V, found_in: CacheTier) -> bool
    where
        V: Clone + Send + Sync + 'static,
    {
        let mut promoted = false;

        for target in found_in.faster_tiers() {
            let target = *target;
            let written = match target {
                CacheTier::Memory => {
                    let native: NativeValue = Arc::new(value.clone());
                    let evicted = self.memory.put(entry.with_value(native));
                    self.record_evictions(evicted, EvictionReason::Capacity);
                    true
                }
                tier => match self.persistent(tier) {
                    Some(storage) => match storage.put(entry.clone()).await {
                        Ok(()) => true,
                        Err(e) => {
                            self.tier_failed(tier, "promote", &e);
                            false
                        }
                    },
                    None => false,
                },
            };

            if written {
                promoted = true;
                self.metrics.tier(target).record_promotion();
                self.emit_event(CacheEvent::promote(&entry.key, found_in, target));
                debug!(key = %entry.key, from = %found_in, to = %target, "Promoted cache entry");
            }
        }

        promoted
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Write `value` into every tier up to `options.ceiling`
    ///
    /// Each tier is written independently. Returns true only if every
    /// requested tier accepted the write.
    pub async fn save<V>(&self, id: &str, value: V, options: SaveOptions) -> bool
    where
        V: Serialize + Send + Sync + 'static,
    {
        let key = self.key(id);
        let ttl = self.resolve_ttl(options.ttl);
        let tiers = options.ceiling.up_to();

        let bytes = if options.ceiling.is_persistent() {
            match serde_json::to_vec(&value) {
                Ok(bytes) => Some(Bytes::from(bytes)),
                Err(e) => {
                    warn!(key = %key, error = %e, "Value cannot be serialized for persistent tiers");
                    None
                }
            }
        } else {
            None
        };

        let native: NativeValue = Arc::new(value);
        let entry = CacheEntry::new(key.clone(), native, ttl);
        let mut all_ok = true;

        for tier in tiers {
            let tier = *tier;
            match tier {
                CacheTier::Memory => {
                    let evicted = self.memory.put(entry.clone());
                    self.record_evictions(evicted, EvictionReason::Capacity);
                    self.emit_event(CacheEvent::put(&key, tier));
                }
                tier => {
                    let (Some(storage), Some(bytes)) = (self.persistent(tier), bytes.as_ref())
                    else {
                        all_ok = false;
                        continue;
                    };
                    match storage.put(entry.with_value(bytes.clone())).await {
                        Ok(()) => self.emit_event(CacheEvent::put(&key, tier)),
                        Err(e) => {
                            self.tier_failed(tier, "put", &e);
                            all_ok = false;
                        }
                    }
                }
            }
        }

        debug!(key = %key, ceiling = %options.ceiling, ok = all_ok, "Saved cache entry");
        all_ok
    }

    /// Remove `id` from every tier
    ///
    /// Returns true if any tier held it.
    pub async fn delete(&self, id: &str) -> bool {
        let key = self.key(id);
        let mut existed = self.memory.delete(&key);

        for tier in [CacheTier::Local, CacheTier::Durable] {
            if let Some(storage) = self.persistent(tier) {
                match storage.delete(&key).await {
                    Ok(found) => existed |= found,
                    Err(e) => self.tier_failed(tier, "delete", &e),
                }
            }
        }

        if existed {
            self.emit_event(CacheEvent::Delete {
                key: key.to_storage_key(),
            });
        }
        existed
    }

    /// Remove every entry of this engine's namespace from every tier
    ///
    /// Entries of other namespaces in the persistent tiers are untouched.
    pub async fn clear(&self) -> u64 {
        let mut removed = self.memory.clear();

        for tier in [CacheTier::Local, CacheTier::Durable] {
            if let Some(storage) = self.persistent(tier) {
                match storage.clear_namespace(&self.config.namespace).await {
                    Ok(count) => removed += count,
                    Err(e) => self.tier_failed(tier, "clear", &e),
                }
            }
        }

        self.emit_event(CacheEvent::Cleared {
            entries_removed: removed,
        });
        info!(namespace = %self.config.namespace, entries = removed, "Cleared cache namespace");
        removed
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Remove invalid entries from every tier and enforce memory capacity
    pub async fn cleanup_expired(&self) -> SweepReport {
        let now = Utc::now();

        let mut expired =
            self.record_evictions(self.memory.remove_expired(now), EvictionReason::Expired);
        let evicted_for_capacity =
            self.record_evictions(self.memory.enforce_capacity(), EvictionReason::Capacity);

        for tier in [CacheTier::Local, CacheTier::Durable] {
            if let Some(storage) = self.persistent(tier) {
                match storage.remove_expired(now).await {
                    Ok(count) => {
                        if count > 0 {
                            self.metrics.tier(tier).record_evictions(count);
                        }
                        expired += count;
                    }
                    Err(e) => self.tier_failed(tier, "cleanup", &e),
                }
            }
        }

        let report = SweepReport {
            expired,
            evicted_for_capacity,
        };
        self.emit_event(CacheEvent::Swept {
            expired,
            evicted_for_capacity,
        });
        debug!(expired, evicted_for_capacity, "Cache sweep finished");
        report
    }

    /// Read-only snapshot of tier occupancy and counters
    pub async fn stats(&self) -> CacheStats {
        let mut stats = CacheStats {
            counters: self.metrics.counters(),
            lookups_missed: self.metrics.lookups_missed.load(Ordering::Relaxed),
            ..Default::default()
        };
        stats
            .entries_per_tier
            .insert(CacheTier::Memory, self.memory.len() as u64);

        for tier in [CacheTier::Local, CacheTier::Durable] {
            if let Some(storage) = self.persistent(tier) {
                let count = match storage.entry_count(&self.config.namespace).await {
                    Ok(count) => count,
                    Err(e) => {
                        warn!(tier = %tier, error = %e, "Entry count unavailable");
                        0
                    }
                };
                stats.entries_per_tier.insert(tier, count);
            }
        }

        stats.durable_bytes = match self.durable.size_bytes(&self.config.namespace).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "Durable size unavailable");
                0
            }
        };

        stats
    }

    /// Spawn the periodic expiry sweep
    ///
    /// Calling it again while the sweep is running has no effect.
    pub fn start_cleanup(self: &Arc<Self>) {
        let mut slot = self.cleanup_task.lock();
        if slot.is_some() {
            return;
        }

        let engine = Arc::clone(self);
        let token = self.shutdown.clone();
        let period = self.config.cleanup_interval;

        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        engine.cleanup_expired().await;
                    }
                }
            }
            debug!("Cache cleanup task stopped");
        }));
    }

    /// Stop the cleanup task and wait for it to finish
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let task = self.cleanup_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!(error = %e, "Cache cleanup task failed");
            }
        }
        info!(namespace = %self.config.namespace, "Cache engine stopped");
    }
}

impl std::fmt::Debug for CacheEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEngine")
            .field("config", &self.config)
            .field("memory", &self.memory)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::storage::testing::FailingStorage;
    use assert_matches::assert_matches;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Profile {
        name: String,
        score: u32,
    }

    fn profile(name: &str) -> Profile {
        Profile {
            name: name.to_string(),
            score: 7,
        }
    }

    struct Harness {
        engine: Arc<CacheEngine>,
        local: Arc<LocalStorage>,
        durable: Arc<DurableStorage>,
        _tmp: TempDir,
    }

    async fn harness_with(config: CacheEngineConfig) -> Harness {
        let tmp = TempDir::new().unwrap();
        let local = Arc::new(LocalStorage::with_path(tmp.path()).await.unwrap());
        let durable = Arc::new(DurableStorage::new(Database::open_in_memory().unwrap()));
        let engine = CacheEngine::with_storages(config, local.clone(), durable.clone());
        Harness {
            engine,
            local,
            durable,
            _tmp: tmp,
        }
    }

    async fn harness() -> Harness {
        harness_with(CacheEngineConfig::default()).await
    }

    #[tokio::test]
    async fn test_save_and_get_all_tiers() {
        let h = harness().await;

        assert!(h.engine.save("user", profile("ada"), SaveOptions::default()).await);

        assert_eq!(
            h.engine.get::<Profile>("user", CacheTier::ALL).await,
            Some(profile("ada"))
        );
        let stats = h.engine.stats().await;
        assert_eq!(stats.entries(CacheTier::Memory), 1);
        assert_eq!(stats.entries(CacheTier::Local), 1);
        assert_eq!(stats.entries(CacheTier::Durable), 1);
        assert!(stats.durable_bytes > 0);
        assert_eq!(stats.counters[&CacheTier::Memory].hits, 1);
    }

    #[tokio::test]
    async fn test_missing_key_is_none() {
        let h = harness().await;
        assert_eq!(h.engine.get::<Profile>("absent", CacheTier::ALL).await, None);
        assert_eq!(h.engine.stats().await.lookups_missed, 1);
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let h = harness().await;
        let options = SaveOptions::default().ttl(Duration::from_millis(150));

        assert!(h.engine.save("short", 42u32, options).await);
        assert_eq!(h.engine.get::<u32>("short", CacheTier::ALL).await, Some(42));

        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(h.engine.get::<u32>("short", CacheTier::ALL).await, None);
        // Lazily deleted from every tier on the way
        let stats = h.engine.stats().await;
        assert_eq!(stats.entries(CacheTier::Memory), 0);
        assert_eq!(stats.entries(CacheTier::Local), 0);
        assert_eq!(stats.entries(CacheTier::Durable), 0);
    }

    #[tokio::test]
    async fn test_promotion_from_durable() {
        let h = harness().await;
        let key = h.engine.key("cold");
        let bytes = serde_json::to_vec(&profile("grace")).unwrap();
        h.durable
            .put(CacheEntry::new(key.clone(), Bytes::from(bytes), None))
            .await
            .unwrap();

        let mut events = h.engine.subscribe();

        assert_eq!(
            h.engine.get::<Profile>("cold", CacheTier::ALL).await,
            Some(profile("grace"))
        );
        // Now answered by the memory tier alone
        assert_eq!(
            h.engine.get::<Profile>("cold", CacheTier::Memory).await,
            Some(profile("grace"))
        );
        assert!(h.local.get(&key).await.unwrap().is_some());

        let mut promotions = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let CacheEvent::Promote { to_tier, .. } = event {
                promotions.push(to_tier);
            }
        }
        assert_eq!(promotions, vec![CacheTier::Memory, CacheTier::Local]);
    }

    #[tokio::test]
    async fn test_promotion_keeps_created_at() {
        let h = harness().await;
        let key = h.engine.key("aging");
        let mut entry = CacheEntry::new(
            key.clone(),
            Bytes::from_static(b"1"),
            Some(Duration::from_secs(60)),
        );
        // The durable tier keeps microsecond precision
        let aged = Utc::now() - chrono::Duration::seconds(30);
        entry.created_at =
            chrono::DateTime::from_timestamp_micros(aged.timestamp_micros()).unwrap();
        h.durable.put(entry.clone()).await.unwrap();

        assert_eq!(h.engine.get::<u8>("aging", CacheTier::ALL).await, Some(1));

        let local = h.local.get(&key).await.unwrap().unwrap();
        assert_eq!(local.created_at, entry.created_at);
        assert_eq!(local.ttl, entry.ttl);
    }

    #[tokio::test]
    async fn test_memory_capacity_eviction() {
        let h = harness().await;
        let memory_only = SaveOptions::default().ceiling(CacheTier::Memory);

        for i in 0..101 {
            assert!(h.engine.save(&format!("k{}", i), i, memory_only).await);
        }

        let stats = h.engine.stats().await;
        assert_eq!(stats.entries(CacheTier::Memory), 100);
        assert_eq!(h.engine.get::<i32>("k0", CacheTier::Memory).await, None);
        assert_eq!(h.engine.get::<i32>("k1", CacheTier::Memory).await, Some(1));
        assert_eq!(h.engine.get::<i32>("k100", CacheTier::Memory).await, Some(100));
    }

    #[tokio::test]
    async fn test_type_mismatch_is_a_miss() {
        let h = harness().await;
        let memory_only = SaveOptions::default().ceiling(CacheTier::Memory);
        assert!(h.engine.save("n", 5u32, memory_only).await);

        assert_eq!(h.engine.get::<String>("n", CacheTier::Memory).await, None);
        assert_eq!(h.engine.get::<u32>("n", CacheTier::Memory).await, Some(5));
    }

    #[tokio::test]
    async fn test_durable_failure_is_swallowed() {
        let tmp = TempDir::new().unwrap();
        let local = Arc::new(LocalStorage::with_path(tmp.path()).await.unwrap());
        let engine = CacheEngine::with_storages(
            CacheEngineConfig::default(),
            local,
            FailingStorage::shared(CacheTier::Durable),
        );
        let mut events = engine.subscribe();

        assert!(!engine.save("doc", profile("lin"), SaveOptions::default()).await);
        assert_eq!(
            engine.get::<Profile>("doc", CacheTier::ALL).await,
            Some(profile("lin"))
        );

        let mut failure = None;
        while let Ok(event) = events.try_recv() {
            if let CacheEvent::TierFailure { tier, .. } = event {
                failure = Some(tier);
            }
        }
        assert_matches!(failure, Some(CacheTier::Durable));

        let stats = engine.stats().await;
        assert_eq!(stats.entries(CacheTier::Durable), 0);
        assert_eq!(stats.counters[&CacheTier::Durable].failures, 1);
    }

    #[tokio::test]
    async fn test_delete_removes_every_tier() {
        let h = harness().await;
        h.engine.save("gone", 1u8, SaveOptions::default()).await;

        assert!(h.engine.delete("gone").await);
        assert!(!h.engine.delete("gone").await);
        assert_eq!(h.engine.get::<u8>("gone", CacheTier::ALL).await, None);
    }

    #[tokio::test]
    async fn test_clear_is_namespace_scoped() {
        let h = harness().await;
        h.engine.save("a", 1u8, SaveOptions::default()).await;
        h.engine.save("b", 2u8, SaveOptions::default()).await;

        let foreign = CacheKey::new("someone-else", "a");
        h.durable
            .put(CacheEntry::new(foreign.clone(), Bytes::from_static(b"9"), None))
            .await
            .unwrap();
        h.local
            .put(CacheEntry::new(foreign.clone(), Bytes::from_static(b"9"), None))
            .await
            .unwrap();

        assert_eq!(h.engine.clear().await, 6);
        assert!(h.durable.get(&foreign).await.unwrap().is_some());
        assert!(h.local.get(&foreign).await.unwrap().is_some());
        assert_eq!(h.engine.get::<u8>("a", CacheTier::ALL).await, None);
    }

    #[tokio::test]
    async fn test_cleanup_expired_sweeps_all_tiers() {
        let h = harness().await;
        h.engine
            .save("stale", 1u8, SaveOptions::default().ttl(Duration::from_millis(50)))
            .await;
        h.engine
            .save("fresh", 2u8, SaveOptions::default().never_expire())
            .await;

        tokio::time::sleep(Duration::from_millis(120)).await;

        let report = h.engine.cleanup_expired().await;
        assert_eq!(report.expired, 3);
        assert_eq!(report.evicted_for_capacity, 0);
        assert_eq!(h.engine.stats().await.entries(CacheTier::Durable), 1);
    }

    #[tokio::test]
    async fn test_background_cleanup_and_shutdown() {
        let h = harness_with(CacheEngineConfig {
            cleanup_interval: Duration::from_millis(40),
            ..Default::default()
        })
        .await;
        h.engine
            .save("stale", 1u8, SaveOptions::default().ttl(Duration::from_millis(20)))
            .await;

        h.engine.start_cleanup();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let stats = h.engine.stats().await;
        assert_eq!(stats.entries(CacheTier::Memory), 0);
        assert_eq!(stats.entries(CacheTier::Durable), 0);

        tokio_test::assert_ok!(
            tokio::time::timeout(Duration::from_secs(1), h.engine.shutdown()).await
        );
    }
}
