//! Three-Tier Cache Engine
//!
//! A read-through/write-through cache over three tiers:
//! - **Memory**: in-process map of native values, bounded by entry count
//! - **Local**: small persistent key/value files with JSON sidecars
//! - **Durable**: SQLite table shared with the offline queue's database
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                             Cache Engine                                │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────────────────────┐   │
//! │  │   Memory     │  │    Local     │  │          Durable             │   │
//! │  │  (DashMap)   │  │ (file+meta)  │  │   (SQLite cache_entries)     │   │
//! │  │  native V    │  │  JSON bytes  │  │        JSON bytes            │   │
//! │  └──────────────┘  └──────────────┘  └──────────────────────────────┘   │
//! │         ▲                  ▲                       │                    │
//! │         └──── promotion ───┴───────────────────────┘                    │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │  • TTL validity checked on every read    • Oldest-created eviction      │
//! │  • Tier failures swallowed and logged    • Periodic expiry sweep        │
//! │  • Cache-line aligned metrics            • Event broadcast              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use client_resilience::cache::{CacheEngine, CacheTier, SaveOptions};
//!
//! let cache = CacheEngine::open(&config, db).await?;
//! cache.start_cleanup();
//!
//! cache.save("profile", profile, SaveOptions::default()).await;
//!
//! // Probes Memory -> Local -> Durable, promoting on a slower hit
//! let profile: Option<Profile> = cache.get("profile", CacheTier::ALL).await;
//!
//! let stats = cache.stats().await;
//! println!("Hit ratio: {:.2}%", stats.hit_ratio() * 100.0);
//! ```

pub mod entry;
pub mod events;
pub mod manager;
pub mod metrics;
pub mod storage;
pub mod tier;

// Re-export main types
pub use entry::{CacheEntry, CacheKey, NativeValue, StoredEntry};
pub use events::{CacheEvent, EvictionReason};
pub use manager::{CacheEngine, CacheEngineConfig, SaveOptions, SweepReport, Ttl};
pub use metrics::{CacheMetrics, CacheStats, CacheTierMetrics, TierCounters};
pub use storage::{
    DurableStorage, LocalStorage, LocalStorageConfig, MemoryStorage, SharedTierStorage,
    TierStorage,
};
pub use tier::CacheTier;
