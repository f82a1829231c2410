//! Client Resilience Layer
//!
//! Tiered caching, a retrying authenticated HTTP client and a durable
//! offline write queue for applications that must keep working on a flaky
//! connection.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                            Resilience Layer                                 │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────────┐  │
//! │  │   Cache Engine  │  │  Network Client │  │     Offline Write Queue     │  │
//! │  │ Memory / Local  │◄─┤  auth, retry,   │◄─┤  FIFO per kind, coalesced   │  │
//! │  │   / Durable     │  │  classification │  │  drains, bounded attempts   │  │
//! │  └────────┬────────┘  └────────┬────────┘  └─────────────┬───────────────┘  │
//! │           │                    │                         │                  │
//! │           │           ┌────────┴────────┐                │                  │
//! │           │           │ Credential Store│                │                  │
//! │           │           │ (ChaCha20-Poly) │                │                  │
//! │           │           └─────────────────┘                │                  │
//! ├───────────┴──────────────────────────────────────────────┴──────────────────┤
//! │                   SQLite: cache_entries + pending_operations                │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`cache`]: Three-tier cache engine
//! - [`credentials`]: Encrypted credential store
//! - [`network`]: HTTP client, auth interceptor, retry policy
//! - [`queue`]: Offline write queue
//! - [`layer`]: Facade wiring everything together
//! - [`error`]: Error types and handling

pub mod cache;
pub mod config;
pub mod credentials;
pub mod db;
pub mod error;
pub mod layer;
pub mod network;
pub mod queue;
pub mod telemetry;

// Re-export commonly used types
pub use cache::{CacheEngine, CacheStats, CacheTier, SaveOptions, Ttl};

pub use config::ResilienceConfig;

pub use credentials::{Credential, CredentialStore, MasterKey, TokenKind};

pub use db::Database;

pub use error::{Error, ErrorKind, NetworkError, Recovery, Result};

pub use layer::{ResilienceLayer, WriteOutcome};

pub use network::{
    ApiRequest, ApiResponse, ConnectivityMonitor, HttpClient, HttpMethod, RetryPolicy,
    UploadRequest,
};

pub use queue::{
    DrainReport, OfflineQueue, OperationKind, PendingOperation, QueueStats, SyncState,
};

pub use telemetry::Telemetry;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
