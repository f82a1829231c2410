//! Layer Configuration
//!
//! YAML-backed configuration for every component. Every field has a default,
//! so an empty file (or no file at all) yields a working setup.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// =============================================================================
// Top-level Configuration
// =============================================================================

/// Configuration for the whole resilience layer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Root directory for the local tier, SQLite database and credential file
    pub data_dir: Option<PathBuf>,
    /// HTTP client configuration
    pub http: HttpConfig,
    /// Retry policy for idempotent-safe failures
    pub retry: RetryConfig,
    /// Cache engine configuration
    pub cache: CacheConfig,
    /// Offline write queue configuration
    pub queue: QueueConfig,
    /// Credential store configuration
    pub credentials: CredentialConfig,
}

impl ResilienceConfig {
    /// Load configuration from a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&raw)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if !(self.http.base_url.starts_with("http://") || self.http.base_url.starts_with("https://"))
        {
            return Err(Error::Configuration(format!(
                "base_url must be http(s): {}",
                self.http.base_url
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::Configuration(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return Err(Error::Configuration(
                "retry.initial_delay_ms exceeds retry.max_delay_ms".into(),
            ));
        }
        if self.cache.memory_capacity == 0 {
            return Err(Error::Configuration(
                "cache.memory_capacity must be at least 1".into(),
            ));
        }
        if self.cache.namespace.is_empty() || self.cache.namespace.contains(':') {
            return Err(Error::Configuration(format!(
                "cache.namespace must be non-empty and contain no ':' ({:?})",
                self.cache.namespace
            )));
        }
        if self.queue.max_attempts == 0 {
            return Err(Error::Configuration(
                "queue.max_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Resolve the data directory, falling back to the platform data dir
    pub fn resolved_data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
                .unwrap_or_else(std::env::temp_dir)
                .join("client-resilience")
        })
    }

    /// Directory holding the local cache tier
    pub fn local_cache_dir(&self) -> PathBuf {
        self.resolved_data_dir().join("local-cache")
    }

    /// Path of the SQLite database (durable tier + pending operations)
    pub fn database_path(&self) -> PathBuf {
        self.resolved_data_dir().join("resilience.db")
    }

    /// Path of the encrypted credential file
    pub fn credentials_path(&self) -> PathBuf {
        self.resolved_data_dir().join("credentials.enc")
    }
}

// =============================================================================
// HTTP
// =============================================================================

/// HTTP client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Base URL every request path is joined onto
    pub base_url: String,
    /// Connection establishment timeout
    pub connect_timeout_secs: u64,
    /// Request upload timeout
    pub send_timeout_secs: u64,
    /// Response read timeout
    pub receive_timeout_secs: u64,
    /// Token refresh endpoint path
    pub refresh_path: String,
    /// User agent header
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            connect_timeout_secs: 30,
            send_timeout_secs: 30,
            receive_timeout_secs: 30,
            refresh_path: "/auth/refresh".to_string(),
            user_agent: format!("client-resilience/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl HttpConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_secs(self.receive_timeout_secs)
    }

    /// Overall per-request deadline
    pub fn request_deadline(&self) -> Duration {
        Duration::from_secs(
            self.connect_timeout_secs + self.send_timeout_secs + self.receive_timeout_secs,
        )
    }
}

// =============================================================================
// Retry
// =============================================================================

/// Retry policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum attempts including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay_ms: u64,
    /// Cap on the delay between attempts
    pub max_delay_ms: u64,
    /// Exponential growth factor
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 2_000,
            max_delay_ms: 10_000,
            multiplier: 2.0,
        }
    }
}

// =============================================================================
// Cache
// =============================================================================

/// Cache engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Namespace owned by this engine in the persistent tiers
    pub namespace: String,
    /// TTL applied when a save does not specify one
    pub default_ttl_secs: u64,
    /// Maximum entries held by the memory tier
    pub memory_capacity: usize,
    /// Interval of the expiry sweep
    pub cleanup_interval_secs: u64,
    /// Event channel capacity
    pub event_channel_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            namespace: "resilience".to_string(),
            default_ttl_secs: 3_600,
            memory_capacity: 100,
            cleanup_interval_secs: 300,
            event_channel_capacity: 1024,
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

// =============================================================================
// Offline Queue
// =============================================================================

/// Offline write queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Drain attempts before an operation is marked failed
    pub max_attempts: u32,
    /// Fallback drain interval
    pub drain_interval_secs: u64,
    /// Number of synced operations remembered for UI badges
    pub synced_history: usize,
    /// Path used by `send_message`
    pub message_path: String,
    /// Path used by `ingest_document`
    pub ingest_path: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            drain_interval_secs: 30,
            synced_history: 50,
            message_path: "/chat/messages".to_string(),
            ingest_path: "/ingest".to_string(),
        }
    }
}

impl QueueConfig {
    pub fn drain_interval(&self) -> Duration {
        Duration::from_secs(self.drain_interval_secs)
    }
}

// =============================================================================
// Credentials
// =============================================================================

/// Credential store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialConfig {
    /// Environment variable holding the hex-encoded 32-byte master key
    pub key_env: String,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            key_env: "RESILIENCE_CREDENTIAL_KEY".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_defaults() {
        let config = ResilienceConfig::default();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.initial_delay_ms, 2_000);
        assert_eq!(config.retry.max_delay_ms, 10_000);
        assert_eq!(config.cache.default_ttl(), Duration::from_secs(3600));
        assert_eq!(config.cache.memory_capacity, 100);
        assert_eq!(config.cache.cleanup_interval(), Duration::from_secs(300));
        assert_eq!(config.http.connect_timeout(), Duration::from_secs(30));
        assert_eq!(config.http.request_deadline(), Duration::from_secs(90));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml() {
        let raw = r#"
http:
  base_url: "https://api.example.com"
cache:
  memory_capacity: 10
queue:
  max_attempts: 2
"#;
        let config = ResilienceConfig::from_yaml(raw).unwrap();
        assert_eq!(config.http.base_url, "https://api.example.com");
        assert_eq!(config.http.refresh_path, "/auth/refresh");
        assert_eq!(config.cache.memory_capacity, 10);
        assert_eq!(config.cache.default_ttl_secs, 3600);
        assert_eq!(config.queue.max_attempts, 2);
    }

    #[test]
    fn test_empty_yaml_is_default() {
        let config = ResilienceConfig::from_yaml("  \n").unwrap();
        assert_eq!(config.queue.max_attempts, 5);
    }

    #[test]
    fn test_validation_errors() {
        let bad_url = "http:\n  base_url: \"ftp://x\"\n";
        assert_matches!(
            ResilienceConfig::from_yaml(bad_url),
            Err(Error::Configuration(_))
        );

        let bad_retry = "retry:\n  max_attempts: 0\n";
        assert_matches!(
            ResilienceConfig::from_yaml(bad_retry),
            Err(Error::Configuration(_))
        );

        let bad_namespace = "cache:\n  namespace: \"a:b\"\n";
        assert_matches!(
            ResilienceConfig::from_yaml(bad_namespace),
            Err(Error::Configuration(_))
        );
    }

    #[test]
    fn test_paths_follow_data_dir() {
        let config = ResilienceConfig {
            data_dir: Some(PathBuf::from("/tmp/resilience-test")),
            ..Default::default()
        };
        assert_eq!(
            config.database_path(),
            PathBuf::from("/tmp/resilience-test/resilience.db")
        );
        assert_eq!(
            config.local_cache_dir(),
            PathBuf::from("/tmp/resilience-test/local-cache")
        );
    }
}
