//! Error types for the client resilience layer
//!
//! Two families live here:
//! - [`Error`]: failures of the layer itself (storage, configuration, crypto).
//! - [`NetworkError`]: the closed taxonomy surfaced to callers of the
//!   network client, so they branch on [`ErrorKind`] instead of raw status codes.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Unified error type for the layer
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Storage Errors
    // =========================================================================
    #[error("Storage error in {tier}: {reason}")]
    Storage { tier: String, reason: String },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Pending operation not found: {id}")]
    OperationNotFound { id: String },

    #[error("Invalid operation state: {id} is {state}, expected {expected}")]
    InvalidOperationState {
        id: String,
        state: String,
        expected: String,
    },

    // =========================================================================
    // Credential Errors
    // =========================================================================
    #[error("Crypto error: {0}")]
    Crypto(String),

    // =========================================================================
    // Network Errors
    // =========================================================================
    #[error(transparent)]
    Network(#[from] NetworkError),

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build a storage error for a named tier
    pub fn storage(tier: impl fmt::Display, reason: impl fmt::Display) -> Self {
        Error::Storage {
            tier: tier.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Result type alias for the layer
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Network Error Taxonomy
// =============================================================================

/// Closed taxonomy of network failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    /// No connectivity (DNS, refused connection, reset)
    #[error("Network unreachable: {0}")]
    Network(String),

    /// Connect, send or receive deadline exceeded
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// 401 that survived the refresh attempt
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Any other 4xx
    #[error("Bad request ({status}): {message}")]
    BadRequest { status: u16, message: String },

    #[error("Rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Server error ({status}): {message}")]
    ServerError { status: u16, message: String },

    #[error("Response parse error: {0}")]
    ParseError(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Unknown network error: {0}")]
    Unknown(String),
}

/// Discriminant of [`NetworkError`] for branching without payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Network,
    Timeout,
    Unauthorized,
    Forbidden,
    NotFound,
    BadRequest,
    RateLimited,
    ServerError,
    ParseError,
    Cancelled,
    Unknown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Network => "network",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::NotFound => "not_found",
            ErrorKind::BadRequest => "bad_request",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::ServerError => "server_error",
            ErrorKind::ParseError => "parse_error",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Unknown => "unknown",
        };
        write!(f, "{}", name)
    }
}

/// What a caller-facing method does with a failed call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Retry in place with backoff
    Retry,
    /// Persist the mutation into the offline queue
    QueueOffline,
    /// Return the error unmodified
    Surface,
}

impl NetworkError {
    /// Get the kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            NetworkError::Network(_) => ErrorKind::Network,
            NetworkError::Timeout(_) => ErrorKind::Timeout,
            NetworkError::Unauthorized(_) => ErrorKind::Unauthorized,
            NetworkError::Forbidden(_) => ErrorKind::Forbidden,
            NetworkError::NotFound(_) => ErrorKind::NotFound,
            NetworkError::BadRequest { .. } => ErrorKind::BadRequest,
            NetworkError::RateLimited { .. } => ErrorKind::RateLimited,
            NetworkError::ServerError { .. } => ErrorKind::ServerError,
            NetworkError::ParseError(_) => ErrorKind::ParseError,
            NetworkError::Cancelled => ErrorKind::Cancelled,
            NetworkError::Unknown(_) => ErrorKind::Unknown,
        }
    }

    /// Check if the request may be retried in place
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            NetworkError::Network(_)
                | NetworkError::Timeout(_)
                | NetworkError::ServerError { .. }
                | NetworkError::RateLimited { .. }
        )
    }

    /// Check if the failure may clear up later without caller intervention
    pub fn is_connectivity(&self) -> bool {
        self.is_retryable()
    }

    /// Check if the failure means the network itself is unreachable
    pub fn is_offline(&self) -> bool {
        matches!(self, NetworkError::Network(_) | NetworkError::Timeout(_))
    }

    /// Determine what to do with this error
    ///
    /// Connectivity-class errors on mutating calls are queued; everything
    /// else, and any error on a read, is surfaced.
    pub fn recovery(&self, mutating: bool) -> Recovery {
        match self {
            NetworkError::Cancelled => Recovery::Surface,
            e if e.is_connectivity() && mutating => Recovery::QueueOffline,
            _ => Recovery::Surface,
        }
    }

    /// Server-provided delay hint
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            NetworkError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// HTTP status this error was derived from, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            NetworkError::Unauthorized(_) => Some(401),
            NetworkError::Forbidden(_) => Some(403),
            NetworkError::NotFound(_) => Some(404),
            NetworkError::RateLimited { .. } => Some(429),
            NetworkError::BadRequest { status, .. } | NetworkError::ServerError { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_retryable_classes() {
        assert!(NetworkError::Network("refused".into()).is_retryable());
        assert!(NetworkError::Timeout("connect".into()).is_retryable());
        assert!(NetworkError::ServerError {
            status: 503,
            message: "unavailable".into()
        }
        .is_retryable());
        assert!(NetworkError::RateLimited { retry_after: None }.is_retryable());

        assert!(!NetworkError::Unauthorized("expired".into()).is_retryable());
        assert!(!NetworkError::BadRequest {
            status: 422,
            message: "invalid".into()
        }
        .is_retryable());
        assert!(!NetworkError::ParseError("eof".into()).is_retryable());
        assert!(!NetworkError::Cancelled.is_retryable());
    }

    #[test]
    fn test_recovery_policy() {
        let offline = NetworkError::Network("no route".into());
        assert_eq!(offline.recovery(true), Recovery::QueueOffline);
        assert_eq!(offline.recovery(false), Recovery::Surface);

        let forbidden = NetworkError::Forbidden("nope".into());
        assert_eq!(forbidden.recovery(true), Recovery::Surface);

        assert_eq!(NetworkError::Cancelled.recovery(true), Recovery::Surface);
    }

    #[test]
    fn test_kind_and_status() {
        let err = NetworkError::ServerError {
            status: 502,
            message: "bad gateway".into(),
        };
        assert_eq!(err.kind(), ErrorKind::ServerError);
        assert_eq!(err.status(), Some(502));
        assert_eq!(NetworkError::Cancelled.status(), None);
        assert_eq!(ErrorKind::RateLimited.to_string(), "rate_limited");
    }

    #[test]
    fn test_network_error_converts_into_error() {
        let err: Error = NetworkError::NotFound("/missing".into()).into();
        assert_matches!(err, Error::Network(NetworkError::NotFound(_)));
    }
}
