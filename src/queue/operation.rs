//! Pending operation model

use crate::network::{ApiRequest, HttpMethod};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

const OTHER_KIND_PREFIX: &str = "other:";

/// What a pending operation does
///
/// Ordering is only guaranteed between operations of the same kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Document ingestion
    Ingest,
    /// Chat message send
    Message,
    /// Any other mutation, grouped by name
    Other(String),
}

impl OperationKind {
    pub fn as_str(&self) -> &str {
        match self {
            OperationKind::Ingest => "ingest",
            OperationKind::Message => "message",
            OperationKind::Other(name) => name,
        }
    }

    /// Name persisted in the queue table
    ///
    /// Custom kinds carry an `other:` prefix so a custom kind named like a
    /// built-in one reloads unchanged.
    pub fn storage_name(&self) -> String {
        match self {
            OperationKind::Other(name) => format!("{}{}", OTHER_KIND_PREFIX, name),
            builtin => builtin.as_str().to_string(),
        }
    }

    pub fn from_name(name: &str) -> Self {
        if let Some(custom) = name.strip_prefix(OTHER_KIND_PREFIX) {
            return OperationKind::Other(custom.to_string());
        }
        match name {
            "ingest" => OperationKind::Ingest,
            "message" => OperationKind::Message,
            other => OperationKind::Other(other.to_string()),
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery state of a pending operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// Waiting for the next drain
    Pending,
    /// Being delivered right now
    InFlight,
    /// Delivered and confirmed
    Synced,
    /// Gave up; needs retry or discard from the caller
    Failed,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Pending => "pending",
            SyncState::InFlight => "in_flight",
            SyncState::Synced => "synced",
            SyncState::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(SyncState::Pending),
            "in_flight" => Some(SyncState::InFlight),
            "synced" => Some(SyncState::Synced),
            "failed" => Some(SyncState::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A mutation waiting to reach the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOperation {
    pub id: Uuid,
    pub kind: OperationKind,
    pub method: HttpMethod,
    pub path: String,
    pub payload: serde_json::Value,
    /// Cache ids deleted once the operation is synced
    #[serde(default)]
    pub invalidates: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub sync_state: SyncState,
}

impl PendingOperation {
    pub fn new(
        kind: OperationKind,
        method: HttpMethod,
        path: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            method,
            path: path.into(),
            payload,
            invalidates: Vec::new(),
            created_at: Utc::now(),
            attempts: 0,
            last_error: None,
            sync_state: SyncState::Pending,
        }
    }

    /// Delete `id` from the cache once this operation syncs
    pub fn invalidating(mut self, id: impl Into<String>) -> Self {
        self.invalidates.push(id.into());
        self
    }

    /// The HTTP request that delivers this operation
    pub fn to_request(&self) -> ApiRequest {
        let body = if self.payload.is_null() {
            None
        } else {
            Some(self.payload.clone())
        };
        ApiRequest {
            method: self.method,
            path: self.path.clone(),
            query: Vec::new(),
            body,
        }
    }
}

/// Entry of the bounded synced history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncedRecord {
    pub id: Uuid,
    pub kind: OperationKind,
    pub attempts: u32,
    pub synced_at: DateTime<Utc>,
}
