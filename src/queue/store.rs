//! Durable Queue Store
//!
//! `pending_operations` table in the shared SQLite database. Rows are read
//! back in creation order; rowid breaks ties between operations created in
//! the same millisecond.

use crate::db::Database;
use crate::error::{Error, Result};
use crate::network::HttpMethod;
use crate::queue::operation::{OperationKind, PendingOperation, SyncState};
use chrono::DateTime;
use rusqlite::{params, OptionalExtension, Row};
use tracing::info;
use uuid::Uuid;

const SELECT_COLUMNS: &str = "id, kind, method, path, payload, invalidates, created_at, \
                              attempts, last_error, sync_state";

/// Persistent store of pending operations
#[derive(Debug, Clone)]
pub struct QueueStore {
    db: Database,
}

impl QueueStore {
    /// Open the store, returning interrupted deliveries to `Pending`
    pub async fn new(db: Database) -> Result<Self> {
        let store = Self { db };
        let recovered = store.reset_in_flight().await?;
        if recovered > 0 {
            info!(recovered, "Recovered interrupted operations");
        }
        Ok(store)
    }

    /// Return every `InFlight` row to `Pending`
    ///
    /// Only valid while no delivery is running.
    pub async fn reset_in_flight(&self) -> Result<usize> {
        self.db
            .call(|conn| {
                conn.execute(
                    "UPDATE pending_operations SET sync_state = ?1 WHERE sync_state = ?2",
                    params![SyncState::Pending.as_str(), SyncState::InFlight.as_str()],
                )
            })
            .await
    }

    /// Operations still owed to the server: `Pending` plus `InFlight`
    pub async fn outstanding(&self) -> Result<u64> {
        let count: i64 = self
            .db
            .call(|conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM pending_operations WHERE sync_state IN (?1, ?2)",
                    params![SyncState::Pending.as_str(), SyncState::InFlight.as_str()],
                    |row| row.get(0),
                )
            })
            .await?;
        Ok(count as u64)
    }

    pub async fn insert(&self, op: &PendingOperation) -> Result<()> {
        let payload = serde_json::to_vec(&op.payload)?;
        let invalidates = serde_json::to_string(&op.invalidates)?;
        let op = op.clone();
        self.db
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO pending_operations
                         (id, kind, method, path, payload, invalidates, created_at,
                          attempts, last_error, sync_state)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    params![
                        op.id.to_string(),
                        op.kind.storage_name(),
                        op.method.as_str(),
                        op.path,
                        payload,
                        invalidates,
                        op.created_at.timestamp_millis(),
                        op.attempts,
                        op.last_error,
                        op.sync_state.as_str(),
                    ],
                )
            })
            .await?;
        Ok(())
    }

    pub async fn get(&self, id: &Uuid) -> Result<Option<PendingOperation>> {
        let id = id.to_string();
        let row = self
            .db
            .call(move |conn| {
                conn.query_row(
                    &format!("SELECT {} FROM pending_operations WHERE id = ?1", SELECT_COLUMNS),
                    params![id],
                    RawOperation::from_row,
                )
                .optional()
            })
            .await?;
        row.map(RawOperation::into_operation).transpose()
    }

    /// Operations in `state`, oldest first
    pub async fn list(&self, state: SyncState) -> Result<Vec<PendingOperation>> {
        let rows = self
            .db
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM pending_operations WHERE sync_state = ?1
                     ORDER BY created_at ASC, rowid ASC",
                    SELECT_COLUMNS
                ))?;
                let rows = stmt.query_map(params![state.as_str()], RawOperation::from_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()
            })
            .await?;
        rows.into_iter().map(RawOperation::into_operation).collect()
    }

    pub async fn pending(&self) -> Result<Vec<PendingOperation>> {
        self.list(SyncState::Pending).await
    }

    pub async fn count(&self, state: SyncState) -> Result<u64> {
        let count: i64 = self
            .db
            .call(move |conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM pending_operations WHERE sync_state = ?1",
                    params![state.as_str()],
                    |row| row.get(0),
                )
            })
            .await?;
        Ok(count as u64)
    }

    pub async fn set_state(&self, id: &Uuid, state: SyncState) -> Result<()> {
        let id_str = id.to_string();
        let changed = self
            .db
            .call(move |conn| {
                conn.execute(
                    "UPDATE pending_operations SET sync_state = ?1 WHERE id = ?2",
                    params![state.as_str(), id_str],
                )
            })
            .await?;
        if changed == 0 {
            return Err(Error::OperationNotFound { id: id.to_string() });
        }
        Ok(())
    }

    /// Store the outcome of a failed delivery attempt
    pub async fn record_failure(
        &self,
        id: &Uuid,
        attempts: u32,
        error: &str,
        state: SyncState,
    ) -> Result<()> {
        let id = id.to_string();
        let error = error.to_string();
        self.db
            .call(move |conn| {
                conn.execute(
                    "UPDATE pending_operations
                     SET attempts = ?1, last_error = ?2, sync_state = ?3
                     WHERE id = ?4",
                    params![attempts, error, state.as_str(), id],
                )
            })
            .await?;
        Ok(())
    }

    /// Return an in-flight operation to `Pending` without awaiting
    ///
    /// Used from `Drop`, where the drain future was torn down mid-delivery.
    pub fn revert_in_flight_blocking(&self, id: &Uuid) -> Result<bool> {
        let id = id.to_string();
        let changed = self.db.call_blocking(move |conn| {
            conn.execute(
                "UPDATE pending_operations SET sync_state = ?1
                 WHERE id = ?2 AND sync_state = ?3",
                params![SyncState::Pending.as_str(), id, SyncState::InFlight.as_str()],
            )
        })?;
        Ok(changed > 0)
    }

    pub async fn delete(&self, id: &Uuid) -> Result<bool> {
        let id = id.to_string();
        let changed = self
            .db
            .call(move |conn| {
                conn.execute("DELETE FROM pending_operations WHERE id = ?1", params![id])
            })
            .await?;
        Ok(changed > 0)
    }

    /// Move a failed operation back to `Pending` with a fresh attempt budget
    pub async fn retry_failed(&self, id: &Uuid) -> Result<()> {
        self.expect_state(id, SyncState::Failed).await?;
        let id = id.to_string();
        self.db
            .call(move |conn| {
                conn.execute(
                    "UPDATE pending_operations
                     SET sync_state = ?1, attempts = 0, last_error = NULL
                     WHERE id = ?2",
                    params![SyncState::Pending.as_str(), id],
                )
            })
            .await?;
        Ok(())
    }

    /// Drop an operation that is not currently being delivered
    pub async fn discard(&self, id: &Uuid) -> Result<()> {
        let op = self
            .get(id)
            .await?
            .ok_or_else(|| Error::OperationNotFound { id: id.to_string() })?;
        if op.sync_state == SyncState::InFlight {
            return Err(Error::InvalidOperationState {
                id: id.to_string(),
                state: op.sync_state.to_string(),
                expected: "pending or failed".to_string(),
            });
        }
        self.delete(id).await?;
        Ok(())
    }

    async fn expect_state(&self, id: &Uuid, expected: SyncState) -> Result<()> {
        let op = self
            .get(id)
            .await?
            .ok_or_else(|| Error::OperationNotFound { id: id.to_string() })?;
        if op.sync_state != expected {
            return Err(Error::InvalidOperationState {
                id: id.to_string(),
                state: op.sync_state.to_string(),
                expected: expected.to_string(),
            });
        }
        Ok(())
    }
}

/// Row as stored, before column decoding
struct RawOperation {
    id: String,
    kind: String,
    method: String,
    path: String,
    payload: Vec<u8>,
    invalidates: String,
    created_at: i64,
    attempts: u32,
    last_error: Option<String>,
    sync_state: String,
}

impl RawOperation {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            kind: row.get(1)?,
            method: row.get(2)?,
            path: row.get(3)?,
            payload: row.get(4)?,
            invalidates: row.get(5)?,
            created_at: row.get(6)?,
            attempts: row.get(7)?,
            last_error: row.get(8)?,
            sync_state: row.get(9)?,
        })
    }

    fn into_operation(self) -> Result<PendingOperation> {
        let corrupt = |field: &str, detail: String| {
            Error::storage(
                "pending_operations",
                format!("row {} has invalid {}: {}", self.id, field, detail),
            )
        };

        let id = Uuid::parse_str(&self.id).map_err(|e| corrupt("id", e.to_string()))?;
        let method: HttpMethod = self.method.parse().map_err(|e| corrupt("method", e))?;
        let sync_state = SyncState::parse(&self.sync_state)
            .ok_or_else(|| corrupt("sync_state", self.sync_state.clone()))?;
        let created_at = DateTime::from_timestamp_millis(self.created_at)
            .ok_or_else(|| corrupt("created_at", self.created_at.to_string()))?;

        Ok(PendingOperation {
            id,
            kind: OperationKind::from_name(&self.kind),
            method,
            path: self.path.clone(),
            payload: serde_json::from_slice(&self.payload)?,
            invalidates: serde_json::from_str(&self.invalidates)?,
            created_at,
            attempts: self.attempts,
            last_error: self.last_error.clone(),
            sync_state,
        })
    }
}
