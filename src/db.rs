//! SQLite Database Handle
//!
//! One connection shared by the durable cache tier and the pending
//! operation store. Async callers go through [`Database::call`], which runs
//! the closure on the blocking pool so the runtime never stalls on disk I/O.

use crate::error::{Error, Result};
use parking_lot::Mutex;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;

/// Schema for the durable tier and the offline queue
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_entries (
    key TEXT PRIMARY KEY,
    namespace TEXT NOT NULL,
    data BLOB NOT NULL,
    created_at INTEGER NOT NULL,
    ttl_seconds REAL,
    size INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_namespace
    ON cache_entries(namespace);

CREATE TABLE IF NOT EXISTS pending_operations (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    method TEXT NOT NULL,
    path TEXT NOT NULL,
    payload BLOB NOT NULL,
    invalidates TEXT NOT NULL DEFAULT '[]',
    created_at INTEGER NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    sync_state TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_pending_operations_order
    ON pending_operations(created_at);
"#;

/// Shared SQLite connection
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create the database at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool
    pub async fn call<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            f(&guard)
        })
        .await
        .map_err(|e| Error::Internal(format!("Database task failed: {}", e)))?
        .map_err(Error::from)
    }

    /// Run `f` on the current thread
    ///
    /// Only for paths that cannot await, such as `Drop` implementations.
    pub fn call_blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let guard = self.conn.lock();
        f(&guard).map_err(Error::from)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}
