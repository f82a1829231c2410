//! Offline Queue Worker
//!
//! Persists mutations that could not reach the server and drains them when
//! connectivity returns. Drains are serialized: a drain requested while one
//! is running is folded into a single follow-up pass.
//!
//! ```text
//!            enqueue
//!               │
//!               ▼
//!   ┌──────► Pending ──── drain ────► InFlight ──── 2xx ────► Synced
//!   │           ▲                        │                  (row removed,
//!   │           └── transient, < max ────┤                   receipt cached)
//!   │                                    │
//!   └── retry_failed ◄── Failed ◄────────┘ permanent, or attempts == max
//! ```

use crate::cache::{CacheEngine, CacheTier, SaveOptions};
use crate::config::QueueConfig;
use crate::error::{NetworkError, Result};
use crate::network::{ConnectivityMonitor, HttpClient};
use crate::queue::operation::{PendingOperation, SyncState, SyncedRecord};
use crate::queue::store::QueueStore;
use crate::telemetry::{QueueEvent, Telemetry};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Cache id prefix of sync receipts
pub const SYNC_RECEIPT_PREFIX: &str = "sync-receipt:";

// =============================================================================
// Transport
// =============================================================================

/// Delivers one operation to the server
#[async_trait]
pub trait OperationTransport: Send + Sync {
    /// Deliver `op`; must return [`NetworkError::Cancelled`] once `cancel` fires
    async fn deliver(
        &self,
        op: &PendingOperation,
        cancel: &CancellationToken,
    ) -> std::result::Result<(), NetworkError>;
}

#[async_trait]
impl OperationTransport for HttpClient {
    async fn deliver(
        &self,
        op: &PendingOperation,
        cancel: &CancellationToken,
    ) -> std::result::Result<(), NetworkError> {
        self.request_cancellable(&op.to_request(), cancel)
            .await
            .map(|_| ())
    }
}

// =============================================================================
// Reports
// =============================================================================

/// Queue counters surfaced to the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Operations not yet delivered, including one being sent right now
    pub pending_count: u64,
    pub failed_count: u64,
    pub is_online: bool,
}

/// Result of one `drain()` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainReport {
    /// Delivery attempts made
    pub attempted: u64,
    pub synced: u64,
    /// Operations moved to `Failed`
    pub failed: u64,
    /// Pending operations left afterwards
    pub remaining: u64,
    /// True if another drain was running and this request was folded into it
    pub coalesced: bool,
}

enum AttemptOutcome {
    Synced,
    Failed,
    Deferred { offline: bool },
    Interrupted,
}

/// Reverts an operation to `Pending` if delivery is torn down mid-flight
struct InFlightGuard {
    store: QueueStore,
    id: Uuid,
    armed: bool,
}

impl InFlightGuard {
    fn new(store: QueueStore, id: Uuid) -> Self {
        Self {
            store,
            id,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match self.store.revert_in_flight_blocking(&self.id) {
            Ok(_) => debug!(id = %self.id, "Interrupted operation returned to pending"),
            Err(e) => error!(id = %self.id, error = %e, "Cannot revert interrupted operation"),
        }
    }
}

// =============================================================================
// Offline Queue
// =============================================================================

/// Durable offline write queue
pub struct OfflineQueue {
    store: QueueStore,
    transport: Arc<dyn OperationTransport>,
    cache: Arc<CacheEngine>,
    connectivity: ConnectivityMonitor,
    telemetry: Telemetry,
    config: QueueConfig,
    history: Mutex<VecDeque<SyncedRecord>>,
    /// Held for the whole of a drain
    drain_lock: tokio::sync::Mutex<()>,
    /// Set when a drain is requested while one is running
    rerun: AtomicBool,
    wake: Notify,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl OfflineQueue {
    pub fn new(
        config: QueueConfig,
        store: QueueStore,
        transport: Arc<dyn OperationTransport>,
        cache: Arc<CacheEngine>,
        connectivity: ConnectivityMonitor,
        telemetry: Telemetry,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            transport,
            cache,
            connectivity,
            telemetry,
            history: Mutex::new(VecDeque::with_capacity(config.synced_history)),
            config,
            drain_lock: tokio::sync::Mutex::new(()),
            rerun: AtomicBool::new(false),
            wake: Notify::new(),
            shutdown: CancellationToken::new(),
            task: Mutex::new(None),
        })
    }

    pub fn store(&self) -> &QueueStore {
        &self.store
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    /// Persist an operation for later delivery
    ///
    /// The operation is durable once this returns.
    pub async fn enqueue(&self, mut op: PendingOperation) -> Result<PendingOperation> {
        op.sync_state = SyncState::Pending;
        op.attempts = 0;
        op.last_error = None;
        self.store.insert(&op).await?;

        self.telemetry.record_queue(QueueEvent::Enqueued);
        self.refresh_pending_gauge().await;
        info!(id = %op.id, kind = %op.kind, path = %op.path, "Operation queued offline");

        if self.connectivity.is_online() {
            self.request_drain();
        }
        Ok(op)
    }

    /// Ask the background loop for a drain
    pub fn request_drain(&self) {
        self.wake.notify_one();
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        Ok(QueueStats {
            pending_count: self.store.outstanding().await?,
            failed_count: self.store.count(SyncState::Failed).await?,
            is_online: self.connectivity.is_online(),
        })
    }

    pub async fn pending(&self) -> Result<Vec<PendingOperation>> {
        self.store.pending().await
    }

    pub async fn failed(&self) -> Result<Vec<PendingOperation>> {
        self.store.list(SyncState::Failed).await
    }

    /// Recently synced operations, oldest first
    pub fn synced_history(&self) -> Vec<SyncedRecord> {
        self.history.lock().iter().cloned().collect()
    }

    pub fn is_synced(&self, id: &Uuid) -> bool {
        self.history.lock().iter().any(|record| record.id == *id)
    }

    /// Give a failed operation a fresh attempt budget
    pub async fn retry_failed(&self, id: &Uuid) -> Result<()> {
        self.store.retry_failed(id).await?;
        self.telemetry.record_queue(QueueEvent::Retried);
        self.refresh_pending_gauge().await;
        info!(id = %id, "Failed operation scheduled for retry");
        self.request_drain();
        Ok(())
    }

    /// Drop a pending or failed operation
    pub async fn discard(&self, id: &Uuid) -> Result<()> {
        self.store.discard(id).await?;
        self.refresh_pending_gauge().await;
        info!(id = %id, "Operation discarded");
        Ok(())
    }

    // =========================================================================
    // Drain
    // =========================================================================

    /// Attempt delivery of every pending operation in creation order
    ///
    /// Returns immediately with `coalesced` set if a drain is already
    /// running; that drain then makes one more pass.
    pub async fn drain(&self) -> Result<DrainReport> {
        let mut report = DrainReport::default();

        loop {
            let Ok(guard) = self.drain_lock.try_lock() else {
                self.rerun.store(true, Ordering::SeqCst);
                debug!("Drain already running, coalescing request");
                report.coalesced = true;
                return Ok(report);
            };
            self.rerun.store(false, Ordering::SeqCst);

            self.drain_pass(&mut report).await?;
            drop(guard);

            if self.shutdown.is_cancelled() || !self.rerun.swap(false, Ordering::SeqCst) {
                break;
            }
            debug!("Running coalesced drain pass");
        }

        report.remaining = self.store.outstanding().await?;
        self.telemetry.set_queue_pending(report.remaining);
        if report.attempted > 0 {
            info!(
                attempted = report.attempted,
                synced = report.synced,
                failed = report.failed,
                remaining = report.remaining,
                "Drain finished"
            );
        }
        Ok(report)
    }

    async fn drain_pass(&self, report: &mut DrainReport) -> Result<()> {
        // Runs under the drain lock, so any InFlight row belongs to a
        // drain whose future was dropped mid-transition
        let orphaned = self.store.reset_in_flight().await?;
        if orphaned > 0 {
            warn!(orphaned, "Returned orphaned in-flight operations to pending");
        }

        let pending = self.store.pending().await?;
        let mut blocked_kinds = HashSet::new();

        for op in pending {
            if self.shutdown.is_cancelled() {
                break;
            }
            // Per-kind FIFO: later operations wait behind a stuck one
            if blocked_kinds.contains(&op.kind) {
                continue;
            }

            report.attempted += 1;
            match self.attempt(&op).await? {
                AttemptOutcome::Synced => report.synced += 1,
                AttemptOutcome::Failed => report.failed += 1,
                AttemptOutcome::Deferred { offline } => {
                    if offline {
                        debug!("Network unreachable, ending drain pass");
                        break;
                    }
                    blocked_kinds.insert(op.kind.clone());
                }
                AttemptOutcome::Interrupted => break,
            }
        }
        Ok(())
    }

    async fn attempt(&self, op: &PendingOperation) -> Result<AttemptOutcome> {
        let guard = InFlightGuard::new(self.store.clone(), op.id);
        self.store.set_state(&op.id, SyncState::InFlight).await?;

        let outcome = self.transport.deliver(op, &self.shutdown).await;

        let result = match outcome {
            Ok(()) => {
                self.complete(op).await?;
                AttemptOutcome::Synced
            }
            Err(NetworkError::Cancelled) => {
                self.store.set_state(&op.id, SyncState::Pending).await?;
                debug!(id = %op.id, "Delivery cancelled, operation stays pending");
                AttemptOutcome::Interrupted
            }
            Err(e) => {
                let attempts = op.attempts + 1;
                let exhausted = attempts >= self.config.max_attempts;
                let state = if !e.is_connectivity() || exhausted {
                    SyncState::Failed
                } else {
                    SyncState::Pending
                };
                self.store
                    .record_failure(&op.id, attempts, &e.to_string(), state)
                    .await?;

                if state == SyncState::Failed {
                    warn!(
                        id = %op.id,
                        kind = %op.kind,
                        attempts,
                        error = %e,
                        "Operation failed permanently"
                    );
                    self.telemetry.record_queue(QueueEvent::Failed);
                    AttemptOutcome::Failed
                } else {
                    debug!(id = %op.id, attempts, error = %e, "Delivery deferred");
                    AttemptOutcome::Deferred {
                        offline: e.is_offline(),
                    }
                }
            }
        };

        guard.disarm();
        Ok(result)
    }

    async fn complete(&self, op: &PendingOperation) -> Result<()> {
        self.store.delete(&op.id).await?;

        let record = SyncedRecord {
            id: op.id,
            kind: op.kind.clone(),
            attempts: op.attempts + 1,
            synced_at: Utc::now(),
        };
        {
            let mut history = self.history.lock();
            history.push_back(record.clone());
            while history.len() > self.config.synced_history {
                history.pop_front();
            }
        }

        let receipt_id = format!("{}{}", SYNC_RECEIPT_PREFIX, op.id);
        self.cache
            .save(
                &receipt_id,
                record,
                SaveOptions::default().ceiling(CacheTier::Local),
            )
            .await;
        for id in &op.invalidates {
            self.cache.delete(id).await;
        }

        self.telemetry.record_queue(QueueEvent::Synced);
        info!(id = %op.id, kind = %op.kind, "Operation synced");
        Ok(())
    }

    async fn refresh_pending_gauge(&self) {
        match self.store.outstanding().await {
            Ok(pending) => self.telemetry.set_queue_pending(pending),
            Err(e) => warn!(error = %e, "Cannot count pending operations"),
        }
    }

    // =========================================================================
    // Background Loop
    // =========================================================================

    /// Spawn the drain loop
    ///
    /// Drains on connectivity regained, on [`request_drain`](Self::request_drain)
    /// while online, and every `drain_interval` as a fallback. Calling it
    /// again while the loop is running has no effect.
    pub fn start(self: &Arc<Self>) {
        let mut slot = self.task.lock();
        if slot.is_some() {
            return;
        }

        let queue = Arc::clone(self);
        let mut subscription = self.connectivity.subscribe();
        let period = self.config.drain_interval();

        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                let trigger = tokio::select! {
                    _ = queue.shutdown.cancelled() => break,
                    _ = ticker.tick() => "interval",
                    _ = queue.wake.notified() => {
                        if !queue.connectivity.is_online() {
                            continue;
                        }
                        "request"
                    }
                    changed = subscription.changed() => match changed {
                        Some(true) => "connectivity",
                        Some(false) => continue,
                        None => break,
                    },
                };

                debug!(trigger, "Draining offline queue");
                if let Err(e) = queue.drain().await {
                    error!(error = %e, "Offline queue drain failed");
                }
            }
            debug!("Offline queue loop stopped");
        }));

        info!(interval_secs = period.as_secs(), "Offline queue started");
    }

    /// Stop the drain loop, cancelling any in-flight delivery
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!(error = %e, "Offline queue task failed");
            }
        }
        info!("Offline queue stopped");
    }
}

impl std::fmt::Debug for OfflineQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineQueue")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
