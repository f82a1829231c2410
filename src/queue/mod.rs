//! Offline Write Queue
//!
//! Durable log of mutations made while the server was unreachable.
//!
//! # Guarantees
//!
//! - An operation is persisted before `enqueue` returns
//! - Operations of one kind are delivered in creation order
//! - At most one drain runs at a time; concurrent requests are coalesced
//! - A delivery cut short by cancellation leaves the operation `Pending`

pub mod operation;
pub mod store;
pub mod worker;

pub use operation::{OperationKind, PendingOperation, SyncState, SyncedRecord};
pub use store::QueueStore;
pub use worker::{
    DrainReport, OfflineQueue, OperationTransport, QueueStats, SYNC_RECEIPT_PREFIX,
};
