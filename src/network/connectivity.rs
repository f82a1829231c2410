//! Connectivity Monitor
//!
//! Holds the online/offline signal. The platform (or the client, after a
//! request outcome) publishes changes; subscribers such as the offline queue
//! hold a [`ConnectivitySubscription`] for their lifetime.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Shared online/offline state
#[derive(Clone)]
pub struct ConnectivityMonitor {
    tx: Arc<watch::Sender<bool>>,
}

impl ConnectivityMonitor {
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Publish a connectivity change; returns true if the state changed
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            info!(online, "Connectivity changed");
        }
        changed
    }

    pub fn subscribe(&self) -> ConnectivitySubscription {
        ConnectivitySubscription {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

impl std::fmt::Debug for ConnectivityMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectivityMonitor")
            .field("online", &self.is_online())
            .finish()
    }
}

/// Receiver side of the connectivity signal; unsubscribes on drop
#[derive(Debug)]
pub struct ConnectivitySubscription {
    rx: watch::Receiver<bool>,
}

impl ConnectivitySubscription {
    pub fn current(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait for the next change
    ///
    /// Returns `None` once every monitor handle has been dropped.
    pub async fn changed(&mut self) -> Option<bool> {
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow_and_update())
    }
}
