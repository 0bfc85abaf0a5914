//! Status feed adapter backed by a `tokio::sync::watch` channel

use tokio::sync::watch;
use turbo_core::{StatusReporter, StatusSnapshot};

/// Keeps the latest snapshot for any number of readers
#[derive(Debug, Clone)]
pub struct WatchStatusReporter {
    tx: watch::Sender<StatusSnapshot>,
}

impl WatchStatusReporter {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(StatusSnapshot::empty());
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.tx.subscribe()
    }

    pub fn latest(&self) -> StatusSnapshot {
        self.tx.borrow().clone()
    }
}

impl Default for WatchStatusReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusReporter for WatchStatusReporter {
    fn report(&self, snapshot: &StatusSnapshot) {
        // send_replace works with no receivers
        self.tx.send_replace(snapshot.clone());
    }
}
