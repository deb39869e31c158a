//! One-shot completion signal.
//!
//! Fires exactly once when a connection is torn down. Every clone observes
//! the same signal, so a session holding a clone of its stream's completion
//! can never disagree with the stream about whether it is closed.

use std::sync::Arc;
use tokio::sync::watch;

/// Cloneable one-shot signal.
#[derive(Debug, Clone)]
pub struct Completion {
    tx: Arc<watch::Sender<bool>>,
}

impl Completion {
    /// Create a signal that has not fired yet.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Fire the signal. Returns `true` only for the call that fired it.
    pub fn fire(&self) -> bool {
        self.tx.send_if_modified(|done| {
            if *done {
                false
            } else {
                *done = true;
                true
            }
        })
    }

    /// Whether the signal has fired.
    pub fn is_complete(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the signal has fired (immediately if it already has).
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this only returns once fired.
        let _ = rx.wait_for(|done| *done).await;
    }

    /// Whether two handles observe the same underlying signal.
    pub fn same_as(&self, other: &Completion) -> bool {
        Arc::ptr_eq(&self.tx, &other.tx)
    }
}

impl Default for Completion {
    fn default() -> Self {
        Self::new()
    }
}
