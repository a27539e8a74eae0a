//! Cooperative cancellation for background tasks.
//!
//! The push channel and every polling task own a [`CancelToken`]. Tasks
//! check it at each await point with `tokio::select!`; cancelling stops
//! future work but does not retract an event that is already on its way to
//! the session queue.

use std::sync::Arc;
use tokio::sync::watch;

/// Cloneable one-shot cancellation flag.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Request cancellation. Calling it again has no further effect.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called on any clone.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
