//! Per-turn cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio_util::sync::CancellationToken;

/// Cancellation handle for one user turn.
///
/// Clones share state. The first [`TurnCancellation::cancel`] fires the token;
/// later calls are no-ops.
#[derive(Debug, Clone, Default)]
pub struct TurnCancellation {
    token: CancellationToken,
    fired: Arc<AtomicBool>,
}

impl TurnCancellation {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` only for the call that actually cancelled the turn.
    pub fn cancel(&self) -> bool {
        if self.fired.swap(true, Ordering::AcqRel) {
            return false;
        }
        tracing::info!("Turn cancelled");
        self.token.cancel();
        true
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Token handed to tools and subprocesses.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }
}

#[cfg(test)]
mod tests {
    use super::TurnCancellation;

    #[test]
    fn cancel_is_idempotent() {
        let cancel = TurnCancellation::new();
        let clone = cancel.clone();
        assert!(!cancel.is_cancelled());
        assert!(clone.cancel());
        assert!(!cancel.cancel());
        assert!(cancel.is_cancelled());
        assert!(cancel.token().is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_future_resolves() {
        let cancel = TurnCancellation::new();
        let waiter = cancel.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });
        cancel.cancel();
        handle.await.unwrap();
    }
}
