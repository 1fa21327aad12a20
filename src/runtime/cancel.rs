//! One-shot cooperative cancellation
//!
//! A [`CancellationToken`] is shared (by cloning) between the party that
//! requests cancellation and the code that waits at suspension points. Once
//! requested it stays requested.

use std::future::Future;

use tokio_util::sync::CancellationToken as SignalToken;

use crate::common::{Error, Result};

/// Shared, one-shot cancellation signal
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: SignalToken,
}

impl CancellationToken {
    /// Create a token that has not been cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        if !self.inner.is_cancelled() {
            tracing::debug!("Cancellation requested");
        }
        self.inner.cancel();
    }

    /// Whether cancellation has been requested
    pub fn is_cancellation_requested(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// Resolve once cancellation is requested (immediately if it already was)
    pub async fn cancelled(&self) {
        self.inner.cancelled().await;
    }

    /// Check-or-fail primitive used before each step and hook
    pub fn check(&self) -> Result<()> {
        if self.is_cancellation_requested() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Race `fut` against the cancellation signal.
    ///
    /// Returns `None` if cancellation won. The losing future is dropped; work
    /// it spawned elsewhere is not stopped.
    pub async fn run_until_cancelled<F>(&self, fut: F) -> Option<F::Output>
    where
        F: Future,
    {
        self.inner.run_until_cancelled(fut).await
    }
}
