//! Run deadline and cancellation
//!
//! One [`Deadline`] governs a whole pipeline run. Its token is a child of the
//! token owned by the inbound request, so it fires either when the fixed
//! compilation timeout elapses or when the request goes away. Every blocking
//! point in the runner selects on it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Cancellation context shared by every command of one run
#[derive(Debug)]
pub struct Deadline {
    token: CancellationToken,
    timeout: Duration,
    elapsed: Arc<AtomicBool>,
}

impl Deadline {
    /// Starts the clock for a run
    ///
    /// Must be called from within a Tokio runtime; a background timer cancels
    /// the token when `timeout` elapses.
    pub fn start(parent: &CancellationToken, timeout: Duration) -> Self {
        let token = parent.child_token();
        let expires_at = Instant::now() + timeout;
        let elapsed = Arc::new(AtomicBool::new(false));

        {
            let token = token.clone();
            let elapsed = Arc::clone(&elapsed);
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep_until(expires_at) => {
                        warn!(?timeout, "Compilation deadline elapsed");
                        elapsed.store(true, Ordering::SeqCst);
                        token.cancel();
                    }
                    _ = token.cancelled() => {
                        debug!("Deadline timer stopped");
                    }
                }
            });
        }

        Self {
            token,
            timeout,
            elapsed,
        }
    }

    /// Token observed by everything running under this deadline
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Completes once the deadline fires or the run is cancelled
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Whether cancellation was caused by the timeout rather than the caller
    pub fn timed_out(&self) -> bool {
        self.elapsed.load(Ordering::SeqCst)
    }

    /// Configured maximum duration of the run
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Drop for Deadline {
    fn drop(&mut self) {
        // Stops the timer task; the parent token is unaffected.
        self.token.cancel();
    }
}
