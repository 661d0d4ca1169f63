//! Bounded retry for idempotent remote reads.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use super::UserbotError;

/// How often, and how far apart, a read is attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no waiting.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            attempts: 1,
            delay: Duration::ZERO,
        }
    }

    /// Runs `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// Only transient transport errors are retried. Never use this for
    /// mutations.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, UserbotError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, UserbotError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Err(e) if e.is_transient() && attempt < self.attempts => {
                    warn!(operation = what, attempt, error = %e, "transient failure, retrying");
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}
