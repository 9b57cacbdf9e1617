use std::{future::Future, time::Duration};

use tracing::{debug, warn};

use crate::{error::LedgerError, store::StoreError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(5),
        }
    }
}

impl RetryPolicy {
    /// Doubles per attempt, attempt is 1-based.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_backoff
            .saturating_mul(1 << attempt.saturating_sub(1).min(16))
    }
}

/// Runs `attempt` until it commits, fails with anything but a conflict, or
/// runs out of attempts.
pub async fn with_retry<T, F, Fut>(
    policy: RetryPolicy,
    operation: &str,
    mut attempt: F,
) -> Result<T, LedgerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LedgerError>>,
{
    let max_attempts = policy.max_attempts.max(1);

    for n in 1..=max_attempts {
        match attempt().await {
            Err(LedgerError::Conflict) if n < max_attempts => {
                debug!(operation, attempt = n, "Commit conflicted, retrying");
                tokio::time::sleep(policy.backoff(n)).await;
            }
            Err(LedgerError::Conflict) => {
                warn!(operation, attempts = n, "Commit conflicted, giving up");
                return Err(LedgerError::Conflict);
            }
            other => return other,
        }
    }

    Err(StoreError::Conflict.into())
}
