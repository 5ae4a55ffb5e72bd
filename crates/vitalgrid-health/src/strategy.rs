//! How the executor drives a single `check()`.
//!
//! `Direct` calls the check once. `Retry` calls it again after an error,
//! backing off between attempts per its [`RetryPolicy`]. Interruptions are
//! never retried, and panics are not errors, so they propagate as-is.

use std::future::Future;

use tracing::{debug, warn};

use vital_core::{Interrupted, RetryPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionStrategy {
    #[default]
    Direct,
    Retry(RetryPolicy),
}

impl From<Option<RetryPolicy>> for ExecutionStrategy {
    fn from(policy: Option<RetryPolicy>) -> Self {
        policy.map_or(ExecutionStrategy::Direct, ExecutionStrategy::Retry)
    }
}

impl ExecutionStrategy {
    /// Run `operation` under this strategy and return its final outcome.
    pub async fn execute<T, F, Fut>(&self, mut operation: F) -> anyhow::Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let policy = match self {
            ExecutionStrategy::Direct => return operation().await,
            ExecutionStrategy::Retry(policy) => policy,
        };

        let mut retry = 0u32;
        loop {
            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            if err.chain().any(|e| e.is::<Interrupted>()) {
                return Err(err);
            }
            if retry >= policy.max_retries {
                if policy.max_retries > 0 {
                    warn!(attempts = retry + 1, error = %err, "check failed, retries exhausted");
                }
                return Err(err);
            }
            let delay = policy.delay_for(retry);
            debug!(retry = retry + 1, ?delay, error = %err, "check failed, retrying");
            tokio::time::sleep(delay).await;
            retry += 1;
        }
    }
}
