//! Bounded retry with per-attempt timeout and exponential backoff.
//!
//! Every provider call in the pipeline goes through [`call_with_retry`]:
//! analysis, each narration, each synthesis. A call that exceeds its timeout
//! counts as a transient failure and is retried like a 503 would be.
//!
//! Backoff doubles per attempt (`backoff_ms * 2^(attempt-1)`): with 500 ms
//! base and 2 retries the wait sequence is 500 ms → 1 s.

use crate::error::ProviderError;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub max_retries: u32,
    pub backoff_ms: u64,
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    fn delay_before(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.backoff_ms.saturating_mul(factor))
    }
}

/// The last error after the retry budget ran out (or a permanent error stopped it early).
#[derive(Debug, Clone, PartialEq)]
pub struct RetryFailure {
    pub attempts: u32,
    pub last: ProviderError,
}

/// Run `op` until it succeeds, fails permanently, or exhausts `policy`.
///
/// `label` identifies the call in logs (e.g. `"narration slide 3"`).
pub async fn call_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    timeout: Duration,
    label: &str,
    mut op: F,
) -> Result<T, RetryFailure>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut last: Option<ProviderError> = None;

    for attempt in 0..=policy.max_retries {
        if attempt > 0 {
            let backoff = policy.delay_before(attempt);
            warn!(
                "{}: retry {}/{} after {}ms",
                label,
                attempt,
                policy.max_retries,
                backoff.as_millis()
            );
            sleep(backoff).await;
        }

        let err = match tokio::time::timeout(timeout, op()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => e,
            Err(_) => ProviderError::Timeout(timeout.as_secs()),
        };

        warn!("{}: attempt {} failed: {}", label, attempt + 1, err);
        if !err.is_retryable() {
            return Err(RetryFailure {
                attempts: attempt + 1,
                last: err,
            });
        }
        last = Some(err);
    }

    Err(RetryFailure {
        attempts: policy.max_attempts(),
        last: last.unwrap_or_else(|| ProviderError::Transient("no attempt was made".into())),
    })
}
