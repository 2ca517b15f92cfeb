use std::future::Future;
use std::time::Duration;

use super::types::RetryPolicy;

/// Terminal state returned by the retry runner.
#[derive(Debug)]
pub struct RetryTerminal<E> {
    pub error: E,
    pub attempts: u32,
    pub exhausted_retryable: bool,
}

/// Executes one async operation under `retry_policy`.
///
/// `is_retryable` classifies each error; a non-retryable error ends the loop immediately
/// so the caller can escalate or fail fast. Delays are exact, there is no jitter: retry
/// `k` waits `base_delay * 2^(k-1)`.
pub async fn run_with_retry<T, E, F, Fut, R>(
    retry_policy: &RetryPolicy,
    mut op: F,
    mut is_retryable: R,
) -> Result<(T, u32), RetryTerminal<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: FnMut(&E) -> bool,
{
    let max_attempts = retry_policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op(attempt).await {
            Ok(value) => return Ok((value, attempt)),
            Err(error) => {
                let retryable = is_retryable(&error);
                if !retryable || attempt >= max_attempts {
                    return Err(RetryTerminal {
                        error,
                        attempts: attempt,
                        exhausted_retryable: retryable,
                    });
                }

                let delay = compute_backoff_delay(retry_policy, attempt);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
            }
        }
    }
}

/// Delay before retry number `retry` (1-based): `base_delay * 2^(retry-1)`.
pub fn compute_backoff_delay(policy: &RetryPolicy, retry: u32) -> Duration {
    let shift = retry.saturating_sub(1).min(20);
    policy.base_delay.saturating_mul(1u32 << shift)
}
