//! Retry loop: run an async attempt until success or the policy says stop.

use std::future::Future;

use super::classify;
use super::error::FetchError;
use super::policy::{RetryDecision, RetryPolicy};
use crate::control::CancelToken;

/// Runs `attempt` (called with the 1-based attempt number) until it succeeds
/// or the policy gives up. Backoff sleeps are skipped once `cancel` is set.
pub async fn run_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancelToken,
    mut attempt: F,
) -> Result<T, FetchError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut n = 1u32;
    loop {
        match attempt(n).await {
            Ok(v) => return Ok(v),
            Err(e) => {
                let kind = classify::classify(&e);
                match policy.decide(n, kind) {
                    RetryDecision::NoRetry => return Err(e),
                    RetryDecision::RetryAfter(_) if cancel.is_cancelled() => return Err(e),
                    RetryDecision::RetryAfter(d) => {
                        tracing::debug!("attempt {} failed ({}), retrying in {:?}", n, e, d);
                        tokio::time::sleep(d).await;
                        n += 1;
                    }
                }
            }
        }
    }
}
