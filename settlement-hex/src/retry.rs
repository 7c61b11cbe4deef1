//! Retry loop for PSP calls.

use std::future::Future;

use settlement_types::SettlementResult;
use tracing::debug;

use crate::config::RetryPolicy;

/// Calls `op` until it returns something other than `TransientError` or the
/// policy's attempts are used up. Returns the last result and the number of
/// calls made.
pub async fn call_with_retry<F, Fut>(policy: &RetryPolicy, mut op: F) -> (SettlementResult, u32)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SettlementResult>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let result = op().await;
        match &result {
            SettlementResult::TransientError { reason } if attempt < max_attempts => {
                let delay = policy.backoff(attempt);
                debug!(attempt, ?delay, %reason, "Transient PSP error, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            _ => return (result, attempt),
        }
    }
}
