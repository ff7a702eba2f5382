//! Retry with exponential backoff for transient store failures.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;

use crate::AuthResult;
use crate::config::RetryConfig;

/// Runs `f` until it succeeds, fails permanently, or runs out of retries.
///
/// Only errors for which [`crate::AuthError::is_transient`] holds are
/// retried. The delay starts at `base_backoff` and doubles on each retry.
/// Every attempt must be a complete unit of work: `f` is invoked afresh and
/// must not depend on state left by a failed attempt.
///
/// # Errors
///
/// Returns the first non-transient error, or the last transient one once
/// `max_retries` retries are exhausted.
pub async fn with_retry<F, Fut, T>(config: &RetryConfig, operation: &str, mut f: F) -> AuthResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AuthResult<T>>,
{
    let mut retries = 0u32;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && retries < config.max_retries => {
                let backoff = backoff_for(config.base_backoff, retries);
                retries += 1;
                tracing::warn!(
                    operation,
                    attempt = retries,
                    max_retries = config.max_retries,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Transient failure, retrying after backoff"
                );
                sleep(backoff).await;
            }
            Err(e) => {
                if e.is_transient() {
                    tracing::error!(
                        operation,
                        attempts = retries + 1,
                        error = %e,
                        "Operation failed after max retries"
                    );
                }
                return Err(e);
            }
        }
    }
}

fn backoff_for(base: Duration, retries: u32) -> Duration {
    base.saturating_mul(1u32 << retries.min(16))
}
