use std::{future::Future, time::Duration};

use rand::Rng;
use tokio::time::sleep;

use crate::Result;

/// Upper bound (exclusive) of the random jitter added to every backoff.
pub const MAX_JITTER: Duration = Duration::from_millis(1_000);

/// Backoff before retrying after `attempt` failed (attempts start at 1):
/// `base_delay * 2^(attempt - 1)` plus up to one second of jitter.
pub fn backoff_delay(base_delay: Duration, attempt: u32) -> Duration {
    let jitter_ms = rand::rng().random_range(0..MAX_JITTER.as_millis() as u64);
    let backoff = match 2u32.checked_pow(attempt.saturating_sub(1)) {
        Some(factor) => base_delay.saturating_mul(factor),
        None if base_delay.is_zero() => Duration::ZERO,
        None => Duration::MAX,
    };
    backoff.saturating_add(Duration::from_millis(jitter_ms))
}

/// Runs `operation` up to `max_attempts` times.
///
/// `operation` receives the 1-based attempt number and must produce a fresh
/// future each time, so every failure is classified on its own. Errors that
/// are not retryable, and the error of the last attempt, are returned as is.
pub async fn with_retry<T, F, Fut>(mut operation: F, max_attempts: u32, base_delay: Duration) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_retryable() || attempt >= max_attempts => return Err(err),
            Err(_err) => {
                let delay = backoff_delay(base_delay, attempt);

                #[cfg(feature = "tracing")]
                tracing::debug!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %_err,
                    "retrying request"
                );

                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
