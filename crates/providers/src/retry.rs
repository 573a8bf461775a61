//! Bounded retry with exponential backoff for capability calls.
//!
//! Both `CapabilityUnavailable` and `GenerationTimeout` are retryable; the
//! caller decides what exhaustion means (surface, or fall back to an
//! escalation).

use crabdesk_core::error::CapabilityError;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Run `op` up to `1 + retries` times, doubling `backoff` between attempts.
///
/// Returns the first success, or the last error once attempts are exhausted.
pub async fn with_retry<T, F, Fut>(
    capability: &str,
    retries: u32,
    backoff: Duration,
    op: F,
) -> Result<T, CapabilityError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, CapabilityError>>,
{
    let mut delay = backoff;
    let mut last_err;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                last_err = e;
            }
        }

        if attempt > retries {
            return Err(last_err);
        }

        warn!(
            capability,
            attempt,
            max_attempts = retries + 1,
            error = %last_err,
            "Capability call failed, retrying"
        );
        tokio::time::sleep(delay).await;
        delay = delay.saturating_mul(2);
    }
}
