//! Retry loop: run a fallible fetch until success or policy says stop.

use super::classify;
use super::error::AttemptError;
use super::policy::{RetryDecision, RetryPolicy};

/// Runs `f` until it succeeds or the policy declines another attempt. On a
/// retryable failure, sleeps for the backoff duration and tries again. The
/// payload of the successful attempt is returned as-is.
pub fn run_with_retry<T, F>(policy: &RetryPolicy, mut f: F) -> Result<T, AttemptError>
where
    F: FnMut() -> Result<T, AttemptError>,
{
    let mut attempt = 1u32;
    loop {
        match f() {
            Ok(v) => return Ok(v),
            Err(e) => {
                let kind = classify::classify(&e);
                match policy.decide(attempt, kind) {
                    RetryDecision::NoRetry => return Err(e),
                    RetryDecision::RetryAfter(d) => {
                        tracing::debug!(attempt, ?kind, delay_ms = d.as_millis() as u64, "retrying fetch");
                        std::thread::sleep(d);
                        attempt += 1;
                    }
                }
            }
        }
    }
}
