//! Attempt-level fetch error, classified before retry decisions.

use thiserror::Error;

/// Error from a single fetch attempt (one curl transfer). Classified by
/// `classify` to decide retries; mapped to the public failure taxonomy only
/// after the retry policy gives up.
#[derive(Debug, Error)]
pub enum AttemptError {
    /// Curl reported a transport-level error (timeout, connection, TLS, ...).
    #[error("{0}")]
    Transport(#[from] curl::Error),
    /// HTTP response had a non-2xx status.
    #[error("HTTP {0}")]
    Status(u32),
    /// Body ended short of the advertised Content-Length (e.g. server
    /// closed early). Retryable, so a flaky connection is not mistaken for
    /// a valid short segment.
    #[error("truncated body: expected {expected} bytes, got {received}")]
    Truncated { expected: u64, received: u64 },
    /// Transfer abandoned because cancellation was observed. Never retried.
    #[error("transfer interrupted by cancellation")]
    Interrupted,
}
