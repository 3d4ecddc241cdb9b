//! Segment fetcher: one whole-resource HTTP GET per segment, buffered in
//! memory, with private retries and cancellation.
//!
//! The fetcher owns retry policy entirely: transient failures (timeouts,
//! throttling, 5xx, short bodies) are retried with backoff and never
//! surface past it. One `FetchError` per segment, after retries are
//! exhausted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::control::CancelToken;
use crate::retry::{classify, run_with_retry, AttemptError, ErrorKind, RetryPolicy};
use crate::segment::SegmentRef;

/// Terminal failure for one segment, reported exactly once after the retry
/// policy is exhausted.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// Connection-level failure (DNS, refused, reset, TLS).
    #[error("unreachable: {0}")]
    Unreachable(String),
    /// Final response had a non-2xx status.
    #[error("HTTP {0}")]
    BadStatus(u32),
    /// Body ended short of the advertised length on every attempt.
    #[error("truncated: expected {expected} bytes, got {received}")]
    Truncated { expected: u64, received: u64 },
    /// Transfer exceeded the per-fetch wall-clock timeout.
    #[error("timed out")]
    Timeout,
    /// Transfer abandoned because the merge was cancelled.
    #[error("cancelled")]
    Cancelled,
}

/// Retrieves the full byte content of one segment. Implementations must not
/// expose partial output on failure and must observe the cancellation token
/// within a bounded grace period, reporting `Cancelled` rather than success.
pub trait Fetch: Send + Sync {
    fn fetch(&self, segment: &SegmentRef, cancel: &CancelToken) -> Result<Vec<u8>, FetchError>;
}

/// Per-transfer curl knobs.
#[derive(Debug, Clone, Copy)]
pub struct TransferOptions {
    /// Hard wall-clock timeout for one fetch attempt.
    pub per_fetch_timeout: Duration,
    /// Optional receive-rate cap in bytes per second.
    pub max_recv_speed: Option<u64>,
    /// Optional curl receive buffer size.
    pub buffer_size: Option<usize>,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            per_fetch_timeout: Duration::from_secs(120),
            max_recv_speed: None,
            buffer_size: None,
        }
    }
}

/// Counters of transient events observed across a fetcher's lifetime, for
/// bench reporting and adaptive tuning. A throttle event is a 429/503
/// attempt; a retry event is any other retryable attempt failure.
#[derive(Debug, Default)]
pub struct FetchEvents {
    pub throttle_events: AtomicU32,
    pub error_events: AtomicU32,
}

/// Production fetcher: one curl easy transfer per attempt, body buffered in
/// memory. Cheap to share across worker threads (no per-fetch state).
pub struct HttpFetcher {
    headers: HashMap<String, String>,
    policy: RetryPolicy,
    transfer: TransferOptions,
    events: Arc<FetchEvents>,
}

impl HttpFetcher {
    pub fn new(policy: RetryPolicy, transfer: TransferOptions) -> Self {
        Self {
            headers: HashMap::new(),
            policy,
            transfer,
            events: Arc::new(FetchEvents::default()),
        }
    }

    /// Extra request headers sent with every fetch (e.g. Referer, auth).
    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    /// Shared transient-event counters for this fetcher.
    pub fn events(&self) -> Arc<FetchEvents> {
        Arc::clone(&self.events)
    }

    /// One transfer attempt: GET `url`, buffer the body, verify status and
    /// advertised length. The buffer is dropped on any failure.
    fn fetch_once(&self, url: &str, cancel: &CancelToken) -> Result<Vec<u8>, AttemptError> {
        if cancel.is_cancelled() {
            return Err(AttemptError::Interrupted);
        }

        let mut easy = curl::easy::Easy::new();
        easy.url(url)?;
        easy.follow_location(true)?;
        easy.max_redirections(10)?;
        easy.connect_timeout(Duration::from_secs(30))?;
        easy.timeout(self.transfer.per_fetch_timeout)?;
        // Low-speed abort: a transfer crawling below 1 KiB/s for 30s is as
        // good as dead; fail it so the retry policy can take over.
        easy.low_speed_limit(1024)?;
        easy.low_speed_time(Duration::from_secs(30))?;
        if let Some(speed) = self.transfer.max_recv_speed {
            easy.max_recv_speed(speed)?;
        }
        if let Some(sz) = self.transfer.buffer_size {
            easy.buffer_size(sz)?;
        }
        easy.progress(true)?;

        if !self.headers.is_empty() {
            let mut list = curl::easy::List::new();
            for (k, v) in &self.headers {
                list.append(&format!("{}: {}", k.trim(), v.trim()))?;
            }
            easy.http_headers(list)?;
        }

        let mut body: Vec<u8> = Vec::new();
        let mut expected_len: Option<u64> = None;
        {
            let cancel = cancel.clone();
            let mut transfer = easy.transfer();
            transfer.header_function(|header| {
                // Redirect hops each produce a header block; the last
                // Content-Length seen belongs to the final response.
                if let Ok(line) = std::str::from_utf8(header) {
                    if let Some((name, value)) = line.split_once(':') {
                        if name.trim().eq_ignore_ascii_case("content-length") {
                            expected_len = value.trim().parse::<u64>().ok();
                        }
                    }
                }
                true
            })?;
            transfer.write_function(|data| {
                body.extend_from_slice(data);
                Ok(data.len())
            })?;
            transfer.progress_function(move |_, _, _, _| !cancel.is_cancelled())?;
            if let Err(e) = transfer.perform() {
                if e.is_aborted_by_callback() {
                    return Err(AttemptError::Interrupted);
                }
                return Err(AttemptError::Transport(e));
            }
        }

        let code = easy.response_code()?;
        if !(200..300).contains(&code) {
            return Err(AttemptError::Status(code));
        }

        if let Some(expected) = expected_len {
            let received = body.len() as u64;
            if received != expected {
                return Err(AttemptError::Truncated { expected, received });
            }
        }

        Ok(body)
    }

    fn record_event(&self, e: &AttemptError) {
        match classify(e) {
            ErrorKind::Throttled => {
                self.events.throttle_events.fetch_add(1, Ordering::Relaxed);
            }
            ErrorKind::Timeout | ErrorKind::Connection | ErrorKind::Http5xx(_) => {
                self.events.error_events.fetch_add(1, Ordering::Relaxed);
            }
            ErrorKind::Other => {}
        }
    }
}

impl Fetch for HttpFetcher {
    fn fetch(&self, segment: &SegmentRef, cancel: &CancelToken) -> Result<Vec<u8>, FetchError> {
        let result = run_with_retry(&self.policy, || {
            self.fetch_once(&segment.locator, cancel).map_err(|e| {
                self.record_event(&e);
                e
            })
        });
        result.map_err(|e| {
            tracing::debug!(index = segment.index, error = %e, "segment fetch gave up");
            to_fetch_error(e)
        })
    }
}

/// Map an exhausted attempt error to the public taxonomy.
fn to_fetch_error(e: AttemptError) -> FetchError {
    match e {
        AttemptError::Interrupted => FetchError::Cancelled,
        AttemptError::Status(code) => FetchError::BadStatus(code),
        AttemptError::Truncated { expected, received } => {
            FetchError::Truncated { expected, received }
        }
        AttemptError::Transport(ce) => {
            if ce.is_operation_timedout() {
                FetchError::Timeout
            } else {
                FetchError::Unreachable(ce.to_string())
            }
        }
    }
}
