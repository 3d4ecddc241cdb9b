//! Classify attempt errors into retry policy error kinds.

use super::error::AttemptError;
use super::policy::ErrorKind;

/// Classify an HTTP status code for retry decisions. 4xx is the caller's
/// problem and is not retried.
pub fn classify_http_status(code: u32) -> ErrorKind {
    match code {
        429 | 503 => ErrorKind::Throttled,
        500..=599 => ErrorKind::Http5xx(code as u16),
        _ => ErrorKind::Other,
    }
}

/// Classify a curl error for retry decisions.
pub fn classify_curl_error(e: &curl::Error) -> ErrorKind {
    if e.is_operation_timedout() {
        return ErrorKind::Timeout;
    }
    if e.is_couldnt_connect()
        || e.is_couldnt_resolve_host()
        || e.is_couldnt_resolve_proxy()
        || e.is_read_error()
        || e.is_recv_error()
        || e.is_send_error()
        || e.is_got_nothing()
        || e.is_partial_file()
    {
        return ErrorKind::Connection;
    }
    ErrorKind::Other
}

/// Classify an attempt error into an ErrorKind. Short bodies count as
/// connection failures (the transfer can be retried whole); interruption by
/// cancellation is never retried.
pub fn classify(e: &AttemptError) -> ErrorKind {
    match e {
        AttemptError::Transport(ce) => classify_curl_error(ce),
        AttemptError::Status(code) => classify_http_status(*code),
        AttemptError::Truncated { .. } => ErrorKind::Connection,
        AttemptError::Interrupted => ErrorKind::Other,
    }
}
