//! Cancellation: a shared token observed by every stage of a merge.
//!
//! One token per merge operation. Raised either by the first terminal
//! failure (fail-fast) or by an external caller (e.g. Ctrl-C in the CLI).
//! Workers stop taking new work, in-flight transfers are abandoned via the
//! fetcher's progress callback, and the collector stops emitting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Error returned when a merge is stopped by an external cancellation
/// request rather than a segment failure.
#[derive(Debug)]
pub struct MergeAborted;

impl std::fmt::Display for MergeAborted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "merge aborted by caller")
    }
}

impl std::error::Error for MergeAborted {}

/// Cloneable cancellation flag shared between the dispatcher, workers,
/// fetchers, and the collector. Raising it is idempotent and one-way.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. All clones observe the flag.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}
