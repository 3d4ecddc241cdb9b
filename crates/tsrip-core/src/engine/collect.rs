//! Ordered collector: turns index-tagged results arriving in completion
//! order into a byte stream in playlist order.
//!
//! Core algorithm: a cursor (`next_index`) plus a pending map of
//! early arrivals. A result matching the cursor is emitted immediately,
//! then the contiguous run it unblocks is drained from the pending map.
//! The pending map is bounded by the admission limit in the common case,
//! but can grow past it if one early segment stalls while later ones race
//! ahead; that trade-off buys streaming output without full buffering.

use std::collections::BTreeMap;
use std::sync::mpsc::Receiver;
use std::time::Instant;

use anyhow::Result;
use thiserror::Error;

use super::progress::MergeProgress;
use super::sink::Sink;
use super::{FailureCause, MergeStatus, SegmentOutcome};
use crate::control::{CancelToken, MergeAborted};
use crate::engine::fetch::FetchError;

/// Send a progress snapshot every N results (and once at the end) so slow
/// consumers don't see a flood.
const COALESCE_PROGRESS_EVERY: usize = 2;

/// Duplicate or out-of-range segment index: a violation of the input
/// contract (0-based, unique, contiguous). Always fatal, never retried.
#[derive(Debug, Error)]
#[error("segment index {index} arrived with emission cursor at {cursor}: duplicate or out-of-range result")]
pub struct ConsistencyError {
    pub index: usize,
    pub cursor: usize,
}

struct Collector<'a> {
    next_index: usize,
    total: usize,
    pending: BTreeMap<usize, Vec<u8>>,
    bytes_emitted: u64,
    sink: &'a mut dyn Sink,
}

impl<'a> Collector<'a> {
    /// Fold one successful payload in: emit if it matches the cursor (plus
    /// whatever run it unblocks), otherwise buffer it. A sink failure is
    /// reported at the index whose payload failed to write.
    fn accept(&mut self, index: usize, payload: Vec<u8>) -> Result<Option<(usize, FailureCause)>> {
        if index < self.next_index
            || index >= self.total
            || (index > self.next_index && self.pending.contains_key(&index))
        {
            return Err(ConsistencyError {
                index,
                cursor: self.next_index,
            }
            .into());
        }

        if index > self.next_index {
            self.pending.insert(index, payload);
            return Ok(None);
        }

        let mut chunk = payload;
        loop {
            if let Err(e) = self.sink.append(&chunk) {
                return Ok(Some((self.next_index, FailureCause::Sink(e))));
            }
            self.bytes_emitted += chunk.len() as u64;
            self.next_index += 1;
            match self.pending.remove(&self.next_index) {
                Some(next) => chunk = next,
                None => break,
            }
        }
        Ok(None)
    }
}

/// Drains the result channel until every sender is gone, emitting payloads
/// in ascending index order.
///
/// Fail-fast: the first failure to arrive raises `cancel`, suppresses all
/// further emission, and becomes the reported status. Receiving continues
/// after that so no worker ever blocks forever on the bounded hand-off
/// channel. Already-emitted output stays valid; the sink is released via
/// `abandon` (partial-output policy applies).
pub(super) fn collect(
    rx: Receiver<SegmentOutcome>,
    total: usize,
    sink: &mut dyn Sink,
    cancel: &CancelToken,
    progress_tx: Option<&tokio::sync::mpsc::Sender<MergeProgress>>,
    started: Instant,
) -> Result<MergeStatus> {
    let mut collector = Collector {
        next_index: 0,
        total,
        pending: BTreeMap::new(),
        bytes_emitted: 0,
        sink,
    };
    let mut failure: Option<(usize, FailureCause)> = None;
    let mut received = 0usize;
    let mut since_progress = 0usize;

    for outcome in rx {
        received += 1;
        match outcome.result {
            Ok(payload) => {
                if failure.is_none() && !cancel.is_cancelled() {
                    let accepted = match collector.accept(outcome.index, payload) {
                        Ok(a) => a,
                        Err(e) => {
                            cancel.cancel();
                            return Err(e);
                        }
                    };
                    if let Some(f) = accepted {
                        tracing::error!(index = f.0, error = %f.1, "sink failed, cancelling merge");
                        cancel.cancel();
                        failure = Some(f);
                    }
                }
                // Otherwise the payload is dropped: emission is suppressed
                // once the merge is failed or cancelled.
            }
            Err(FetchError::Cancelled) => {
                tracing::debug!(index = outcome.index, "fetch cancelled during wind-down");
            }
            Err(e) => {
                if failure.is_none() {
                    tracing::error!(index = outcome.index, error = %e, "segment failed, cancelling merge");
                    cancel.cancel();
                    failure = Some((outcome.index, FailureCause::Fetch(e)));
                } else {
                    tracing::debug!(index = outcome.index, error = %e, "segment failed after merge already failed");
                }
            }
        }

        since_progress += 1;
        if let Some(tx) = progress_tx {
            if since_progress >= COALESCE_PROGRESS_EVERY || received == total {
                let _ = tx.try_send(MergeProgress {
                    segment_count: total,
                    segments_fetched: received,
                    segments_emitted: collector.next_index,
                    bytes_emitted: collector.bytes_emitted,
                    pending_depth: collector.pending.len(),
                    elapsed_secs: started.elapsed().as_secs_f64(),
                });
                since_progress = 0;
            }
        }
    }

    if let Some((at_index, cause)) = failure {
        collector.sink.abandon();
        return Ok(MergeStatus::Failed { at_index, cause });
    }
    if cancel.is_cancelled() {
        collector.sink.abandon();
        return Err(MergeAborted.into());
    }
    if collector.next_index != total {
        // No failure arrived yet the stream is incomplete: a worker died
        // without reporting, or the dispatcher dropped a result.
        collector.sink.abandon();
        anyhow::bail!(
            "merge ended with {} of {} segments emitted and no failure reported",
            collector.next_index,
            total
        );
    }

    collector.sink.complete()?;
    Ok(MergeStatus::Completed {
        total_bytes: collector.bytes_emitted,
    })
}
