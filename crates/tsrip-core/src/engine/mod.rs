//! Concurrent fetch and ordered merge of playlist segments.
//!
//! Consumes an ordered segment list, fetches up to `concurrency` segments
//! in parallel through the admission pool, and reassembles the results into
//! the sink strictly in playlist order — output bytes are identical to
//! sequential concatenation no matter how completion order is scrambled.
//! One segment failing fails the whole merge (fail-fast): cancellation
//! propagates to every in-flight fetch, the already-emitted prefix stays
//! valid, and exactly one terminal status is reported.

mod collect;
mod dispatch;
mod fetch;
mod pool;
mod progress;
mod sink;

pub use collect::ConsistencyError;
pub use fetch::{Fetch, FetchError, FetchEvents, HttpFetcher, TransferOptions};
pub use pool::{AdmissionPool, SlotGuard};
pub use progress::MergeProgress;
pub use sink::{temp_path, FileSink, Sink, SinkError, StreamSink, TEMP_SUFFIX};

use std::collections::VecDeque;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;
use thiserror::Error;

use crate::config::RipConfig;
use crate::control::CancelToken;
use crate::retry::RetryPolicy;
use crate::segment::SegmentRef;

/// Index-tagged result of one segment fetch, produced exactly once per
/// dispatched segment.
#[derive(Debug)]
pub struct SegmentOutcome {
    pub index: usize,
    pub result: Result<Vec<u8>, FetchError>,
}

/// What sank a failed merge: the fetch side or the destination side.
#[derive(Debug, Error)]
pub enum FailureCause {
    #[error("fetch: {0}")]
    Fetch(#[from] FetchError),
    #[error("sink: {0}")]
    Sink(#[from] SinkError),
}

/// Terminal status of one merge. Exactly one per invocation: a short
/// output is always accompanied by `Failed` naming the failing index.
#[derive(Debug)]
pub enum MergeStatus {
    Completed { total_bytes: u64 },
    Failed { at_index: usize, cause: FailureCause },
}

/// Knobs for one merge run.
#[derive(Debug, Clone)]
pub struct MergeOptions {
    /// Maximum number of segment fetches in flight at once.
    pub concurrency: usize,
    /// Retry policy applied privately by the fetcher.
    pub retry: RetryPolicy,
    /// Per-transfer options handed to the fetcher.
    pub transfer: TransferOptions,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            concurrency: 12,
            retry: RetryPolicy::default(),
            transfer: TransferOptions::default(),
        }
    }
}

impl MergeOptions {
    pub fn from_config(cfg: &RipConfig) -> Self {
        Self {
            concurrency: cfg.concurrency.max(1),
            retry: RetryPolicy::from_config(cfg.retry.as_ref()),
            transfer: TransferOptions {
                per_fetch_timeout: Duration::from_secs(cfg.per_fetch_timeout_secs.max(1)),
                max_recv_speed: cfg.max_bytes_per_sec,
                buffer_size: cfg.fetch_buffer_bytes,
            },
        }
    }
}

/// Runs one fetch-and-merge operation to completion.
///
/// Returns `Ok(MergeStatus)` for both outcomes a caller can act on:
/// `Completed` with the byte count, or `Failed` naming the first failing
/// index and its cause (the emitted prefix is disposed of per the sink's
/// partial-output policy). `Err` is reserved for faults outside the merge
/// contract: input-contract violations, duplicate results, finalize
/// failures, and external cancellation (`MergeAborted`).
pub fn run_merge(
    segments: &[SegmentRef],
    fetcher: Arc<dyn Fetch>,
    sink: &mut dyn Sink,
    opts: &MergeOptions,
    cancel: CancelToken,
    progress_tx: Option<tokio::sync::mpsc::Sender<MergeProgress>>,
) -> Result<MergeStatus> {
    for (position, s) in segments.iter().enumerate() {
        if s.index != position {
            anyhow::bail!(
                "segment list violates the input contract: index {} at position {}",
                s.index,
                position
            );
        }
    }

    let total = segments.len();
    if total == 0 {
        sink.complete()?;
        return Ok(MergeStatus::Completed { total_bytes: 0 });
    }

    let concurrency = opts.concurrency.max(1);
    let worker_count = concurrency.min(total);
    tracing::info!(segments = total, concurrency, "starting merge");
    let started = Instant::now();

    let work: Arc<Mutex<VecDeque<SegmentRef>>> =
        Arc::new(Mutex::new(segments.iter().cloned().collect()));
    let pool = Arc::new(AdmissionPool::new(concurrency));
    let (tx, rx) = mpsc::sync_channel::<SegmentOutcome>(concurrency);

    let handles = dispatch::spawn_workers(work, fetcher, pool, cancel.clone(), tx, worker_count);

    let status = collect::collect(rx, total, sink, &cancel, progress_tx.as_ref(), started);

    let mut worker_panic = false;
    for h in handles {
        if h.join().is_err() {
            worker_panic = true;
        }
    }

    let status = status?;
    if worker_panic {
        anyhow::bail!("fetch worker panicked during merge");
    }

    match &status {
        MergeStatus::Completed { total_bytes } => {
            tracing::info!(
                total_bytes = *total_bytes,
                elapsed_secs = started.elapsed().as_secs_f64(),
                "merge completed"
            );
        }
        MergeStatus::Failed { at_index, cause } => {
            tracing::warn!(at_index = *at_index, error = %cause, "merge failed");
        }
    }
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::segment_list;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Deterministic payload for segment `index` in tests.
    fn payload(index: usize) -> Vec<u8> {
        let mut v = vec![index as u8; 64 + index];
        v.push(0xFE);
        v
    }

    /// Fetcher scripted with per-index delays and failures, tracking the
    /// peak number of concurrently active fetches.
    #[derive(Default)]
    struct ScriptedFetcher {
        delays: HashMap<usize, Duration>,
        failures: HashMap<usize, FetchError>,
        active: AtomicUsize,
        peak: AtomicUsize,
        fetches: AtomicUsize,
    }

    impl ScriptedFetcher {
        fn delay(mut self, index: usize, ms: u64) -> Self {
            self.delays.insert(index, Duration::from_millis(ms));
            self
        }

        fn fail(mut self, index: usize, e: FetchError) -> Self {
            self.failures.insert(index, e);
            self
        }

        fn peak(&self) -> usize {
            self.peak.load(Ordering::Relaxed)
        }

        fn fetches(&self) -> usize {
            self.fetches.load(Ordering::Relaxed)
        }
    }

    impl Fetch for ScriptedFetcher {
        fn fetch(&self, segment: &SegmentRef, cancel: &CancelToken) -> Result<Vec<u8>, FetchError> {
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }
            self.fetches.fetch_add(1, Ordering::Relaxed);
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if let Some(d) = self.delays.get(&segment.index) {
                std::thread::sleep(*d);
            }
            let result = match self.failures.get(&segment.index) {
                Some(e) => Err(e.clone()),
                None => Ok(payload(segment.index)),
            };
            self.active.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }

    fn merge_with(
        fetcher: Arc<ScriptedFetcher>,
        count: usize,
        concurrency: usize,
    ) -> (Result<MergeStatus>, Vec<u8>) {
        let segments = segment_list((0..count).map(|i| format!("seg/{}.ts", i)));
        let mut sink = StreamSink::new(Vec::new());
        let opts = MergeOptions {
            concurrency,
            ..MergeOptions::default()
        };
        let status = run_merge(
            &segments,
            fetcher,
            &mut sink,
            &opts,
            CancelToken::new(),
            None,
        );
        (status, sink.into_inner())
    }

    fn concat(indices: std::ops::Range<usize>) -> Vec<u8> {
        indices.flat_map(payload).collect()
    }

    #[test]
    fn scrambled_completion_order_yields_playlist_order() {
        // Completion order C, A, D, B by construction.
        let fetcher = Arc::new(
            ScriptedFetcher::default()
                .delay(2, 0)
                .delay(0, 20)
                .delay(3, 40)
                .delay(1, 60),
        );
        let (status, bytes) = merge_with(fetcher, 4, 4);
        assert_eq!(bytes, concat(0..4));
        match status.unwrap() {
            MergeStatus::Completed { total_bytes } => {
                assert_eq!(total_bytes, bytes.len() as u64)
            }
            other => panic!("expected Completed, got {:?}", other),
        }
    }

    #[test]
    fn no_loss_no_duplication_across_many_segments() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        let (status, bytes) = merge_with(Arc::clone(&fetcher), 40, 6);
        assert!(matches!(status.unwrap(), MergeStatus::Completed { .. }));
        assert_eq!(bytes, concat(0..40));
        assert_eq!(fetcher.fetches(), 40);
    }

    #[test]
    fn concurrency_stays_within_the_admission_limit() {
        for limit in [1usize, 2, 3] {
            let fetcher = Arc::new({
                let mut f = ScriptedFetcher::default();
                for i in 0..18 {
                    f.delays.insert(i, Duration::from_millis(5));
                }
                f
            });
            let (status, _) = merge_with(Arc::clone(&fetcher), 18, limit);
            assert!(matches!(status.unwrap(), MergeStatus::Completed { .. }));
            assert!(
                fetcher.peak() <= limit,
                "peak {} exceeded limit {}",
                fetcher.peak(),
                limit
            );
        }
    }

    #[test]
    fn failed_segment_keeps_prefix_and_reports_index() {
        // Indices 0 and 1 land before 2's failure arrives.
        let fetcher = Arc::new(
            ScriptedFetcher::default()
                .fail(2, FetchError::Unreachable("connection refused".into()))
                .delay(2, 60),
        );
        let (status, bytes) = merge_with(Arc::clone(&fetcher), 5, 2);
        match status.unwrap() {
            MergeStatus::Failed { at_index, cause } => {
                assert_eq!(at_index, 2);
                assert!(matches!(cause, FailureCause::Fetch(FetchError::Unreachable(_))));
            }
            other => panic!("expected Failed, got {:?}", other),
        }
        assert_eq!(bytes, concat(0..2), "output is exactly the valid prefix");
    }

    #[test]
    fn single_segment_timeout_fails_at_zero() {
        let fetcher = Arc::new(ScriptedFetcher::default().fail(0, FetchError::Timeout));
        let (status, bytes) = merge_with(fetcher, 1, 4);
        match status.unwrap() {
            MergeStatus::Failed { at_index, cause } => {
                assert_eq!(at_index, 0);
                assert!(matches!(cause, FailureCause::Fetch(FetchError::Timeout)));
            }
            other => panic!("expected Failed, got {:?}", other),
        }
        assert!(bytes.is_empty());
    }

    #[test]
    fn rerun_produces_identical_bytes() {
        let first = merge_with(
            Arc::new(ScriptedFetcher::default().delay(0, 30).delay(4, 10)),
            8,
            3,
        );
        let second = merge_with(
            Arc::new(ScriptedFetcher::default().delay(7, 25).delay(1, 5)),
            8,
            3,
        );
        assert!(matches!(first.0.unwrap(), MergeStatus::Completed { .. }));
        assert!(matches!(second.0.unwrap(), MergeStatus::Completed { .. }));
        assert_eq!(first.1, second.1, "timing must not influence output bytes");
    }

    #[test]
    fn empty_list_completes_with_zero_bytes() {
        let (status, bytes) = merge_with(Arc::new(ScriptedFetcher::default()), 0, 4);
        assert!(matches!(
            status.unwrap(),
            MergeStatus::Completed { total_bytes: 0 }
        ));
        assert!(bytes.is_empty());
    }

    #[test]
    fn non_contiguous_input_is_rejected_before_fetching() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        let segments = vec![
            SegmentRef {
                index: 0,
                locator: "a".into(),
            },
            SegmentRef {
                index: 2,
                locator: "b".into(),
            },
        ];
        let mut sink = StreamSink::new(Vec::new());
        let status = run_merge(
            &segments,
            Arc::clone(&fetcher) as Arc<dyn Fetch>,
            &mut sink,
            &MergeOptions::default(),
            CancelToken::new(),
            None,
        );
        assert!(status.is_err());
        assert_eq!(fetcher.fetches(), 0, "no fetch before contract check");
    }

    #[test]
    fn pre_cancelled_merge_aborts_without_fetching() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        let segments = segment_list(["a", "b", "c"]);
        let mut sink = StreamSink::new(Vec::new());
        let cancel = CancelToken::new();
        cancel.cancel();
        let status = run_merge(
            &segments,
            Arc::clone(&fetcher) as Arc<dyn Fetch>,
            &mut sink,
            &MergeOptions::default(),
            cancel,
            None,
        );
        let err = status.unwrap_err();
        assert!(err
            .downcast_ref::<crate::control::MergeAborted>()
            .is_some());
        assert_eq!(fetcher.fetches(), 0);
        assert!(sink.into_inner().is_empty());
    }
}
