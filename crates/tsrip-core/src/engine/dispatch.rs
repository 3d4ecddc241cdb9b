//! Dispatcher: a fixed worker pool draining the ordered segment list.
//!
//! Workers pull from a shared queue, acquire one admission slot per fetch,
//! and hand index-tagged results to the collector over a bounded channel
//! (backpressure against fetch-ahead runaway). Exactly one outcome is sent
//! per popped segment, including failures; once cancellation is observed no
//! further segments are popped.

use std::collections::VecDeque;
use std::sync::mpsc::SyncSender;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use super::fetch::Fetch;
use super::pool::AdmissionPool;
use super::SegmentOutcome;
use crate::control::CancelToken;
use crate::segment::SegmentRef;

/// Spawn `worker_count` fetch workers over the shared `work` queue. Each
/// returned handle must be joined after the result channel drains.
pub(super) fn spawn_workers(
    work: Arc<Mutex<VecDeque<SegmentRef>>>,
    fetcher: Arc<dyn Fetch>,
    pool: Arc<AdmissionPool>,
    cancel: CancelToken,
    tx: SyncSender<SegmentOutcome>,
    worker_count: usize,
) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::with_capacity(worker_count);
    for _ in 0..worker_count {
        let work = Arc::clone(&work);
        let fetcher = Arc::clone(&fetcher);
        let pool = Arc::clone(&pool);
        let cancel = cancel.clone();
        let tx = tx.clone();
        handles.push(std::thread::spawn(move || loop {
            if cancel.is_cancelled() {
                break;
            }
            let segment = match work.lock().unwrap().pop_front() {
                Some(s) => s,
                None => break,
            };
            let result = {
                let _slot = pool.acquire();
                fetcher.fetch(&segment, &cancel)
            };
            // The slot is already released: sending may block on the
            // bounded channel, and a held slot would stall other fetches.
            if tx
                .send(SegmentOutcome {
                    index: segment.index,
                    result,
                })
                .is_err()
            {
                break;
            }
        }));
    }
    handles
}
