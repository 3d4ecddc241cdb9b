//! Benchmark mode: try different admission limits and report throughput.
//!
//! Runs the same merge at concurrency 4, 8, and 16 against a scratch sink
//! in a temp dir, reporting throughput (MiB/s), throttle events, retryable
//! error events, and a recommended concurrency. Intended for tuning against
//! a particular CDN; the playlist is fetched in full once per level, so use
//! a short one.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Instant;

use crate::config::{PartialOutputPolicy, RipConfig};
use crate::control::CancelToken;
use crate::engine::{self, FileSink, HttpFetcher, MergeOptions, MergeStatus};
use crate::segment::SegmentRef;

/// Concurrency levels exercised by a bench run.
pub const BENCH_LEVELS: [usize; 3] = [4, 8, 16];

/// Result of one benchmark run (one admission limit).
#[derive(Debug, Clone)]
pub struct BenchResult {
    pub concurrency: usize,
    pub bytes_downloaded: u64,
    pub elapsed_secs: f64,
    pub throughput_mib_s: f64,
    pub throttle_events: u32,
    pub error_events: u32,
}

/// Runs the merge once per concurrency level, measuring throughput and
/// transient-event counts. A failed level still contributes a result with
/// whatever bytes its prefix reached. Runs on the current thread (call
/// from `spawn_blocking` if used from async).
pub fn run_bench(segments: &[SegmentRef], cfg: &RipConfig) -> Result<Vec<BenchResult>> {
    if segments.is_empty() {
        anyhow::bail!("playlist has no segments to benchmark");
    }

    let mut results = Vec::with_capacity(BENCH_LEVELS.len());
    for &concurrency in &BENCH_LEVELS {
        let scratch = tempfile::tempdir().context("create temp dir for bench")?;
        let dest = scratch.path().join("bench.ts");

        let mut opts = MergeOptions::from_config(cfg);
        opts.concurrency = concurrency;
        let fetcher = HttpFetcher::new(opts.retry, opts.transfer);
        let events = fetcher.events();
        let mut sink = FileSink::create(&dest, PartialOutputPolicy::Keep)
            .with_context(|| format!("create scratch sink in {}", scratch.path().display()))?;

        let start = Instant::now();
        let status = engine::run_merge(
            segments,
            Arc::new(fetcher),
            &mut sink,
            &opts,
            CancelToken::new(),
            None,
        )?;
        let elapsed = start.elapsed().as_secs_f64();

        let bytes_downloaded = match status {
            MergeStatus::Completed { total_bytes } => total_bytes,
            MergeStatus::Failed { at_index, cause } => {
                tracing::warn!(concurrency, at_index, error = %cause, "bench run failed partway");
                // The kept .part prefix is what actually landed.
                std::fs::metadata(engine::temp_path(&dest))
                    .map(|m| m.len())
                    .unwrap_or(0)
            }
        };

        let throughput_mib_s = if elapsed > 0.0 && bytes_downloaded > 0 {
            (bytes_downloaded as f64 / 1_048_576.0) / elapsed
        } else {
            0.0
        };

        results.push(BenchResult {
            concurrency,
            bytes_downloaded,
            elapsed_secs: elapsed,
            throughput_mib_s,
            throttle_events: events
                .throttle_events
                .load(std::sync::atomic::Ordering::Relaxed),
            error_events: events
                .error_events
                .load(std::sync::atomic::Ordering::Relaxed),
        });
    }

    Ok(results)
}

/// Picks a recommended concurrency: best throughput among runs with no
/// retryable errors; if every run saw errors, best throughput overall.
pub fn recommend_concurrency(results: &[BenchResult]) -> Option<usize> {
    if results.is_empty() {
        return None;
    }
    let best_no_errors = results
        .iter()
        .filter(|r| r.error_events == 0 && r.throttle_events == 0)
        .max_by(|a, b| {
            a.throughput_mib_s
                .partial_cmp(&b.throughput_mib_s)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    let best = best_no_errors.or_else(|| {
        results.iter().max_by(|a, b| {
            a.throughput_mib_s
                .partial_cmp(&b.throughput_mib_s)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
    })?;
    Some(best.concurrency)
}
