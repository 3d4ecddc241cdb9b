//! `tsrip fetch` – fetch a playlist's segments and assemble the output file.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tsrip_core::checksum;
use tsrip_core::config::{PartialOutputPolicy, RipConfig};
use tsrip_core::control::CancelToken;
use tsrip_core::engine::{
    self, temp_path, FileSink, HttpFetcher, MergeOptions, MergeProgress, MergeStatus,
};

use super::load_segments;

pub async fn run_fetch(
    cfg: &RipConfig,
    playlist: &str,
    output: &Path,
    concurrency: Option<usize>,
    timeout_secs: Option<u64>,
    discard_partial: bool,
    print_checksum: bool,
) -> Result<()> {
    let segments = load_segments(cfg, playlist).await?;
    if segments.is_empty() {
        println!("Playlist has no segments; nothing to fetch.");
        return Ok(());
    }
    println!("{} segments to fetch", segments.len());

    let mut opts = MergeOptions::from_config(cfg);
    if let Some(n) = concurrency {
        opts.concurrency = n.max(1);
    }
    if let Some(secs) = timeout_secs {
        opts.transfer.per_fetch_timeout = Duration::from_secs(secs.max(1));
    }
    let policy = if discard_partial {
        PartialOutputPolicy::Discard
    } else {
        cfg.partial_output
    };

    let cancel = CancelToken::new();
    let ctrl_c_cancel = cancel.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\ninterrupt received, stopping fetches...");
            ctrl_c_cancel.cancel();
        }
    });

    let (progress_tx, mut progress_rx) = tokio::sync::mpsc::channel::<MergeProgress>(16);
    const PROGRESS_INTERVAL_MS: u64 = 500;
    let progress_handle = tokio::spawn(async move {
        let mut last_print = Instant::now();
        while let Some(p) = progress_rx.recv().await {
            let now = Instant::now();
            if now.duration_since(last_print).as_millis() as u64 >= PROGRESS_INTERVAL_MS
                || p.segments_emitted >= p.segment_count
            {
                let done_mib = p.bytes_emitted as f64 / 1_048_576.0;
                let rate_mib = p.bytes_per_sec() / 1_048_576.0;
                let eta = p
                    .eta_secs()
                    .map(|s| format!("{:.0}s", s))
                    .unwrap_or_else(|| "?".to_string());
                println!(
                    "\r  {}/{} segments  {:.1} MiB  {:.2} MiB/s  ETA {}  ",
                    p.segments_emitted, p.segment_count, done_mib, rate_mib, eta
                );
                last_print = now;
            }
        }
        println!();
    });

    let status = {
        let output = output.to_path_buf();
        let opts = opts.clone();
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || -> Result<MergeStatus> {
            let fetcher = HttpFetcher::new(opts.retry, opts.transfer);
            let mut sink = FileSink::create(&output, policy)
                .with_context(|| format!("create output {}", output.display()))?;
            engine::run_merge(
                &segments,
                Arc::new(fetcher),
                &mut sink,
                &opts,
                cancel,
                Some(progress_tx),
            )
        })
        .await
        .context("merge task join")??
    };

    ctrl_c.abort();
    let _ = progress_handle.await;

    match status {
        MergeStatus::Completed { total_bytes } => {
            println!(
                "Saved {:.1} MiB to {}",
                total_bytes as f64 / 1_048_576.0,
                output.display()
            );
            if print_checksum {
                let digest = checksum::sha256_path(output)?;
                println!("{}  {}", digest, output.display());
            }
            Ok(())
        }
        MergeStatus::Failed { at_index, cause } => {
            if policy == PartialOutputPolicy::Keep && temp_path(output).exists() {
                eprintln!(
                    "partial output kept at {}",
                    temp_path(output).display()
                );
            }
            anyhow::bail!("segment {} failed: {}", at_index, cause)
        }
    }
}
