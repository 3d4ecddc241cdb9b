//! `tsrip bench <playlist>` – benchmark admission limits.

use anyhow::{Context, Result};

use tsrip_core::bench::{self, BenchResult};
use tsrip_core::config::RipConfig;

use super::load_segments;

fn print_bench_results(results: &[BenchResult]) {
    println!(
        "  {:>6}  {:>10}  {:>8}  {:>8}  {:>8}  {:>8}",
        "Conc", "Bytes", "Time(s)", "MiB/s", "Throttle", "Errors"
    );
    println!(
        "  {}  {}  {}  {}  {}  {}",
        "------", "----------", "--------", "--------", "--------", "------"
    );
    for r in results {
        println!(
            "  {:>6}  {:>10}  {:>8.2}  {:>8.2}  {:>8}  {:>8}",
            r.concurrency,
            r.bytes_downloaded,
            r.elapsed_secs,
            r.throughput_mib_s,
            r.throttle_events,
            r.error_events
        );
    }
}

pub async fn run_bench(cfg: &RipConfig, playlist: &str) -> Result<()> {
    let segments = load_segments(cfg, playlist).await?;
    let results = tokio::task::spawn_blocking({
        let cfg = cfg.clone();
        move || bench::run_bench(&segments, &cfg)
    })
    .await
    .context("bench task join")??;
    print_bench_results(&results);
    if let Some(rec) = bench::recommend_concurrency(&results) {
        println!("Recommended concurrency: {}", rec);
    }
    Ok(())
}
