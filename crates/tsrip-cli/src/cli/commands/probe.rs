//! `tsrip probe` – list a playlist's resolved segment URIs.

use anyhow::Result;

use tsrip_core::config::RipConfig;

use super::load_segments;

/// Resolve and print the segment list without fetching any payloads.
pub async fn run_probe(cfg: &RipConfig, playlist: &str) -> Result<()> {
    let segments = load_segments(cfg, playlist).await?;
    for s in &segments {
        println!("{:>6}  {}", s.index, s.locator);
    }
    println!("{} segment(s)", segments.len());
    Ok(())
}
