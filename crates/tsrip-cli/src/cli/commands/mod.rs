//! CLI command handlers. Each command is in its own file.

mod bench;
mod checksum;
mod fetch;
mod probe;

pub use bench::run_bench;
pub use checksum::run_checksum;
pub use fetch::run_fetch;
pub use probe::run_probe;

use anyhow::{Context, Result};
use url::Url;

use tsrip_core::config::RipConfig;
use tsrip_core::control::CancelToken;
use tsrip_core::engine::{Fetch, HttpFetcher, MergeOptions};
use tsrip_core::manifest;
use tsrip_core::segment::SegmentRef;

/// Resolve a playlist argument (URL or local path) to its text and base URL,
/// then parse it into the ordered segment list. Remote playlists are fetched
/// with the same HTTP stack the segments use.
pub(super) async fn load_segments(cfg: &RipConfig, source: &str) -> Result<Vec<SegmentRef>> {
    let source = source.to_string();
    let opts = MergeOptions::from_config(cfg);
    tokio::task::spawn_blocking(move || -> Result<Vec<SegmentRef>> {
        let (text, base) = if source.starts_with("http://") || source.starts_with("https://") {
            let base = Url::parse(&source).context("playlist URL")?;
            let fetcher = HttpFetcher::new(opts.retry, opts.transfer);
            let bytes = fetcher
                .fetch(
                    &SegmentRef {
                        index: 0,
                        locator: source.clone(),
                    },
                    &CancelToken::new(),
                )
                .map_err(|e| anyhow::anyhow!("fetch playlist {}: {}", source, e))?;
            let text = String::from_utf8(bytes).context("playlist is not valid UTF-8")?;
            (text, base)
        } else {
            let path = std::fs::canonicalize(&source)
                .with_context(|| format!("playlist file {}", source))?;
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("read playlist {}", path.display()))?;
            let base = Url::from_file_path(&path)
                .map_err(|_| anyhow::anyhow!("cannot form a base URL from {}", path.display()))?;
            (text, base)
        };
        manifest::parse_media_playlist(&text, &base)
    })
    .await
    .context("playlist load task join")?
}
