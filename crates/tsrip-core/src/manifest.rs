//! HLS media-playlist reader: the collaborator that produces the ordered
//! segment list the engine consumes.
//!
//! Line-based: every non-blank line that is not a `#` tag or comment is a
//! segment URI, in playlist order. Relative URIs are resolved against the
//! playlist's own URL. Master playlists and encrypted playlists are
//! rejected up front rather than producing output the caller cannot use.

use anyhow::{bail, Context, Result};
use url::Url;

use crate::segment::SegmentRef;

/// Parse a media playlist into an ordered segment list. `base` is the URL
/// the playlist itself was fetched from (or a `file://` URL for local
/// playlists); segment URIs are resolved against it.
pub fn parse_media_playlist(text: &str, base: &Url) -> Result<Vec<SegmentRef>> {
    let mut locators = Vec::new();
    let mut saw_endlist = false;

    for (lineno, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(tag) = line.strip_prefix('#') {
            if tag.starts_with("EXT-X-STREAM-INF") {
                bail!(
                    "line {}: master playlist (EXT-X-STREAM-INF); pick one variant's media playlist",
                    lineno + 1
                );
            }
            if let Some(attrs) = tag.strip_prefix("EXT-X-KEY:") {
                if !attrs.contains("METHOD=NONE") {
                    bail!(
                        "line {}: playlist is encrypted (EXT-X-KEY); decryption is not supported",
                        lineno + 1
                    );
                }
            }
            if tag.starts_with("EXT-X-ENDLIST") {
                saw_endlist = true;
            }
            continue;
        }

        let resolved = base
            .join(line)
            .with_context(|| format!("line {}: bad segment URI {:?}", lineno + 1, line))?;
        locators.push(resolved.to_string());
    }

    if !saw_endlist {
        tracing::warn!("playlist has no EXT-X-ENDLIST; snapshotting the current segment list");
    }

    Ok(crate::segment::segment_list(locators))
}
