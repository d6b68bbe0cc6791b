//! Sliding-window HLS media playlist generation.
//!
//! The playlist is regenerated on every segment emission and lists only
//! the segments still inside the window. The `v=` query string on
//! `EXT-X-MAP` cache-busts the init segment whenever its version changes;
//! a discontinuity entry re-states the map so clients pick up new decoder
//! parameters mid-stream.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write;

/// Inputs for one playlist revision.
#[derive(Debug)]
pub struct PlaylistParams<'a> {
    /// Configured target segment duration (seconds); the floor for
    /// `EXT-X-TARGETDURATION`.
    pub target_duration_secs: u64,
    /// Sliding window size.
    pub max_segments: usize,
    /// Index the next emitted segment will take; the window is
    /// `[next_index - max_segments, next_index)`.
    pub next_index: u64,
    pub init_version: u32,
    /// Media duration in seconds per emitted segment index.
    pub durations: &'a BTreeMap<u64, f64>,
    /// Segment indices that begin after a capture discontinuity.
    pub discontinuities: &'a BTreeSet<u64>,
}

/// Render a live media playlist (no `EXT-X-ENDLIST`; the stream never ends
/// from the client's point of view).
pub fn render_media_playlist(p: &PlaylistParams<'_>) -> String {
    // MEDIA-SEQUENCE is the lowest listed index. Normally that is
    // `next - max_segments`, but a pipeline seeded mid-stream may not
    // know durations that far back; never list a segment we can't serve.
    let window_floor = p.next_index.saturating_sub(p.max_segments as u64);
    let window_start = p
        .durations
        .keys()
        .copied()
        .find(|&i| i >= window_floor)
        .unwrap_or(window_floor);

    // TARGETDURATION is the ceiling of the longest in-window EXTINF,
    // floored at the configured target.
    let max_extinf = (window_start..p.next_index)
        .filter_map(|i| p.durations.get(&i))
        .fold(0.0f64, |acc, &d| acc.max(d));
    let target = (max_extinf.ceil() as u64).max(p.target_duration_secs);

    let mut out = String::new();
    writeln!(out, "#EXTM3U").unwrap();
    writeln!(out, "#EXT-X-VERSION:7").unwrap();
    writeln!(out, "#EXT-X-TARGETDURATION:{}", target).unwrap();
    writeln!(out, "#EXT-X-MEDIA-SEQUENCE:{}", window_start).unwrap();
    writeln!(out, "#EXT-X-MAP:URI=\"init.mp4?v={}\"", p.init_version).unwrap();

    for i in window_start..p.next_index {
        if p.discontinuities.contains(&i) {
            writeln!(out, "#EXT-X-DISCONTINUITY").unwrap();
            writeln!(out, "#EXT-X-MAP:URI=\"init.mp4?v={}\"", p.init_version).unwrap();
        }
        let duration = p.durations.get(&i).copied().unwrap_or(0.0);
        writeln!(out, "#EXTINF:{:.3},", duration).unwrap();
        writeln!(out, "segment{}.m4s", i).unwrap();
    }

    out
}
