//! Keyframe cadence diagnostics.
//!
//! A capture that stops producing sync samples (or produces them at the
//! wrong cadence) plays back badly even though the pipeline itself is
//! healthy. When enabled, the segmenter classifies each moof's first
//! sample and keeps rolling statistics. Diagnostics never affect the
//! segment-cut policy.

use std::collections::BTreeMap;
use std::time::Instant;

use serde::Serialize;

use crate::boxes::{be_u32, container_payload, BoxChildren, ChildBox, MOOF, TFHD, TRAF, TRUN};
use crate::moov::TrexDefaults;

// Same flag constants as the rewriter; duplicated here because the two
// modules read different fields of the same boxes.
const TFHD_BASE_DATA_OFFSET: u32 = 0x000001;
const TFHD_SAMPLE_DESC_INDEX: u32 = 0x000002;
const TFHD_DEFAULT_DURATION: u32 = 0x000008;
const TFHD_DEFAULT_SIZE: u32 = 0x000010;
const TFHD_DEFAULT_FLAGS: u32 = 0x000020;

const TRUN_DATA_OFFSET: u32 = 0x000001;
const TRUN_FIRST_SAMPLE_FLAGS: u32 = 0x000004;
const TRUN_SAMPLE_DURATION: u32 = 0x000100;
const TRUN_SAMPLE_FLAGS: u32 = 0x000400;

/// Whether a moof opens on a sync sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyframeStatus {
    Sync,
    NonSync,
    /// No sample flags were resolvable from trun, tfhd, or trex.
    Indeterminate,
}

/// Classify a moof by the first sample of its first traf.
///
/// Flag resolution order: per-sample trun flags, trun first-sample-flags,
/// tfhd default_sample_flags, trex default_sample_flags. If none is
/// present the result is indeterminate.
pub fn moof_keyframe_status(
    moof: &[u8],
    trex: &BTreeMap<u32, TrexDefaults>,
) -> KeyframeStatus {
    let Some(payload) = container_payload(moof, MOOF) else {
        return KeyframeStatus::Indeterminate;
    };

    let traf = BoxChildren::new(payload)
        .filter_map(|c| c.ok())
        .find(|c| c.header.box_type == TRAF);
    let Some(traf) = traf else {
        return KeyframeStatus::Indeterminate;
    };

    match first_sample_flags(traf.payload(payload), trex) {
        Some(flags) => classify(flags),
        None => KeyframeStatus::Indeterminate,
    }
}

fn classify(flags: u32) -> KeyframeStatus {
    let non_sync = flags & 0x0001_0000 != 0;
    let depends_on = (flags >> 24) & 0x3;
    if !non_sync && depends_on != 1 {
        KeyframeStatus::Sync
    } else {
        KeyframeStatus::NonSync
    }
}

fn first_sample_flags(traf: &[u8], trex: &BTreeMap<u32, TrexDefaults>) -> Option<u32> {
    let mut tfhd: Option<ChildBox> = None;
    let mut trun: Option<ChildBox> = None;

    for child in BoxChildren::new(traf) {
        let child = child.ok()?;
        match child.header.box_type {
            TFHD if tfhd.is_none() => tfhd = Some(child),
            TRUN if trun.is_none() => trun = Some(child),
            _ => {}
        }
    }

    let (track_id, tfhd_default_flags) = tfhd.and_then(|c| parse_tfhd_flags(c.payload(traf)))?;

    if let Some(trun) = trun {
        if let Some(flags) = parse_trun_first_flags(trun.payload(traf)) {
            return Some(flags);
        }
    }

    tfhd_default_flags.or_else(|| trex.get(&track_id).map(|d| d.default_sample_flags))
}

fn parse_tfhd_flags(p: &[u8]) -> Option<(u32, Option<u32>)> {
    let flags = be_u32(p, 0)? & 0x00FF_FFFF;
    let track_id = be_u32(p, 4)?;

    let mut off = 8;
    if flags & TFHD_BASE_DATA_OFFSET != 0 {
        off += 8;
    }
    if flags & TFHD_SAMPLE_DESC_INDEX != 0 {
        off += 4;
    }
    if flags & TFHD_DEFAULT_DURATION != 0 {
        off += 4;
    }
    if flags & TFHD_DEFAULT_SIZE != 0 {
        off += 4;
    }
    let default_flags = if flags & TFHD_DEFAULT_FLAGS != 0 {
        Some(be_u32(p, off)?)
    } else {
        None
    };

    Some((track_id, default_flags))
}

fn parse_trun_first_flags(p: &[u8]) -> Option<u32> {
    let flags = be_u32(p, 0)? & 0x00FF_FFFF;
    let sample_count = be_u32(p, 4)?;

    let mut off = 8;
    if flags & TRUN_DATA_OFFSET != 0 {
        off += 4;
    }
    if flags & TRUN_FIRST_SAMPLE_FLAGS != 0 {
        return be_u32(p, off);
    }
    if flags & TRUN_SAMPLE_FLAGS != 0 && sample_count > 0 {
        if flags & TRUN_SAMPLE_DURATION != 0 {
            off += 4;
        }
        // sample_size precedes sample_flags when present.
        if flags & 0x000200 != 0 {
            off += 4;
        }
        return be_u32(p, off);
    }

    None
}

// ---------------------------------------------------------------------------
// Rolling statistics
// ---------------------------------------------------------------------------

/// Read-only snapshot of the rolling keyframe counters.
#[derive(Debug, Clone, Serialize)]
pub struct KeyframeStats {
    pub keyframe_count: u64,
    pub non_keyframe_count: u64,
    pub indeterminate_count: u64,
    pub min_keyframe_interval_ms: Option<u64>,
    pub max_keyframe_interval_ms: Option<u64>,
    pub avg_keyframe_interval_ms: Option<u64>,
    pub segments_without_leading_keyframe: u64,
}

/// Rolling keyframe counters, updated per moof on the ingest path.
#[derive(Debug)]
pub struct KeyframeDiagnostics {
    keyframe_count: u64,
    non_keyframe_count: u64,
    indeterminate_count: u64,
    last_keyframe_at: Option<Instant>,
    min_interval_ms: u64,
    max_interval_ms: u64,
    sum_interval_ms: u64,
    interval_count: u64,
    segments_without_leading_keyframe: u64,
}

impl KeyframeDiagnostics {
    pub fn new() -> Self {
        Self {
            keyframe_count: 0,
            non_keyframe_count: 0,
            indeterminate_count: 0,
            last_keyframe_at: None,
            min_interval_ms: u64::MAX,
            max_interval_ms: 0,
            sum_interval_ms: 0,
            interval_count: 0,
            segments_without_leading_keyframe: 0,
        }
    }

    /// Record one moof. `leading` marks the first moof of a new segment.
    pub fn observe_moof(&mut self, status: KeyframeStatus, now: Instant, leading: bool) {
        match status {
            KeyframeStatus::Sync => {
                self.keyframe_count += 1;
                if let Some(last) = self.last_keyframe_at {
                    let interval = now.duration_since(last).as_millis() as u64;
                    self.min_interval_ms = self.min_interval_ms.min(interval);
                    self.max_interval_ms = self.max_interval_ms.max(interval);
                    self.sum_interval_ms += interval;
                    self.interval_count += 1;
                }
                self.last_keyframe_at = Some(now);
            }
            KeyframeStatus::NonSync => {
                self.non_keyframe_count += 1;
                if leading {
                    self.segments_without_leading_keyframe += 1;
                }
            }
            KeyframeStatus::Indeterminate => self.indeterminate_count += 1,
        }
    }

    pub fn snapshot(&self) -> KeyframeStats {
        let (min, max, avg) = if self.interval_count > 0 {
            (
                Some(self.min_interval_ms),
                Some(self.max_interval_ms),
                Some(self.sum_interval_ms / self.interval_count),
            )
        } else {
            (None, None, None)
        };
        KeyframeStats {
            keyframe_count: self.keyframe_count,
            non_keyframe_count: self.non_keyframe_count,
            indeterminate_count: self.indeterminate_count,
            min_keyframe_interval_ms: min,
            max_keyframe_interval_ms: max,
            avg_keyframe_interval_ms: avg,
            segments_without_leading_keyframe: self.segments_without_leading_keyframe,
        }
    }
}

impl Default for KeyframeDiagnostics {
    fn default() -> Self {
        Self::new()
    }
}
