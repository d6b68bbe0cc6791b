//! Moov inspection: per-track timescales and trex defaults.
//!
//! The moov is parsed once per pipeline. Malformed tracks are skipped
//! silently (a partial map is fine — the segmenter falls back to
//! wall-clock durations for tracks it cannot resolve).

use std::collections::BTreeMap;

use crate::boxes::{
    be_u32, container_payload, BoxChildren, MDHD, MDIA, MOOV, MVEX, TKHD, TRAK, TREX,
};

/// Per-track defaults from the `trex` box, used as the last fallback for
/// trun sample durations and sample flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrexDefaults {
    pub default_sample_duration: u32,
    pub default_sample_flags: u32,
}

/// Extract `track_ID → timescale` by descending
/// `moov → trak* → (tkhd | mdia → mdhd)`.
///
/// Returns a partial (possibly empty) map; never fails.
pub fn parse_track_timescales(moov: &[u8]) -> BTreeMap<u32, u32> {
    let mut map = BTreeMap::new();
    let Some(payload) = container_payload(moov, MOOV) else {
        return map;
    };

    for child in BoxChildren::new(payload) {
        let Ok(child) = child else { break };
        if child.header.box_type != TRAK {
            continue;
        }
        if let Some((track_id, timescale)) = parse_trak(child.payload(payload)) {
            map.insert(track_id, timescale);
        }
    }

    map
}

/// Extract `track_ID → TrexDefaults` from `moov → mvex → trex*`.
///
/// Returns a partial (possibly empty) map; never fails.
pub fn parse_trex_defaults(moov: &[u8]) -> BTreeMap<u32, TrexDefaults> {
    let mut map = BTreeMap::new();
    let Some(payload) = container_payload(moov, MOOV) else {
        return map;
    };

    for child in BoxChildren::new(payload) {
        let Ok(child) = child else { break };
        if child.header.box_type != MVEX {
            continue;
        }
        let mvex = child.payload(payload);
        for entry in BoxChildren::new(mvex) {
            let Ok(entry) = entry else { break };
            if entry.header.box_type != TREX {
                continue;
            }
            let p = entry.payload(mvex);
            // fullbox(4) track_ID(4) sample_description_index(4)
            // default_sample_duration(4) default_sample_size(4)
            // default_sample_flags(4)
            let (Some(track_id), Some(duration), Some(flags)) =
                (be_u32(p, 4), be_u32(p, 12), be_u32(p, 20))
            else {
                continue;
            };
            map.insert(
                track_id,
                TrexDefaults {
                    default_sample_duration: duration,
                    default_sample_flags: flags,
                },
            );
        }
    }

    map
}

fn parse_trak(trak: &[u8]) -> Option<(u32, u32)> {
    let mut track_id = None;
    let mut timescale = None;

    for child in BoxChildren::new(trak) {
        let child = child.ok()?;
        match child.header.box_type {
            TKHD => track_id = parse_tkhd_track_id(child.payload(trak)),
            MDIA => {
                let mdia = child.payload(trak);
                for inner in BoxChildren::new(mdia) {
                    let inner = inner.ok()?;
                    if inner.header.box_type == MDHD {
                        timescale = parse_mdhd_timescale(inner.payload(mdia));
                    }
                }
            }
            _ => {}
        }
    }

    Some((track_id?, timescale?))
}

fn parse_tkhd_track_id(p: &[u8]) -> Option<u32> {
    let version = *p.first()?;
    // track_ID follows fullbox + creation_time + modification_time.
    let off = if version == 1 { 4 + 16 } else { 4 + 8 };
    be_u32(p, off)
}

fn parse_mdhd_timescale(p: &[u8]) -> Option<u32> {
    let version = *p.first()?;
    let off = if version == 1 { 4 + 16 } else { 4 + 8 };
    be_u32(p, off)
}
