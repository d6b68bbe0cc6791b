//! Moof timestamp rewriting.
//!
//! Each `traf` carries a `tfdt.baseMediaDecodeTime` stamped by the capture
//! source, which restarts from zero whenever the capture restarts. The
//! rewriter overwrites that field in place with the pipeline's running
//! counter for the track, then advances the counter by the traf's total
//! sample duration summed from its `trun` boxes.
//!
//! The rewrite is two-phase: every traf is parsed and validated before a
//! single byte is touched, so a malformed fragment leaves both the buffer
//! and the counters untouched (the segmenter passes it through with the
//! source's own timestamps).

use std::collections::BTreeMap;

use crate::boxes::{
    be_u32, parse_box_header, put_be_u32, put_be_u64, BoxChildren, ChildBox, MOOF, TFDT, TFHD,
    TRAF, TRUN,
};
use crate::error::{MediaError, Result};
use crate::moov::TrexDefaults;

// tfhd flags (ISO/IEC 14496-12 §8.8.7)
const TFHD_BASE_DATA_OFFSET: u32 = 0x000001;
const TFHD_SAMPLE_DESC_INDEX: u32 = 0x000002;
const TFHD_DEFAULT_DURATION: u32 = 0x000008;

// trun flags (§8.8.8)
const TRUN_DATA_OFFSET: u32 = 0x000001;
const TRUN_FIRST_SAMPLE_FLAGS: u32 = 0x000004;
const TRUN_SAMPLE_DURATION: u32 = 0x000100;
const TRUN_SAMPLE_SIZE: u32 = 0x000200;
const TRUN_SAMPLE_FLAGS: u32 = 0x000400;
const TRUN_SAMPLE_CTS: u32 = 0x000800;

/// Planned edit for one traf: where to write the counter and how far to
/// advance it afterwards.
#[derive(Debug)]
struct TrafPlan {
    track_id: u32,
    tfdt_version: u8,
    /// Absolute offset of the baseMediaDecodeTime field within the moof.
    tfdt_value_offset: usize,
    total_duration: u64,
}

/// Rewrite every traf's `tfdt.baseMediaDecodeTime` to the current counter
/// value for its track, advancing each counter by the traf's total sample
/// duration. Returns the per-track durations that were applied.
///
/// On error nothing is mutated and no counter moves.
pub fn rewrite_moof_timestamps(
    moof: &mut [u8],
    counters: &mut BTreeMap<u32, u64>,
    trex: &BTreeMap<u32, TrexDefaults>,
) -> Result<BTreeMap<u32, u64>> {
    let plans = plan_moof_rewrite(moof, trex)?;

    let mut durations: BTreeMap<u32, u64> = BTreeMap::new();
    for plan in &plans {
        let counter = counters.entry(plan.track_id).or_insert(0);
        match plan.tfdt_version {
            0 => put_be_u32(moof, plan.tfdt_value_offset, *counter as u32),
            _ => put_be_u64(moof, plan.tfdt_value_offset, *counter),
        }
        *counter += plan.total_duration;
        *durations.entry(plan.track_id).or_insert(0) += plan.total_duration;
    }

    Ok(durations)
}

/// Validate the moof and compute the edit plan without mutating anything.
fn plan_moof_rewrite(moof: &[u8], trex: &BTreeMap<u32, TrexDefaults>) -> Result<Vec<TrafPlan>> {
    let header = parse_box_header(moof)?.ok_or(MediaError::Truncated {
        context: "moof header",
    })?;
    if header.box_type != MOOF || header.size as usize != moof.len() {
        return Err(MediaError::Truncated {
            context: "moof content",
        });
    }

    let base = header.header_size as usize;
    let payload = &moof[base..];

    let mut plans = Vec::new();
    for child in BoxChildren::new(payload) {
        let child = child?;
        if child.header.box_type != TRAF {
            continue;
        }
        let traf_base = base + child.content_offset();
        plans.push(plan_traf(child.payload(payload), traf_base, trex)?);
    }

    if plans.is_empty() {
        return Err(MediaError::MissingBox {
            box_type: "traf",
            parent: "moof",
        });
    }

    Ok(plans)
}

fn plan_traf(
    traf: &[u8],
    traf_base: usize,
    trex: &BTreeMap<u32, TrexDefaults>,
) -> Result<TrafPlan> {
    let mut tfhd: Option<ChildBox> = None;
    let mut tfdt: Option<ChildBox> = None;
    let mut truns: Vec<ChildBox> = Vec::new();

    for child in BoxChildren::new(traf) {
        let child = child?;
        match child.header.box_type {
            TFHD => tfhd = Some(child),
            TFDT => tfdt = Some(child),
            TRUN => truns.push(child),
            _ => {}
        }
    }

    let tfhd = tfhd.ok_or(MediaError::MissingBox {
        box_type: "tfhd",
        parent: "traf",
    })?;
    let (track_id, tfhd_default_duration) = parse_tfhd(tfhd.payload(traf))?;

    let tfdt = tfdt.ok_or(MediaError::MissingBox {
        box_type: "tfdt",
        parent: "traf",
    })?;
    let p = tfdt.payload(traf);
    let version = *p.first().ok_or(MediaError::Truncated { context: "tfdt" })?;
    let value_len = if version == 0 { 4 } else { 8 };
    if p.len() < 4 + value_len {
        return Err(MediaError::Truncated { context: "tfdt" });
    }
    let tfdt_value_offset = traf_base + tfdt.content_offset() + 4;

    // Sample duration fallback chain: per-sample trun values, then
    // tfhd.default_sample_duration, then trex, then 0.
    let default_duration = tfhd_default_duration
        .or_else(|| trex.get(&track_id).map(|d| d.default_sample_duration))
        .unwrap_or(0);

    let mut total_duration: u64 = 0;
    for trun in &truns {
        total_duration += trun_total_duration(trun.payload(traf), default_duration)?;
    }

    Ok(TrafPlan {
        track_id,
        tfdt_version: version,
        tfdt_value_offset,
        total_duration,
    })
}

/// Extract `(track_ID, default_sample_duration)` from a tfhd payload.
fn parse_tfhd(p: &[u8]) -> Result<(u32, Option<u32>)> {
    let flags = be_u32(p, 0).ok_or(MediaError::Truncated { context: "tfhd" })? & 0x00FF_FFFF;
    let track_id = be_u32(p, 4).ok_or(MediaError::Truncated { context: "tfhd" })?;

    let mut off = 8;
    if flags & TFHD_BASE_DATA_OFFSET != 0 {
        off += 8;
    }
    if flags & TFHD_SAMPLE_DESC_INDEX != 0 {
        off += 4;
    }
    let default_duration = if flags & TFHD_DEFAULT_DURATION != 0 {
        Some(be_u32(p, off).ok_or(MediaError::Truncated { context: "tfhd" })?)
    } else {
        None
    };

    Ok((track_id, default_duration))
}

/// Sum `sample_duration` across every sample of a trun, substituting the
/// default when per-sample durations are absent.
fn trun_total_duration(p: &[u8], default_duration: u32) -> Result<u64> {
    let flags = be_u32(p, 0).ok_or(MediaError::Truncated { context: "trun" })? & 0x00FF_FFFF;
    let sample_count = be_u32(p, 4).ok_or(MediaError::Truncated { context: "trun" })?;

    if flags & TRUN_SAMPLE_DURATION == 0 {
        return Ok(sample_count as u64 * default_duration as u64);
    }

    let mut off = 8usize;
    if flags & TRUN_DATA_OFFSET != 0 {
        off += 4;
    }
    if flags & TRUN_FIRST_SAMPLE_FLAGS != 0 {
        off += 4;
    }

    let mut stride = 4usize; // duration is always first when present
    for field in [TRUN_SAMPLE_SIZE, TRUN_SAMPLE_FLAGS, TRUN_SAMPLE_CTS] {
        if flags & field != 0 {
            stride += 4;
        }
    }

    let needed = off as u64 + sample_count as u64 * stride as u64;
    if needed > p.len() as u64 {
        return Err(MediaError::Truncated {
            context: "trun samples",
        });
    }

    let mut total: u64 = 0;
    for i in 0..sample_count as usize {
        // Bounds checked above.
        total += be_u32(p, off + i * stride).unwrap() as u64;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_box(box_type: &[u8; 4], content: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&((8 + content.len()) as u32).to_be_bytes());
        out.extend_from_slice(box_type);
        out.extend_from_slice(content);
        out
    }

    fn tfhd(track_id: u32, default_duration: Option<u32>) -> Vec<u8> {
        let mut content = Vec::new();
        let flags = if default_duration.is_some() {
            TFHD_DEFAULT_DURATION
        } else {
            0
        };
        content.extend_from_slice(&flags.to_be_bytes());
        content.extend_from_slice(&track_id.to_be_bytes());
        if let Some(d) = default_duration {
            content.extend_from_slice(&d.to_be_bytes());
        }
        write_box(b"tfhd", &content)
    }

    fn tfdt_v1(value: u64) -> Vec<u8> {
        let mut content = Vec::new();
        content.extend_from_slice(&0x0100_0000u32.to_be_bytes());
        content.extend_from_slice(&value.to_be_bytes());
        write_box(b"tfdt", &content)
    }

    fn tfdt_v0(value: u32) -> Vec<u8> {
        let mut content = Vec::new();
        content.extend_from_slice(&0u32.to_be_bytes());
        content.extend_from_slice(&value.to_be_bytes());
        write_box(b"tfdt", &content)
    }

    fn trun_with_durations(durations: &[u32]) -> Vec<u8> {
        let flags = TRUN_DATA_OFFSET | TRUN_SAMPLE_DURATION | TRUN_SAMPLE_SIZE;
        let mut content = Vec::new();
        content.extend_from_slice(&flags.to_be_bytes());
        content.extend_from_slice(&(durations.len() as u32).to_be_bytes());
        content.extend_from_slice(&0i32.to_be_bytes()); // data offset
        for d in durations {
            content.extend_from_slice(&d.to_be_bytes());
            content.extend_from_slice(&1000u32.to_be_bytes()); // size
        }
        write_box(b"trun", &content)
    }

    fn trun_without_durations(sample_count: u32) -> Vec<u8> {
        let flags = TRUN_DATA_OFFSET;
        let mut content = Vec::new();
        content.extend_from_slice(&flags.to_be_bytes());
        content.extend_from_slice(&sample_count.to_be_bytes());
        content.extend_from_slice(&0i32.to_be_bytes());
        write_box(b"trun", &content)
    }

    fn moof(trafs: &[Vec<u8>]) -> Vec<u8> {
        let mfhd = {
            let mut c = Vec::new();
            c.extend_from_slice(&0u32.to_be_bytes());
            c.extend_from_slice(&1u32.to_be_bytes());
            write_box(b"mfhd", &c)
        };
        let mut content = mfhd;
        for t in trafs {
            content.extend_from_slice(t);
        }
        write_box(b"moof", &content)
    }

    fn traf(children: &[Vec<u8>]) -> Vec<u8> {
        let content: Vec<u8> = children.iter().flatten().copied().collect();
        write_box(b"traf", &content)
    }

    fn tfdt_value_v1(moof: &[u8]) -> u64 {
        let pos = moof
            .windows(4)
            .position(|w| w == b"tfdt")
            .expect("tfdt present");
        u64::from_be_bytes(moof[pos + 8..pos + 16].try_into().unwrap())
    }

    fn tfdt_value_v0(moof: &[u8]) -> u32 {
        let pos = moof
            .windows(4)
            .position(|w| w == b"tfdt")
            .expect("tfdt present");
        u32::from_be_bytes(moof[pos + 8..pos + 12].try_into().unwrap())
    }

    #[test]
    fn rewrites_and_advances_counter() {
        let mut m = moof(&[traf(&[
            tfhd(1, None),
            tfdt_v1(0xAAAA),
            trun_with_durations(&[3000, 3000, 3000]),
        ])]);

        let mut counters = BTreeMap::from([(1u32, 90_000u64)]);
        let durations =
            rewrite_moof_timestamps(&mut m, &mut counters, &BTreeMap::new()).unwrap();

        assert_eq!(tfdt_value_v1(&m), 90_000);
        assert_eq!(durations[&1], 9000);
        assert_eq!(counters[&1], 99_000);
    }

    #[test]
    fn unknown_track_starts_at_zero() {
        let mut m = moof(&[traf(&[
            tfhd(3, None),
            tfdt_v1(555),
            trun_with_durations(&[100]),
        ])]);

        let mut counters = BTreeMap::new();
        rewrite_moof_timestamps(&mut m, &mut counters, &BTreeMap::new()).unwrap();
        assert_eq!(tfdt_value_v1(&m), 0);
        assert_eq!(counters[&3], 100);
    }

    #[test]
    fn version0_tfdt_written_as_u32() {
        let mut m = moof(&[traf(&[
            tfhd(1, None),
            tfdt_v0(7),
            trun_with_durations(&[100]),
        ])]);

        let mut counters = BTreeMap::from([(1u32, 42u64)]);
        rewrite_moof_timestamps(&mut m, &mut counters, &BTreeMap::new()).unwrap();
        assert_eq!(tfdt_value_v0(&m), 42);
        assert_eq!(counters[&1], 142);
    }

    #[test]
    fn falls_back_to_tfhd_default_duration() {
        let mut m = moof(&[traf(&[
            tfhd(1, Some(512)),
            tfdt_v1(0),
            trun_without_durations(10),
        ])]);

        let mut counters = BTreeMap::new();
        let durations =
            rewrite_moof_timestamps(&mut m, &mut counters, &BTreeMap::new()).unwrap();
        assert_eq!(durations[&1], 5120);
    }

    #[test]
    fn falls_back_to_trex_default_duration() {
        let mut m = moof(&[traf(&[
            tfhd(1, None),
            tfdt_v1(0),
            trun_without_durations(4),
        ])]);

        let trex = BTreeMap::from([(
            1u32,
            TrexDefaults {
                default_sample_duration: 1024,
                default_sample_flags: 0,
            },
        )]);
        let mut counters = BTreeMap::new();
        let durations = rewrite_moof_timestamps(&mut m, &mut counters, &trex).unwrap();
        assert_eq!(durations[&1], 4096);
    }

    #[test]
    fn no_defaults_yields_zero_duration() {
        let mut m = moof(&[traf(&[
            tfhd(1, None),
            tfdt_v1(0),
            trun_without_durations(4),
        ])]);

        let mut counters = BTreeMap::from([(1u32, 77u64)]);
        let durations =
            rewrite_moof_timestamps(&mut m, &mut counters, &BTreeMap::new()).unwrap();
        assert_eq!(durations[&1], 0);
        assert_eq!(counters[&1], 77);
    }

    #[test]
    fn two_tracks_rewrite_independently() {
        let mut m = moof(&[
            traf(&[tfhd(1, None), tfdt_v1(0), trun_with_durations(&[90_000])]),
            traf(&[tfhd(2, None), tfdt_v1(0), trun_with_durations(&[48_000])]),
        ]);

        let mut counters = BTreeMap::from([(1u32, 180_000u64), (2u32, 96_000u64)]);
        let durations =
            rewrite_moof_timestamps(&mut m, &mut counters, &BTreeMap::new()).unwrap();
        assert_eq!(durations[&1], 90_000);
        assert_eq!(durations[&2], 48_000);
        assert_eq!(counters[&1], 270_000);
        assert_eq!(counters[&2], 144_000);
    }

    #[test]
    fn missing_tfhd_mutates_nothing() {
        let mut m = moof(&[traf(&[tfdt_v1(123), trun_with_durations(&[100])])]);
        let original = m.clone();

        let mut counters = BTreeMap::from([(1u32, 500u64)]);
        let err = rewrite_moof_timestamps(&mut m, &mut counters, &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, MediaError::MissingBox { box_type: "tfhd", .. }));
        assert_eq!(m, original);
        assert_eq!(counters[&1], 500);
    }

    #[test]
    fn missing_tfdt_is_error() {
        let mut m = moof(&[traf(&[tfhd(1, None), trun_with_durations(&[100])])]);
        let err = rewrite_moof_timestamps(&mut m, &mut BTreeMap::new(), &BTreeMap::new())
            .unwrap_err();
        assert!(matches!(err, MediaError::MissingBox { box_type: "tfdt", .. }));
    }

    #[test]
    fn moof_without_traf_is_error() {
        let mut m = moof(&[]);
        let err = rewrite_moof_timestamps(&mut m, &mut BTreeMap::new(), &BTreeMap::new())
            .unwrap_err();
        assert!(matches!(err, MediaError::MissingBox { box_type: "traf", .. }));
    }

    #[test]
    fn truncated_trun_is_error_before_any_write() {
        // trun declares 100 samples but carries only one entry.
        let flags = TRUN_SAMPLE_DURATION;
        let mut content = Vec::new();
        content.extend_from_slice(&flags.to_be_bytes());
        content.extend_from_slice(&100u32.to_be_bytes());
        content.extend_from_slice(&3000u32.to_be_bytes());
        let bad_trun = write_box(b"trun", &content);

        let mut m = moof(&[traf(&[tfhd(1, None), tfdt_v1(9), bad_trun])]);
        let original = m.clone();

        let err = rewrite_moof_timestamps(&mut m, &mut BTreeMap::new(), &BTreeMap::new())
            .unwrap_err();
        assert!(matches!(err, MediaError::Truncated { .. }));
        assert_eq!(m, original);
    }
}
