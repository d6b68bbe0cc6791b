//! The re-segmentation orchestrator.
//!
//! Consumes the top-level box stream from the parser and drives the whole
//! engine: init-segment assembly and versioning, the segment-cut policy,
//! per-track timestamp rewriting with the duration sanity clamp,
//! discontinuity bookkeeping, and atomic publication of segments plus
//! playlist revisions to the [`SegmentStore`].
//!
//! State machine: AWAITING_INIT (collecting `ftyp`, waiting for `moov`)
//! → RUNNING (buffering fragments, cutting segments) → STOPPED.

use bytes::{Bytes, BytesMut};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::boxes::{fourcc_str, FourCc, FTYP, MDAT, MOOF, MOOV};
use crate::clock::Clock;
use crate::error::Result;
use crate::keyframes::{moof_keyframe_status, KeyframeDiagnostics, KeyframeStats};
use crate::moof::rewrite_moof_timestamps;
use crate::moov::{parse_track_timescales, parse_trex_defaults, TrexDefaults};
use crate::playlist::{render_media_playlist, PlaylistParams};
use crate::store::SegmentStore;

/// Segments shorter than this never report less than 100 ms; players choke
/// on zero-length EXTINF entries.
const MIN_SEGMENT_DURATION_SECS: f64 = 0.1;

/// A fragment duration this far off the anchored baseline is treated as a
/// timing glitch rather than real media time.
const DURATION_SANITY_FACTOR: u64 = 20;

// ---------------------------------------------------------------------------
// Settings / seed / snapshots
// ---------------------------------------------------------------------------

/// Tunables for one segmenter instance.
#[derive(Debug, Clone)]
pub struct SegmenterSettings {
    /// Target media segment duration (wall-clock cut interval).
    pub target_segment_duration: Duration,
    /// Sliding playlist window; older segments are evicted.
    pub max_segments: usize,
    /// Enable per-moof keyframe cadence diagnostics.
    pub keyframe_diagnostics: bool,
}

impl Default for SegmenterSettings {
    fn default() -> Self {
        Self {
            target_segment_duration: Duration::from_secs(4),
            max_segments: 12,
            keyframe_diagnostics: false,
        }
    }
}

/// Continuity state carried into a pipeline, zero/empty on a fresh start
/// and snapshotted from the outgoing pipeline on a supervised handoff.
#[derive(Debug, Clone, Default)]
pub struct PipelineSeed {
    /// Next `baseMediaDecodeTime` to write, per track.
    pub initial_track_timestamps: BTreeMap<u32, u64>,
    pub starting_init_version: u32,
    pub starting_segment_index: u64,
    /// Init bytes from the previous pipeline; a byte-identical new init
    /// keeps the version and suppresses the pending discontinuity.
    pub previous_init: Option<Bytes>,
    pub pending_discontinuity: bool,
    /// In-window EXTINF durations of already-emitted segments, so playlist
    /// revisions stay monotone across a handoff.
    pub initial_segment_durations: BTreeMap<u64, f64>,
    /// In-window discontinuity indices from the previous pipeline.
    pub initial_discontinuities: BTreeSet<u64>,
}

/// Read-only snapshot used by supervision for handoff seeding and status.
#[derive(Debug, Clone)]
pub struct PipelineSnapshot {
    pub init: Option<Bytes>,
    pub init_version: u32,
    pub next_segment_index: u64,
    pub track_timestamps: BTreeMap<u32, u64>,
    pub segment_durations: BTreeMap<u64, f64>,
    pub discontinuities: BTreeSet<u64>,
    pub health: HealthSnapshot,
}

/// Health counters exposed through the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub state: &'static str,
    pub init_version: u32,
    pub segments_emitted: u64,
    pub fragments_ingested: u64,
    /// Fragments whose rewrite failed and passed through unmodified.
    pub rewrite_faults: u64,
    /// Fragment durations replaced by the anchored baseline.
    pub clamped_durations: u64,
    /// Segments that ran at least twice the target duration before
    /// cutting (the upstream capture fell behind real time).
    pub lagging_segments: u64,
    pub keyframes: Option<KeyframeStats>,
}

// ---------------------------------------------------------------------------
// Segmenter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitingInit,
    Running,
    Stopped,
}

impl Phase {
    fn name(self) -> &'static str {
        match self {
            Phase::AwaitingInit => "awaiting_init",
            Phase::Running => "running",
            Phase::Stopped => "stopped",
        }
    }
}

/// Per-stream segmentation state. Owned by exactly one ingest task; all
/// mutations happen on the ingest path (plus the supervisor's brief
/// `mark_discontinuity` / snapshot calls through the pipeline's lock).
pub struct Segmenter {
    settings: SegmenterSettings,
    store: Arc<SegmentStore>,
    clock: Arc<dyn Clock>,

    phase: Phase,
    ftyp: Option<Bytes>,
    init: Option<Bytes>,
    init_version: u32,
    previous_init: Option<Bytes>,

    timescales: BTreeMap<u32, u32>,
    trex: BTreeMap<u32, TrexDefaults>,
    /// Next baseMediaDecodeTime to write, per track. Strictly
    /// non-decreasing for the life of the pipeline.
    counters: BTreeMap<u32, u64>,
    /// Anchored per-track duration baselines; set once, never updated.
    baselines: BTreeMap<u32, u64>,

    pending_discontinuity: bool,
    discontinuities: BTreeSet<u64>,
    next_index: u64,
    starting_index: u64,

    // Per-segment accumulation, reset on every emit.
    buffer: BytesMut,
    buffered_fragments: usize,
    segment_started_at: Option<Instant>,
    accumulated: BTreeMap<u32, u64>,

    /// index → media duration (seconds) for in-window segments.
    durations: BTreeMap<u64, f64>,

    diagnostics: KeyframeDiagnostics,
    fragments_ingested: u64,
    rewrite_faults: u64,
    clamped_durations: u64,
    lagging_segments: u64,
}

impl Segmenter {
    pub fn new(
        settings: SegmenterSettings,
        seed: PipelineSeed,
        store: Arc<SegmentStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            settings,
            store,
            clock,
            phase: Phase::AwaitingInit,
            ftyp: None,
            init: None,
            init_version: seed.starting_init_version,
            previous_init: seed.previous_init,
            timescales: BTreeMap::new(),
            trex: BTreeMap::new(),
            counters: seed.initial_track_timestamps,
            baselines: BTreeMap::new(),
            pending_discontinuity: seed.pending_discontinuity,
            discontinuities: seed.initial_discontinuities,
            next_index: seed.starting_segment_index,
            starting_index: seed.starting_segment_index,
            buffer: BytesMut::new(),
            buffered_fragments: 0,
            segment_started_at: None,
            accumulated: BTreeMap::new(),
            durations: seed.initial_segment_durations,
            diagnostics: KeyframeDiagnostics::new(),
            fragments_ingested: 0,
            rewrite_faults: 0,
            clamped_durations: 0,
            lagging_segments: 0,
        }
    }

    /// Feed one complete top-level box.
    pub fn handle_box(&mut self, box_type: FourCc, bytes: BytesMut) -> Result<()> {
        match self.phase {
            Phase::Stopped => Ok(()), // terminal; input discarded
            Phase::AwaitingInit => self.handle_init_box(box_type, bytes),
            Phase::Running => self.handle_media_box(box_type, bytes),
        }
    }

    fn handle_init_box(&mut self, box_type: FourCc, bytes: BytesMut) -> Result<()> {
        match box_type {
            FTYP => {
                if self.ftyp.is_some() {
                    tracing::warn!("duplicate ftyp before moov; replacing");
                }
                self.ftyp = Some(bytes.freeze());
                Ok(())
            }
            MOOV => self.assemble_init(bytes.freeze()),
            MOOF | MDAT => {
                tracing::warn!(
                    box_type = %fourcc_str(box_type),
                    "media box before moov; dropping"
                );
                Ok(())
            }
            other => {
                tracing::trace!(box_type = %fourcc_str(other), "ignoring box before moov");
                Ok(())
            }
        }
    }

    /// Assemble `ftyp || moov`, version it, and publish it. The init must
    /// be observable before any media segment that references it.
    fn assemble_init(&mut self, moov: Bytes) -> Result<()> {
        let mut init = BytesMut::with_capacity(
            self.ftyp.as_ref().map(|f| f.len()).unwrap_or(0) + moov.len(),
        );
        match &self.ftyp {
            Some(ftyp) => init.extend_from_slice(ftyp),
            None => tracing::warn!("moov arrived without ftyp; init segment has no ftyp"),
        }
        init.extend_from_slice(&moov);
        let init = init.freeze();

        self.timescales = parse_track_timescales(&moov);
        self.trex = parse_trex_defaults(&moov);
        if self.timescales.is_empty() {
            tracing::warn!("moov contains no resolvable tracks; EXTINF will use wall-clock");
        }

        if self.previous_init.as_ref() == Some(&init) {
            // Codec parameters unchanged across the handoff: keep the
            // version and drop the pending discontinuity.
            if self.pending_discontinuity {
                tracing::debug!("init unchanged across handoff; suppressing discontinuity");
                self.pending_discontinuity = false;
            }
        } else {
            self.init_version += 1;
        }

        tracing::info!(
            version = self.init_version,
            bytes = init.len(),
            tracks = self.timescales.len(),
            "init segment published"
        );

        self.init = Some(init.clone());
        self.previous_init = Some(init.clone());
        self.store.publish_init(self.init_version, init);
        self.phase = Phase::Running;
        Ok(())
    }

    fn handle_media_box(&mut self, box_type: FourCc, bytes: BytesMut) -> Result<()> {
        match box_type {
            MOOF => {
                self.maybe_cut_before_moof()?;
                self.append_moof(bytes);
                Ok(())
            }
            MDAT => {
                self.buffer.extend_from_slice(&bytes);
                Ok(())
            }
            MOOV | FTYP => {
                tracing::warn!(
                    box_type = %fourcc_str(box_type),
                    "unexpected init box mid-stream; dropping"
                );
                Ok(())
            }
            // styp, sidx, and friends ride along in the current segment.
            _ => {
                self.buffer.extend_from_slice(&bytes);
                Ok(())
            }
        }
    }

    /// The cut decision runs *before* the incoming moof is appended, so a
    /// segment always ends at a fragment boundary.
    fn maybe_cut_before_moof(&mut self) -> Result<()> {
        if self.buffered_fragments == 0 {
            return Ok(());
        }

        // First segment goes out at the first complete moof+mdat pair
        // regardless of duration, to minimize time-to-first-byte.
        let no_segment_yet = self.next_index == self.starting_index;
        let elapsed_reached = self
            .segment_started_at
            .map(|t| self.clock.now().duration_since(t) >= self.settings.target_segment_duration)
            .unwrap_or(false);

        if no_segment_yet || elapsed_reached {
            self.emit_segment();
        }
        Ok(())
    }

    fn append_moof(&mut self, bytes: BytesMut) {
        let leading = self.buffered_fragments == 0;
        if leading {
            self.segment_started_at = Some(self.clock.now());
        }
        self.fragments_ingested += 1;

        let mut moof = bytes;
        match rewrite_moof_timestamps(&mut moof, &mut self.counters, &self.trex) {
            Ok(track_durations) => {
                for (track_id, duration) in track_durations {
                    let recorded = self.apply_sanity_clamp(track_id, duration);
                    *self.accumulated.entry(track_id).or_insert(0) += recorded;
                }
            }
            Err(e) => {
                // Per-fragment fault: source timestamps stay in place and
                // the fragment still reaches clients.
                self.rewrite_faults += 1;
                tracing::debug!(error = %e, "moof rewrite failed; passing fragment through");
            }
        }

        if self.settings.keyframe_diagnostics {
            let status = moof_keyframe_status(&moof, &self.trex);
            self.diagnostics.observe_moof(status, self.clock.now(), leading);
        }

        self.buffer.extend_from_slice(&moof);
        self.buffered_fragments += 1;
    }

    /// Anchor the first nonzero duration per track as its baseline, then
    /// treat anything 20x above or below it as a glitch: the counter
    /// advance is reverted and the baseline substituted. The subtraction
    /// cannot underflow because the rewriter advanced by exactly
    /// `duration` just before.
    fn apply_sanity_clamp(&mut self, track_id: u32, duration: u64) -> u64 {
        match self.baselines.get(&track_id) {
            None => {
                if duration > 0 {
                    self.baselines.insert(track_id, duration);
                }
                duration
            }
            Some(&baseline) => {
                let too_long = duration > baseline.saturating_mul(DURATION_SANITY_FACTOR);
                let too_short = duration.saturating_mul(DURATION_SANITY_FACTOR) < baseline;
                if too_long || too_short {
                    if let Some(counter) = self.counters.get_mut(&track_id) {
                        *counter = *counter - duration + baseline;
                    }
                    self.clamped_durations += 1;
                    tracing::debug!(
                        track_id,
                        duration,
                        baseline,
                        "fragment duration outside sane range; clamped to baseline"
                    );
                    baseline
                } else {
                    duration
                }
            }
        }
    }

    /// Cut the current buffer into a media segment and publish it together
    /// with the regenerated playlist.
    fn emit_segment(&mut self) {
        if self.buffered_fragments == 0 {
            return;
        }

        let index = self.next_index;
        if self.pending_discontinuity {
            self.discontinuities.insert(index);
            self.pending_discontinuity = false;
        }

        let media_duration = self.segment_media_duration();

        // A segment that ran far past the target means the capture is not
        // keeping up with real time. Diagnostic only; the cut proceeds.
        if let Some(started) = self.segment_started_at {
            let elapsed = self.clock.now().duration_since(started);
            if elapsed >= self.settings.target_segment_duration * 2 {
                self.lagging_segments += 1;
                tracing::warn!(
                    index,
                    elapsed_secs = elapsed.as_secs_f64(),
                    "segment ran long past target; upstream capture may be stalling"
                );
            }
        }

        let bytes = self.buffer.split().freeze();
        let size = bytes.len();

        self.durations.insert(index, media_duration);
        self.next_index += 1;

        let evict_below = self.next_index.saturating_sub(self.settings.max_segments as u64);
        self.durations.retain(|&i, _| i >= evict_below);
        self.discontinuities.retain(|&i| i >= evict_below);

        let playlist = render_media_playlist(&PlaylistParams {
            target_duration_secs: self.settings.target_segment_duration.as_secs(),
            max_segments: self.settings.max_segments,
            next_index: self.next_index,
            init_version: self.init_version,
            durations: &self.durations,
            discontinuities: &self.discontinuities,
        });
        self.store.publish_segment(index, bytes, playlist, evict_below);

        tracing::debug!(
            index,
            bytes = size,
            duration_secs = format!("{media_duration:.3}"),
            "media segment published"
        );

        // Reset per-segment accumulation.
        self.accumulated.clear();
        self.buffered_fragments = 0;
        self.segment_started_at = None;
    }

    /// Media duration in seconds: the maximum over tracks of accumulated
    /// trun durations divided by the track's timescale. Falls back to
    /// wall-clock elapsed time when no track resolves (e.g. a trackless
    /// moov), floored at 100 ms.
    fn segment_media_duration(&self) -> f64 {
        let mut best = 0.0f64;
        for (track_id, &units) in &self.accumulated {
            if let Some(&timescale) = self.timescales.get(track_id) {
                if timescale > 0 {
                    best = best.max(units as f64 / timescale as f64);
                }
            }
        }

        if best <= 0.0 {
            if let Some(started) = self.segment_started_at {
                best = self.clock.now().duration_since(started).as_secs_f64();
            }
        }

        best.max(MIN_SEGMENT_DURATION_SECS)
    }

    /// Flush whatever is buffered as a short segment (even below target)
    /// and flag the next emitted segment as discontinuous. Invoked by
    /// supervision ahead of a disruptive capture recovery.
    pub fn mark_discontinuity(&mut self) {
        if self.phase == Phase::Stopped {
            return;
        }
        self.emit_segment();
        self.pending_discontinuity = true;
    }

    /// Natural end-of-stream: flush the remaining buffer, then stop.
    pub fn finish(&mut self) -> Result<()> {
        if self.phase == Phase::Running {
            self.emit_segment();
        }
        self.phase = Phase::Stopped;
        Ok(())
    }

    /// Hard stop: the fragment buffer is NOT flushed (unlike [`finish`]).
    ///
    /// [`finish`]: Segmenter::finish
    pub fn abort(&mut self) {
        self.phase = Phase::Stopped;
    }

    pub fn is_stopped(&self) -> bool {
        self.phase == Phase::Stopped
    }

    /// Continuity snapshot for supervised handoff plus health counters.
    pub fn snapshot(&self) -> PipelineSnapshot {
        PipelineSnapshot {
            init: self.init.clone().or_else(|| self.previous_init.clone()),
            init_version: self.init_version,
            next_segment_index: self.next_index,
            track_timestamps: self.counters.clone(),
            segment_durations: self.durations.clone(),
            discontinuities: self.discontinuities.clone(),
            health: self.health(),
        }
    }

    pub fn health(&self) -> HealthSnapshot {
        HealthSnapshot {
            state: self.phase.name(),
            init_version: self.init_version,
            segments_emitted: self.next_index - self.starting_index,
            fragments_ingested: self.fragments_ingested,
            rewrite_faults: self.rewrite_faults,
            clamped_durations: self.clamped_durations,
            lagging_segments: self.lagging_segments,
            keyframes: self
                .settings
                .keyframe_diagnostics
                .then(|| self.diagnostics.snapshot()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::parser::BoxParser;

    fn write_box(box_type: &[u8; 4], content: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&((8 + content.len()) as u32).to_be_bytes());
        out.extend_from_slice(box_type);
        out.extend_from_slice(content);
        out
    }

    fn ftyp() -> Vec<u8> {
        let mut content = Vec::new();
        content.extend_from_slice(b"isom");
        content.extend_from_slice(&0x200u32.to_be_bytes());
        content.extend_from_slice(b"isom");
        content.extend_from_slice(b"iso6");
        write_box(b"ftyp", &content)
    }

    fn moov(track_id: u32, timescale: u32) -> Vec<u8> {
        let mut tkhd_content = vec![0u8; 84];
        tkhd_content[12..16].copy_from_slice(&track_id.to_be_bytes());
        let tkhd = write_box(b"tkhd", &tkhd_content);

        let mut mdhd_content = vec![0u8; 24];
        mdhd_content[12..16].copy_from_slice(&timescale.to_be_bytes());
        let mdhd = write_box(b"mdhd", &mdhd_content);
        let mdia = write_box(b"mdia", &mdhd);

        let mut trak_content = tkhd;
        trak_content.extend_from_slice(&mdia);
        let trak = write_box(b"trak", &trak_content);
        write_box(b"moov", &trak)
    }

    fn moof(track_id: u32, duration: u32) -> Vec<u8> {
        let tfhd = {
            let mut c = Vec::new();
            c.extend_from_slice(&0u32.to_be_bytes());
            c.extend_from_slice(&track_id.to_be_bytes());
            write_box(b"tfhd", &c)
        };
        let tfdt = {
            let mut c = Vec::new();
            c.extend_from_slice(&0x0100_0000u32.to_be_bytes());
            c.extend_from_slice(&0u64.to_be_bytes());
            write_box(b"tfdt", &c)
        };
        let trun = {
            let mut c = Vec::new();
            c.extend_from_slice(&0x000100u32.to_be_bytes());
            c.extend_from_slice(&1u32.to_be_bytes());
            c.extend_from_slice(&duration.to_be_bytes());
            write_box(b"trun", &c)
        };
        let mut traf_content = tfhd;
        traf_content.extend_from_slice(&tfdt);
        traf_content.extend_from_slice(&trun);
        let traf = write_box(b"traf", &traf_content);
        write_box(b"moof", &traf)
    }

    fn mdat(len: usize) -> Vec<u8> {
        write_box(b"mdat", &vec![0xEE; len])
    }

    fn feed(seg: &mut Segmenter, parser: &mut BoxParser, data: &[u8]) {
        parser.push(data, |t, b| seg.handle_box(t, b)).unwrap();
    }

    fn make(
        target_secs: u64,
        seed: PipelineSeed,
    ) -> (Segmenter, BoxParser, Arc<SegmentStore>, ManualClock) {
        let store = Arc::new(SegmentStore::new());
        let clock = ManualClock::new();
        let settings = SegmenterSettings {
            target_segment_duration: Duration::from_secs(target_secs),
            max_segments: 4,
            keyframe_diagnostics: false,
        };
        let seg = Segmenter::new(settings, seed, store.clone(), Arc::new(clock.clone()));
        (seg, BoxParser::new(), store, clock)
    }

    #[test]
    fn init_published_with_version_one() {
        let (mut seg, mut parser, store, _clock) = make(2, PipelineSeed::default());
        feed(&mut seg, &mut parser, &ftyp());
        assert!(store.init().is_none());

        feed(&mut seg, &mut parser, &moov(1, 90_000));
        let init = store.init().unwrap();
        assert_eq!(init.version, 1);

        let mut expected = ftyp();
        expected.extend_from_slice(&moov(1, 90_000));
        assert_eq!(&init.bytes[..], &expected[..]);
    }

    #[test]
    fn identical_init_keeps_version_and_suppresses_discontinuity() {
        let mut init_bytes = ftyp();
        init_bytes.extend_from_slice(&moov(1, 90_000));

        let seed = PipelineSeed {
            starting_init_version: 3,
            previous_init: Some(Bytes::from(init_bytes)),
            pending_discontinuity: true,
            ..Default::default()
        };
        let (mut seg, mut parser, store, _clock) = make(2, seed);
        feed(&mut seg, &mut parser, &ftyp());
        feed(&mut seg, &mut parser, &moov(1, 90_000));

        assert_eq!(store.init().unwrap().version, 3);
        assert!(!seg.pending_discontinuity);
    }

    #[test]
    fn changed_init_bumps_version_and_keeps_discontinuity() {
        let mut init_bytes = ftyp();
        init_bytes.extend_from_slice(&moov(1, 90_000));

        let seed = PipelineSeed {
            starting_init_version: 3,
            previous_init: Some(Bytes::from(init_bytes)),
            pending_discontinuity: true,
            ..Default::default()
        };
        let (mut seg, mut parser, store, _clock) = make(2, seed);
        feed(&mut seg, &mut parser, &ftyp());
        feed(&mut seg, &mut parser, &moov(1, 48_000));

        assert_eq!(store.init().unwrap().version, 4);
        assert!(seg.pending_discontinuity);
    }

    #[test]
    fn first_pair_cuts_immediately() {
        let (mut seg, mut parser, store, _clock) = make(2, PipelineSeed::default());
        feed(&mut seg, &mut parser, &ftyp());
        feed(&mut seg, &mut parser, &moov(1, 90_000));
        feed(&mut seg, &mut parser, &moof(1, 90_000));
        feed(&mut seg, &mut parser, &mdat(100));
        assert_eq!(store.segment_count(), 0);

        // Arrival of the second moof triggers the first-segment fast path.
        feed(&mut seg, &mut parser, &moof(1, 90_000));
        assert_eq!(store.segment_count(), 1);
        assert!(store.segment(0).is_some());
        assert!(store.playlist().unwrap().contains("segment0.m4s"));
    }

    #[test]
    fn clamp_reverts_counter_advance() {
        let (mut seg, mut parser, _store, _clock) = make(600, PipelineSeed::default());
        feed(&mut seg, &mut parser, &ftyp());
        feed(&mut seg, &mut parser, &moov(1, 90_000));

        // Establish the baseline.
        feed(&mut seg, &mut parser, &moof(1, 90_000));
        feed(&mut seg, &mut parser, &mdat(10));
        assert_eq!(seg.counters[&1], 90_000);

        // A burst 25x the baseline advances by the baseline only.
        feed(&mut seg, &mut parser, &moof(1, 2_250_000));
        feed(&mut seg, &mut parser, &mdat(10));
        assert_eq!(seg.counters[&1], 180_000);
        assert_eq!(seg.clamped_durations, 1);

        // And a crazily short one likewise.
        feed(&mut seg, &mut parser, &moof(1, 10));
        feed(&mut seg, &mut parser, &mdat(10));
        assert_eq!(seg.counters[&1], 270_000);
        assert_eq!(seg.clamped_durations, 2);
    }

    #[test]
    fn baseline_never_updates() {
        let (mut seg, mut parser, _store, _clock) = make(600, PipelineSeed::default());
        feed(&mut seg, &mut parser, &ftyp());
        feed(&mut seg, &mut parser, &moov(1, 90_000));

        feed(&mut seg, &mut parser, &moof(1, 90_000));
        // In-range variation does not move the anchor.
        feed(&mut seg, &mut parser, &moof(1, 45_000));
        assert_eq!(seg.baselines[&1], 90_000);
    }

    #[test]
    fn malformed_moof_passes_through() {
        let (mut seg, mut parser, _store, _clock) = make(600, PipelineSeed::default());
        feed(&mut seg, &mut parser, &ftyp());
        feed(&mut seg, &mut parser, &moov(1, 90_000));
        feed(&mut seg, &mut parser, &moof(1, 90_000));
        feed(&mut seg, &mut parser, &mdat(10));

        // moof with no traf at all. Its arrival first cuts segment 0 via
        // the fast path, then the broken fragment opens the next buffer.
        let broken = write_box(b"moof", &write_box(b"mfhd", &[0u8; 8]));
        feed(&mut seg, &mut parser, &broken);

        assert_eq!(seg.rewrite_faults, 1);
        assert_eq!(seg.counters[&1], 90_000);
        // Fragment still buffered for clients, original bytes intact.
        assert_eq!(seg.buffer.len(), broken.len());
        assert_eq!(&seg.buffer[..], &broken[..]);

        // Next valid moof resumes from the prior counter.
        feed(&mut seg, &mut parser, &moof(1, 90_000));
        assert_eq!(seg.counters[&1], 180_000);
    }

    #[test]
    fn stop_discards_further_input() {
        let (mut seg, mut parser, store, _clock) = make(2, PipelineSeed::default());
        feed(&mut seg, &mut parser, &ftyp());
        seg.abort();
        feed(&mut seg, &mut parser, &moov(1, 90_000));
        assert!(store.init().is_none());
        assert!(seg.is_stopped());
    }

    #[test]
    fn finish_flushes_buffer_but_abort_does_not() {
        for flush in [true, false] {
            let (mut seg, mut parser, store, _clock) = make(600, PipelineSeed::default());
            feed(&mut seg, &mut parser, &ftyp());
            feed(&mut seg, &mut parser, &moov(1, 90_000));
            feed(&mut seg, &mut parser, &moof(1, 90_000));
            feed(&mut seg, &mut parser, &mdat(10));

            if flush {
                seg.finish().unwrap();
                assert_eq!(store.segment_count(), 1);
            } else {
                seg.abort();
                assert_eq!(store.segment_count(), 0);
            }
        }
    }

    #[test]
    fn wall_clock_fallback_when_no_tracks() {
        let (mut seg, mut parser, store, clock) = make(600, PipelineSeed::default());
        feed(&mut seg, &mut parser, &ftyp());
        // moov with no traks.
        feed(&mut seg, &mut parser, &write_box(b"moov", &[]));
        assert!(store.init().is_some());

        feed(&mut seg, &mut parser, &moof(1, 90_000));
        feed(&mut seg, &mut parser, &mdat(10));
        clock.advance(Duration::from_millis(1500));
        seg.finish().unwrap();

        let playlist = store.playlist().unwrap();
        assert!(playlist.contains("#EXTINF:1.500,"), "playlist:\n{playlist}");
    }

    #[test]
    fn duration_floor_applies() {
        let (mut seg, mut parser, store, _clock) = make(600, PipelineSeed::default());
        feed(&mut seg, &mut parser, &ftyp());
        feed(&mut seg, &mut parser, &write_box(b"moov", &[]));
        feed(&mut seg, &mut parser, &moof(1, 90_000));
        feed(&mut seg, &mut parser, &mdat(10));
        seg.finish().unwrap();

        let playlist = store.playlist().unwrap();
        assert!(playlist.contains("#EXTINF:0.100,"), "playlist:\n{playlist}");
    }

    #[test]
    fn minor_boxes_ride_along_in_current_segment() {
        let (mut seg, mut parser, store, _clock) = make(600, PipelineSeed::default());
        feed(&mut seg, &mut parser, &ftyp());
        feed(&mut seg, &mut parser, &moov(1, 90_000));

        let styp = write_box(b"styp", b"msdh\x00\x00\x00\x00msdh");
        feed(&mut seg, &mut parser, &styp);
        feed(&mut seg, &mut parser, &moof(1, 90_000));
        feed(&mut seg, &mut parser, &mdat(10));
        seg.finish().unwrap();

        let segment = store.segment(0).unwrap();
        assert!(segment.starts_with(&styp));
    }

    #[test]
    fn lagging_segment_counted_when_cut_runs_long() {
        let (mut seg, mut parser, _store, clock) = make(2, PipelineSeed::default());
        feed(&mut seg, &mut parser, &ftyp());
        feed(&mut seg, &mut parser, &moov(1, 90_000));

        // First segment takes 5 s of wall clock against a 2 s target.
        feed(&mut seg, &mut parser, &moof(1, 90_000));
        feed(&mut seg, &mut parser, &mdat(10));
        clock.advance(Duration::from_secs(5));
        feed(&mut seg, &mut parser, &moof(1, 90_000));
        assert_eq!(seg.health().lagging_segments, 1);

        // A segment cut right at the target is not lag.
        clock.advance(Duration::from_secs(2));
        feed(&mut seg, &mut parser, &moof(1, 90_000));
        assert_eq!(seg.health().lagging_segments, 1);
        assert_eq!(seg.health().segments_emitted, 2);
    }

    #[test]
    fn keyframe_diagnostics_only_when_enabled() {
        for enabled in [false, true] {
            let store = Arc::new(SegmentStore::new());
            let settings = SegmenterSettings {
                target_segment_duration: Duration::from_secs(600),
                max_segments: 4,
                keyframe_diagnostics: enabled,
            };
            let mut seg = Segmenter::new(
                settings,
                PipelineSeed::default(),
                store,
                Arc::new(ManualClock::new()),
            );
            let mut parser = BoxParser::new();
            feed(&mut seg, &mut parser, &ftyp());
            feed(&mut seg, &mut parser, &moov(1, 90_000));
            feed(&mut seg, &mut parser, &moof(1, 90_000));
            feed(&mut seg, &mut parser, &moof(1, 90_000));

            let health = seg.health();
            if enabled {
                // The test moofs carry no sample flags anywhere.
                let stats = health.keyframes.expect("diagnostics enabled");
                assert_eq!(stats.indeterminate_count, 2);
            } else {
                assert!(health.keyframes.is_none());
            }
        }
    }

    #[test]
    fn snapshot_reflects_continuity_state() {
        let (mut seg, mut parser, _store, _clock) = make(600, PipelineSeed::default());
        feed(&mut seg, &mut parser, &ftyp());
        feed(&mut seg, &mut parser, &moov(1, 90_000));
        feed(&mut seg, &mut parser, &moof(1, 90_000));
        feed(&mut seg, &mut parser, &mdat(10));
        seg.finish().unwrap();

        let snap = seg.snapshot();
        assert_eq!(snap.init_version, 1);
        assert_eq!(snap.next_segment_index, 1);
        assert_eq!(snap.track_timestamps[&1], 90_000);
        assert!(snap.init.is_some());
        assert_eq!(snap.health.segments_emitted, 1);
        assert_eq!(snap.health.state, "stopped");
    }
}
