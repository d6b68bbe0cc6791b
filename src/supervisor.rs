//! Per-channel stream supervision.
//!
//! A stream pipeline is created lazily on first tune and torn down after
//! an idle timeout. Supervision also performs capture handoffs: when the
//! upstream capture must be restarted, the outgoing pipeline's continuity
//! state (segment index, init version, per-track decode timestamps) seeds
//! the replacement so clients observe one uninterrupted playlist, with an
//! `EXT-X-DISCONTINUITY` only when decoder parameters actually changed.

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

use prismcast_core::config::{ChannelConfig, Config};
use prismcast_core::events::{EventBus, EventPayload};
use prismcast_core::{Error, Result};
use prismcast_media::{
    Clock, HealthSnapshot, Pipeline, PipelineSeed, SegmentStore, SegmenterSettings, SystemClock,
};

use crate::capture::CaptureSource;

// ---------------------------------------------------------------------------
// ActiveStream
// ---------------------------------------------------------------------------

/// One live channel: its store, current pipeline, and capture task.
pub struct ActiveStream {
    channel: ChannelConfig,
    store: Arc<SegmentStore>,
    pipeline: RwLock<Arc<Pipeline>>,
    capture_task: Mutex<Option<JoinHandle<()>>>,
    last_access: Mutex<Instant>,
    /// Lagging-segment count already reported on the event bus.
    reported_lagging: Mutex<u64>,
}

impl ActiveStream {
    pub fn store(&self) -> Arc<SegmentStore> {
        self.store.clone()
    }

    pub fn channel(&self) -> &ChannelConfig {
        &self.channel
    }

    /// Record a client touch for idle accounting.
    pub fn touch(&self) {
        *self.last_access.lock() = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_access.lock().elapsed()
    }

    fn stop(&self) {
        self.pipeline.read().stop();
        if let Some(task) = self.capture_task.lock().take() {
            task.abort();
        }
    }
}

/// Status row for one stream, served by the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct StreamStatus {
    pub channel_id: String,
    pub channel_name: String,
    pub stored_segments: usize,
    pub next_segment_index: u64,
    pub track_timestamps: BTreeMap<u32, u64>,
    pub idle_secs: u64,
    pub health: HealthSnapshot,
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

/// Owns every active stream and drives their lifecycle.
pub struct Supervisor {
    config: Arc<Config>,
    source: Arc<dyn CaptureSource>,
    events: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    streams: DashMap<String, Arc<ActiveStream>>,
}

impl Supervisor {
    pub fn new(config: Arc<Config>, source: Arc<dyn CaptureSource>, events: Arc<EventBus>) -> Self {
        Self::with_clock(config, source, events, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: Arc<Config>,
        source: Arc<dyn CaptureSource>,
        events: Arc<EventBus>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            source,
            events,
            clock,
            streams: DashMap::new(),
        }
    }

    fn settings(&self) -> SegmenterSettings {
        SegmenterSettings {
            target_segment_duration: self.config.hls.target_duration(),
            max_segments: self.config.hls.max_segments,
            keyframe_diagnostics: self.config.hls.keyframe_diagnostics,
        }
    }

    /// Get the stream for a channel, starting it on first request.
    pub fn tune(&self, channel_id: &str) -> Result<Arc<ActiveStream>> {
        use dashmap::mapref::entry::Entry;

        if let Some(stream) = self.streams.get(channel_id) {
            stream.touch();
            return Ok(stream.clone());
        }

        let channel = self
            .config
            .capture
            .channels
            .iter()
            .find(|c| c.id == channel_id)
            .cloned()
            .ok_or_else(|| Error::not_found("channel", channel_id))?;

        match self.streams.entry(channel_id.to_string()) {
            Entry::Occupied(e) => {
                // Lost the race to a concurrent tune; use the winner.
                let stream = e.get().clone();
                stream.touch();
                Ok(stream)
            }
            Entry::Vacant(e) => {
                let store = Arc::new(SegmentStore::new());
                let stream =
                    self.start_stream(channel, PipelineSeed::default(), store)?;
                e.insert(stream.clone());
                tracing::info!(channel = channel_id, "stream started");
                self.events.broadcast(EventPayload::StreamStarted {
                    channel: channel_id.to_string(),
                });
                Ok(stream)
            }
        }
    }

    /// Look up an active stream without starting one.
    pub fn get(&self, channel_id: &str) -> Option<Arc<ActiveStream>> {
        let stream = self.streams.get(channel_id)?.clone();
        stream.touch();
        Some(stream)
    }

    pub fn is_active(&self, channel_id: &str) -> bool {
        self.streams.contains_key(channel_id)
    }

    fn start_stream(
        &self,
        channel: ChannelConfig,
        seed: PipelineSeed,
        store: Arc<SegmentStore>,
    ) -> Result<Arc<ActiveStream>> {
        let pipeline = Arc::new(Pipeline::spawn(
            self.settings(),
            seed,
            store.clone(),
            self.clock.clone(),
        ));
        let capture_task = self.spawn_capture(channel.clone(), pipeline.clone());

        Ok(Arc::new(ActiveStream {
            channel,
            store,
            pipeline: RwLock::new(pipeline),
            capture_task: Mutex::new(Some(capture_task)),
            last_access: Mutex::new(Instant::now()),
            reported_lagging: Mutex::new(0),
        }))
    }

    fn spawn_capture(&self, channel: ChannelConfig, pipeline: Arc<Pipeline>) -> JoinHandle<()> {
        let source = self.source.clone();
        let events = self.events.clone();

        tokio::spawn(async move {
            match source.open(&channel) {
                Ok(stream) => {
                    if let Err(e) = pipeline.pipe(stream).await {
                        tracing::warn!(channel = %channel.id, error = %e, "capture stream failed");
                    }
                }
                Err(e) => {
                    tracing::error!(channel = %channel.id, error = %e, "failed to open capture source");
                    events.broadcast(EventPayload::StreamError {
                        channel: channel.id.clone(),
                        error: e.to_string(),
                    });
                    return;
                }
            }

            // Stream-level pipeline errors surface exactly once here.
            if let Err(e) = pipeline.wait().await {
                tracing::error!(channel = %channel.id, error = %e, "pipeline terminated with error");
                events.broadcast(EventPayload::StreamError {
                    channel: channel.id.clone(),
                    error: e.to_string(),
                });
            }
        })
    }

    /// Replace the capture behind a channel while preserving segment
    /// indices, init versions, and per-track decode timestamps.
    ///
    /// The outgoing pipeline's tail is flushed (as a short, discontinuous
    /// segment boundary) before the snapshot is taken so the replacement's
    /// starting index stays contiguous with what was emitted.
    pub fn handoff(&self, channel_id: &str) -> Result<()> {
        let stream = self
            .streams
            .get(channel_id)
            .map(|s| s.clone())
            .ok_or_else(|| Error::not_found("stream", channel_id))?;

        let old_pipeline = stream.pipeline.read().clone();
        old_pipeline.mark_discontinuity();
        let snapshot = old_pipeline.snapshot();
        old_pipeline.stop();
        if let Some(task) = stream.capture_task.lock().take() {
            task.abort();
        }

        let starting_index = snapshot.next_segment_index;
        let seed = PipelineSeed {
            initial_track_timestamps: snapshot.track_timestamps,
            starting_init_version: snapshot.init_version,
            starting_segment_index: starting_index,
            previous_init: snapshot.init,
            pending_discontinuity: true,
            initial_segment_durations: snapshot.segment_durations,
            initial_discontinuities: snapshot.discontinuities,
        };

        let new_pipeline = Arc::new(Pipeline::spawn(
            self.settings(),
            seed,
            stream.store.clone(),
            self.clock.clone(),
        ));
        let capture_task = self.spawn_capture(stream.channel.clone(), new_pipeline.clone());
        *stream.pipeline.write() = new_pipeline;
        *stream.capture_task.lock() = Some(capture_task);

        tracing::info!(
            channel = channel_id,
            next_segment = starting_index,
            "capture handoff complete"
        );
        self.events.broadcast(EventPayload::HandoffCompleted {
            channel: channel_id.to_string(),
        });
        Ok(())
    }

    /// Tear down a stream. Returns false if it wasn't active.
    pub fn release(&self, channel_id: &str) -> bool {
        let Some((_, stream)) = self.streams.remove(channel_id) else {
            return false;
        };
        stream.stop();
        tracing::info!(channel = channel_id, "stream stopped");
        self.events.broadcast(EventPayload::StreamStopped {
            channel: channel_id.to_string(),
        });
        true
    }

    /// Tear down streams no client has touched within the idle timeout.
    pub fn sweep_idle(&self) -> usize {
        let timeout = Duration::from_secs(self.config.capture.idle_timeout_secs);
        let expired: Vec<String> = self
            .streams
            .iter()
            .filter(|entry| entry.value().idle_for() >= timeout)
            .map(|entry| entry.key().clone())
            .collect();

        for channel_id in &expired {
            tracing::info!(channel = %channel_id, "idle timeout; tearing down stream");
            self.release(channel_id);
        }
        expired.len()
    }

    /// Broadcast a diagnostic for every stream whose lagging-segment
    /// count grew since the last report. Returns how many were reported.
    pub fn report_lagging(&self) -> usize {
        let mut reported = 0;
        for entry in self.streams.iter() {
            let stream = entry.value();
            let health = stream.pipeline.read().health();
            let mut last = stream.reported_lagging.lock();
            if health.lagging_segments > *last {
                *last = health.lagging_segments;
                tracing::warn!(
                    channel = %stream.channel.id,
                    lagging_segments = health.lagging_segments,
                    "stream keeps cutting segments behind the target duration"
                );
                self.events.broadcast(EventPayload::SegmentLagging {
                    channel: stream.channel.id.clone(),
                    lagging_segments: health.lagging_segments,
                });
                reported += 1;
            }
        }
        reported
    }

    /// Status snapshot across all active streams.
    pub fn health(&self) -> Vec<StreamStatus> {
        self.streams
            .iter()
            .map(|entry| {
                let stream = entry.value();
                let snapshot = stream.pipeline.read().snapshot();
                StreamStatus {
                    channel_id: stream.channel.id.clone(),
                    channel_name: stream.channel.name.clone(),
                    stored_segments: stream.store.segment_count(),
                    next_segment_index: snapshot.next_segment_index,
                    track_timestamps: snapshot.track_timestamps,
                    idle_secs: stream.idle_for().as_secs(),
                    health: snapshot.health,
                }
            })
            .collect()
    }
}

/// Start a background task that periodically tears down idle streams and
/// surfaces lag diagnostics on the event bus.
pub fn start_idle_sweep(supervisor: Arc<Supervisor>, interval_secs: u64) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            supervisor.sweep_idle();
            supervisor.report_lagging();
        }
    })
}
