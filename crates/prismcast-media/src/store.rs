//! Per-stream in-memory segment store.
//!
//! The store is the only surface shared between the ingest path (one
//! writer: the owning segmenter) and the HTTP handlers (many readers).
//! A media segment and the playlist revision that references it are
//! published under a single write lock, so a reader can never observe a
//! playlist naming a segment (or init version) that is not yet fetchable.
//! `Bytes` handles are reference-counted, so a reader that obtained a
//! segment before eviction can finish its response.

use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::Notify;

/// The versioned init segment (`ftyp` + `moov`).
#[derive(Debug, Clone)]
pub struct InitSegment {
    pub version: u32,
    pub bytes: Bytes,
}

#[derive(Debug, Default)]
struct StoreInner {
    segments: BTreeMap<u64, Bytes>,
    init: Option<InitSegment>,
    playlist: Option<String>,
}

/// In-memory store for one stream: recent media segments, the current
/// init segment, and the current playlist text.
#[derive(Debug, Default)]
pub struct SegmentStore {
    inner: RwLock<StoreInner>,
    playlist_ready: Notify,
}

impl SegmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish (or re-publish) the init segment.
    pub fn publish_init(&self, version: u32, bytes: Bytes) {
        let mut inner = self.inner.write();
        inner.init = Some(InitSegment { version, bytes });
    }

    /// Publish a media segment together with the playlist revision that
    /// references it, evicting everything below `evict_below`.
    ///
    /// Atomic from the reader's point of view.
    pub fn publish_segment(&self, index: u64, bytes: Bytes, playlist: String, evict_below: u64) {
        {
            let mut inner = self.inner.write();
            inner.segments.insert(index, bytes);
            if evict_below > 0 {
                inner.segments.retain(|&i, _| i >= evict_below);
            }
            inner.playlist = Some(playlist);
        }
        self.playlist_ready.notify_waiters();
    }

    /// Current init segment, if the moov has been seen.
    pub fn init(&self) -> Option<InitSegment> {
        self.inner.read().init.clone()
    }

    /// Bytes for segment `index`, or `None` once evicted (or never
    /// emitted — late readers get a well-defined not-found).
    pub fn segment(&self, index: u64) -> Option<Bytes> {
        self.inner.read().segments.get(&index).cloned()
    }

    /// Current playlist text.
    pub fn playlist(&self) -> Option<String> {
        self.inner.read().playlist.clone()
    }

    /// Number of segments currently held.
    pub fn segment_count(&self) -> usize {
        self.inner.read().segments.len()
    }

    /// Wait until a playlist is available, up to `timeout`.
    ///
    /// Used by the HTTP layer on first tune so the very first client
    /// request doesn't 404 while the capture spins up.
    pub async fn wait_for_playlist(&self, timeout: Duration) -> Option<String> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.playlist_ready.notified();
            if let Some(playlist) = self.playlist() {
                return Some(playlist);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.playlist();
            }
        }
    }
}
