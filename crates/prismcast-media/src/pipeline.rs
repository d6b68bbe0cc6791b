//! Ingest task wrapper around the segmenter.
//!
//! One pipeline owns one [`BoxParser`] and one [`Segmenter`]. Byte chunks
//! arrive over an mpsc channel and are processed on a single tokio task,
//! so all segmenter mutations stay on the ingest path; the supervisor's
//! control calls (`mark_discontinuity`, snapshots) take the same lock for
//! the duration of one method call.
//!
//! `stop` is idempotent: it cancels the ingest task, which flushes the
//! parser's residual bytes and drops the fragment buffer. The natural
//! end-of-stream path instead flushes the buffered fragments as a final
//! short segment.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::error::{MediaError, Result};
use crate::parser::BoxParser;
use crate::segmenter::{
    HealthSnapshot, PipelineSeed, PipelineSnapshot, Segmenter, SegmenterSettings,
};
use crate::store::SegmentStore;

/// Backpressure bound on in-flight ingest chunks.
const INGEST_CHANNEL_CAPACITY: usize = 64;

enum IngestMsg {
    Data(Bytes),
    Eof,
}

/// A running re-segmentation pipeline for one stream.
pub struct Pipeline {
    segmenter: Arc<Mutex<Segmenter>>,
    store: Arc<SegmentStore>,
    tx: mpsc::Sender<IngestMsg>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<Result<()>>>>,
}

impl Pipeline {
    /// Create the segmenter and spawn its ingest task.
    pub fn spawn(
        settings: SegmenterSettings,
        seed: PipelineSeed,
        store: Arc<SegmentStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let segmenter = Arc::new(Mutex::new(Segmenter::new(
            settings,
            seed,
            store.clone(),
            clock,
        )));
        let (tx, rx) = mpsc::channel(INGEST_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(ingest_loop(segmenter.clone(), rx, cancel.clone()));

        Self {
            segmenter,
            store,
            tx,
            cancel,
            task: Mutex::new(Some(task)),
        }
    }

    /// Forward a capture byte stream into the pipeline until it ends, the
    /// pipeline is stopped, or the source errors.
    ///
    /// Stream end (or a source error) runs the natural end-of-stream path:
    /// buffered fragments are flushed as a final short segment.
    pub async fn pipe<S>(&self, mut source: S) -> std::io::Result<()>
    where
        S: Stream<Item = std::io::Result<Bytes>> + Unpin,
    {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                chunk = source.next() => match chunk {
                    Some(Ok(bytes)) => {
                        if self.tx.send(IngestMsg::Data(bytes)).await.is_err() {
                            return Ok(());
                        }
                    }
                    Some(Err(e)) => {
                        let _ = self.tx.send(IngestMsg::Eof).await;
                        return Err(e);
                    }
                    None => {
                        let _ = self.tx.send(IngestMsg::Eof).await;
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Flush the current buffer as a short segment and flag the next one
    /// as discontinuous. Invoked by supervision around capture recovery.
    pub fn mark_discontinuity(&self) {
        self.segmenter.lock().mark_discontinuity();
    }

    /// Detach from the upstream and stop. Idempotent; in-flight chunks are
    /// dropped and the fragment buffer is NOT flushed.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Continuity snapshot for handoff seeding and status reporting.
    pub fn snapshot(&self) -> PipelineSnapshot {
        self.segmenter.lock().snapshot()
    }

    pub fn health(&self) -> HealthSnapshot {
        self.segmenter.lock().health()
    }

    pub fn store(&self) -> Arc<SegmentStore> {
        self.store.clone()
    }

    /// Await the ingest task. Returns the stream-level error, if any,
    /// exactly once; later calls return `Ok`.
    pub async fn wait(&self) -> Result<()> {
        let handle = self.task.lock().take();
        match handle {
            Some(handle) => match handle.await {
                Ok(result) => result,
                Err(e) => Err(MediaError::Task(e.to_string())),
            },
            None => Ok(()),
        }
    }
}

async fn ingest_loop(
    segmenter: Arc<Mutex<Segmenter>>,
    mut rx: mpsc::Receiver<IngestMsg>,
    cancel: CancellationToken,
) -> Result<()> {
    let mut parser = BoxParser::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                parser.flush();
                segmenter.lock().abort();
                tracing::debug!("pipeline stopped; residual input dropped");
                return Ok(());
            }
            msg = rx.recv() => match msg {
                Some(IngestMsg::Data(chunk)) => {
                    let mut seg = segmenter.lock();
                    if seg.is_stopped() {
                        continue;
                    }
                    if let Err(e) = parser.push(&chunk, |t, b| seg.handle_box(t, b)) {
                        seg.abort();
                        drop(seg);
                        parser.flush();
                        tracing::error!(error = %e, "unrecoverable parse error; pipeline stopped");
                        return Err(e);
                    }
                }
                Some(IngestMsg::Eof) | None => {
                    segmenter.lock().finish()?;
                    tracing::debug!("ingest stream ended");
                    return Ok(());
                }
            }
        }
    }
}
