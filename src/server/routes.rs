//! Route handlers: HLS egress and status.
//!
//! The three stream routes are the contract the home-DVR client consumes:
//! a live media playlist, the versioned init segment, and numbered media
//! segments. Evicted segments return 404 (late readers are expected).

use axum::extract::{Path, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use std::time::Duration;

use prismcast_core::events::Event;
use prismcast_core::Error;

use super::error::AppError;
use super::AppContext;
use crate::supervisor::StreamStatus;

/// How long the first playlist request may wait for the capture to
/// produce enough data for an initial segment.
const PLAYLIST_WAIT: Duration = Duration::from_secs(8);

const CONTENT_TYPE_M3U8: &str = "application/vnd.apple.mpegurl";
const CONTENT_TYPE_MP4: &str = "video/mp4";
const CONTENT_TYPE_SEGMENT: &str = "video/iso.segment";

/// GET /health
pub async fn health_check() -> &'static str {
    "ok"
}

/// GET /stream/{channel}/playlist.m3u8
///
/// Tunes the channel on first request and waits briefly for the first
/// playlist revision so clients don't 404 while the capture spins up.
pub async fn playlist(
    State(ctx): State<AppContext>,
    Path(channel): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let stream = ctx.supervisor.tune(&channel)?;

    let playlist = stream
        .store()
        .wait_for_playlist(PLAYLIST_WAIT)
        .await
        .ok_or_else(|| Error::not_found("playlist", &channel))?;

    Ok((
        [
            (header::CONTENT_TYPE, CONTENT_TYPE_M3U8),
            (header::CACHE_CONTROL, "no-store"),
        ],
        playlist,
    ))
}

/// GET /stream/{channel}/init.mp4
///
/// The `v=` query string clients append is the cache-bust mechanism; the
/// bytes for a given version never change, hence the immutable cache
/// policy.
pub async fn init_segment(
    State(ctx): State<AppContext>,
    Path(channel): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let stream = ctx
        .supervisor
        .get(&channel)
        .ok_or_else(|| Error::not_found("stream", &channel))?;

    let init = stream
        .store()
        .init()
        .ok_or_else(|| Error::not_found("init segment", &channel))?;

    Ok((
        [
            (header::CONTENT_TYPE, CONTENT_TYPE_MP4),
            (header::CACHE_CONTROL, "max-age=31536000, immutable"),
        ],
        init.bytes,
    ))
}

/// GET /stream/{channel}/{segment}
///
/// Serves `segment{N}.m4s` from the ring; anything else is rejected.
pub async fn media_segment(
    State(ctx): State<AppContext>,
    Path((channel, segment)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let index: u64 = segment
        .strip_prefix("segment")
        .and_then(|s| s.strip_suffix(".m4s"))
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::Validation(format!("invalid segment name '{segment}'")))?;

    let stream = ctx
        .supervisor
        .get(&channel)
        .ok_or_else(|| Error::not_found("stream", &channel))?;

    let bytes = stream
        .store()
        .segment(index)
        .ok_or_else(|| Error::not_found("segment", index))?;

    Ok((
        [
            (header::CONTENT_TYPE, CONTENT_TYPE_SEGMENT),
            (header::CACHE_CONTROL, "max-age=31536000, immutable"),
        ],
        bytes,
    ))
}

// ---------------------------------------------------------------------------
// Status endpoints
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct StatusResponse {
    pub streams: Vec<StreamStatus>,
    pub recent_events: Vec<Event>,
}

/// GET /api/status
pub async fn status(State(ctx): State<AppContext>) -> Json<StatusResponse> {
    Json(StatusResponse {
        streams: ctx.supervisor.health(),
        recent_events: ctx.events.recent_events(20),
    })
}

#[derive(Serialize)]
pub struct ChannelSummary {
    pub id: String,
    pub name: String,
    pub active: bool,
}

/// GET /api/channels
pub async fn channels(State(ctx): State<AppContext>) -> Json<Vec<ChannelSummary>> {
    let channels = ctx
        .config
        .capture
        .channels
        .iter()
        .map(|c| ChannelSummary {
            id: c.id.clone(),
            name: c.name.clone(),
            active: ctx.supervisor.is_active(&c.id),
        })
        .collect();
    Json(channels)
}
