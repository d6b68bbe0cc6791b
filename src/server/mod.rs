//! Axum HTTP layer.
//!
//! Serves the per-channel HLS egress (playlist, init segment, media
//! segments) straight from each stream's in-memory segment store, plus
//! small status endpoints for operational visibility.

pub mod error;
pub mod routes;

use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use prismcast_core::events::EventBus;
use prismcast_core::{Config, Result};

use crate::supervisor::Supervisor;

/// Application context shared by all request handlers (via Axum state).
///
/// Cheaply cloneable because it only holds `Arc`s.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub supervisor: Arc<Supervisor>,
    pub events: Arc<EventBus>,
}

/// Build the complete Axum router.
pub fn build_router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(routes::health_check))
        .route("/api/status", get(routes::status))
        .route("/api/channels", get(routes::channels))
        .route("/stream/{channel}/playlist.m3u8", get(routes::playlist))
        .route("/stream/{channel}/init.mp4", get(routes::init_segment))
        .route("/stream/{channel}/{segment}", get(routes::media_segment))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

/// Bind and serve until the process is terminated.
pub async fn start_server(
    config: Arc<Config>,
    supervisor: Arc<Supervisor>,
    events: Arc<EventBus>,
) -> Result<()> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let ctx = AppContext {
        config,
        supervisor,
        events,
    };
    let app = build_router(ctx);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("HTTP server listening on {addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
