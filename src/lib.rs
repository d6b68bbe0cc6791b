//! PrismCast - live browser-capture re-streamer.
//!
//! This library crate exposes the application layers for integration
//! testing: the capture seam, per-channel supervision, configuration
//! loading, and the HTTP server.

pub mod capture;
pub mod config;
pub mod server;
pub mod supervisor;
