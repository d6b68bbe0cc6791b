//! prismcast-core: shared types, errors, configuration, and event system.
//!
//! This crate is the foundational dependency for the other prismcast
//! crates, providing a unified error type, application configuration,
//! and a broadcast event bus for stream lifecycle notifications.

pub mod config;
pub mod error;
pub mod events;

// Re-export the most commonly used items at the crate root.
pub use config::Config;
pub use error::{Error, Result};
