//! Configuration loading helpers.
//!
//! The config types live in `prismcast-core`; this module adds the
//! application-level load paths (lenient with warnings for startup,
//! strict for `prismcast validate`).

pub use prismcast_core::config::{
    CaptureConfig, ChannelConfig, Config, HlsConfig, ServerConfig,
};

use anyhow::Result;
use std::path::Path;

/// Load configuration, falling back to defaults on any problem, and log
/// validation warnings.
pub fn load_config_or_default(path: Option<&Path>) -> Result<Config> {
    let config = Config::load_or_default(path);
    for warning in config.validate() {
        tracing::warn!("config: {warning}");
    }
    Ok(config)
}

/// Strict load for explicit validation: any read or parse failure is an
/// error.
pub fn load_config(path: &Path) -> Result<Config> {
    let contents = std::fs::read_to_string(path)?;
    let config = Config::from_json(&contents)?;
    Ok(config)
}
