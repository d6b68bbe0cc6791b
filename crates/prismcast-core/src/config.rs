//! Application configuration types.
//!
//! The top-level [`Config`] struct is deserialized from JSON and carries
//! the server, HLS, and capture sections. Every section defaults sensibly
//! so a completely empty `{}` file is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::Error;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub hls: HlsConfig,
    pub capture: CaptureConfig,
}

impl Config {
    /// Deserialize a `Config` from a JSON string.
    ///
    /// This is intentionally string-based so the caller can read the file
    /// however it sees fit (async, embedded, etc.).
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| Error::Validation(format!("config parse error: {e}")))
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None` or the file does not exist.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {e}", path.display());
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.server.port == 0 {
            warnings.push("server.port is 0; a random port will be assigned".into());
        }

        if self.hls.segment_duration == 0 {
            warnings.push("hls.segment_duration is 0; segments will cut on every fragment".into());
        } else if self.hls.segment_duration > 30 {
            warnings.push(format!(
                "hls.segment_duration {} is unusually long (typical range 2-6)",
                self.hls.segment_duration
            ));
        }

        if self.hls.max_segments < 3 {
            warnings.push(format!(
                "hls.max_segments {} leaves clients almost no buffer (typical range 6-30)",
                self.hls.max_segments
            ));
        }

        for (i, ch) in self.capture.channels.iter().enumerate() {
            if ch.id.is_empty() {
                warnings.push(format!("capture.channels[{i}].id is empty"));
            }
            if ch.source.as_os_str().is_empty() {
                warnings.push(format!("capture.channels[{i}].source is empty"));
            }
        }

        let mut seen = std::collections::HashSet::new();
        for ch in &self.capture.channels {
            if !seen.insert(ch.id.as_str()) {
                warnings.push(format!("duplicate channel id '{}'", ch.id));
            }
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 5589,
        }
    }
}

/// HLS segmentation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HlsConfig {
    /// Target media segment duration in seconds.
    pub segment_duration: u64,
    /// Sliding playlist window size; older segments are evicted.
    pub max_segments: usize,
    /// Per-fragment keyframe cadence diagnostics (off by default).
    pub keyframe_diagnostics: bool,
}

impl Default for HlsConfig {
    fn default() -> Self {
        Self {
            segment_duration: 4,
            max_segments: 12,
            keyframe_diagnostics: false,
        }
    }
}

impl HlsConfig {
    /// The target cut interval as a [`Duration`].
    pub fn target_duration(&self) -> Duration {
        Duration::from_secs(self.segment_duration)
    }
}

/// Capture layer settings.
///
/// The channel list is the interface to the external channel database;
/// each channel's `source` path is where the external capture process
/// (the headless browser) writes its fMP4 byte stream (a file or FIFO).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Tear down a stream after no client has touched it for this long.
    pub idle_timeout_secs: u64,
    pub channels: Vec<ChannelConfig>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 60,
            channels: Vec::new(),
        }
    }
}

/// A single capturable channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub id: String,
    pub name: String,
    /// Path the capture process writes the fMP4 stream to.
    pub source: PathBuf,
}
