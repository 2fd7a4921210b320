//! Capture pipeline configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading or validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Reading the configuration file failed.
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file is not valid JSON for [`CaptureConfig`].
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// A field holds an unusable value.
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Configuration for the capture pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Encoder surface width in pixels (default: 1280).
    pub width: u32,

    /// Encoder surface height in pixels (default: 720).
    pub height: u32,

    /// Nominal encoder frame rate (default: 30).
    pub frame_rate: u32,

    /// Encoder bitrate in bits per second (default: 6,000,000).
    pub bitrate_bps: u32,

    /// Seconds between sync frames (default: 10).
    pub keyframe_interval_secs: u32,

    /// Seconds of video kept in the ring buffer (default: 7).
    pub buffer_window_secs: u32,

    /// Emit a buffer status every N encoder frames (default: 10).
    pub buffer_status_interval_frames: u32,

    /// Maximum wait for encoder output per poll, in ms (default: 0).
    pub drain_timeout_ms: u64,

    /// Dispatch loop idle tick, in ms (default: 20).
    pub poll_interval_ms: u64,

    /// Saving indicator blink cadence, in ms (default: 500).
    pub blink_interval_ms: u64,

    /// Draw the diagnostic overlay (default: true).
    pub show_overlay: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            frame_rate: 30,
            bitrate_bps: 6_000_000,
            keyframe_interval_secs: 10,
            buffer_window_secs: 7,
            buffer_status_interval_frames: 10,
            drain_timeout_ms: 0,
            poll_interval_ms: 20,
            blink_interval_ms: 500,
            show_overlay: true,
        }
    }
}

impl CaptureConfig {
    /// Load a configuration from a JSON file. Missing fields take defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every field holds a usable value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "resolution must be nonzero, got {}x{}",
                self.width, self.height
            )));
        }
        if self.width % 2 != 0 || self.height % 2 != 0 {
            return Err(ConfigError::Invalid(format!(
                "resolution must be even, got {}x{}",
                self.width, self.height
            )));
        }
        if self.frame_rate == 0 {
            return Err(ConfigError::Invalid("frame_rate must be nonzero".into()));
        }
        if self.bitrate_bps == 0 {
            return Err(ConfigError::Invalid("bitrate_bps must be nonzero".into()));
        }
        if self.keyframe_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "keyframe_interval_secs must be nonzero".into(),
            ));
        }
        if self.buffer_window_secs == 0 {
            return Err(ConfigError::Invalid(
                "buffer_window_secs must be nonzero".into(),
            ));
        }
        if self.buffer_status_interval_frames == 0 {
            return Err(ConfigError::Invalid(
                "buffer_status_interval_frames must be nonzero".into(),
            ));
        }
        if self.poll_interval_ms == 0 || self.blink_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "poll and blink intervals must be nonzero".into(),
            ));
        }
        Ok(())
    }

    /// Ring buffer duration window.
    pub fn buffer_window(&self) -> Duration {
        Duration::from_secs(self.buffer_window_secs as u64)
    }

    /// Ring buffer byte bound: one window's worth of data at the target bitrate.
    pub fn max_buffer_bytes(&self) -> usize {
        (self.bitrate_bps as u64 * self.buffer_window_secs as u64 / 8) as usize
    }

    /// Frames between sync frames.
    pub fn keyframe_interval_frames(&self) -> u64 {
        (self.frame_rate as u64 * self.keyframe_interval_secs as u64).max(1)
    }

    /// Maximum wait for encoder output per poll.
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    /// Dispatch loop idle tick.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Saving indicator blink cadence.
    pub fn blink_interval(&self) -> Duration {
        Duration::from_millis(self.blink_interval_ms)
    }
}
