//! Common types used across pipeline events.

use serde::{Deserialize, Serialize};

/// Snapshot of pipeline counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineMetrics {
    /// Display render rate since the last report.
    pub render_fps: f32,

    /// Frame notifications received from the camera.
    pub frames_available: u64,

    /// Notifications dropped because one was already pending.
    pub frames_coalesced: u64,

    /// Frames drawn to the display surface.
    pub frames_rendered: u64,

    /// Frames drawn to the encoder surface.
    pub frames_submitted: u64,

    /// Frames not submitted to the encoder because a save was in progress.
    pub frames_paused: u64,

    /// Draw calls that failed (frame skipped).
    pub draw_failures: u64,

    /// Swap/present calls that failed (frame skipped).
    pub swap_failures: u64,

    /// Saves that completed successfully.
    pub saves_completed: u64,

    /// Saves that reported a nonzero status.
    pub saves_failed: u64,

    /// Last reported buffered duration, in microseconds.
    pub buffered_usec: u64,

    /// Pipeline uptime in seconds.
    pub uptime_seconds: u64,
}
