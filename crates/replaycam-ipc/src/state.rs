//! Pipeline state machine types.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// The current state of the capture pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineState {
    /// Pipeline has not been started.
    #[default]
    Idle,

    /// Pipeline is binding its GPU resources.
    Starting {
        /// Current startup phase.
        phase: StartupPhase,
    },

    /// Frames are rendered to the display and fed to the encoder.
    Running,

    /// A save is in progress; the encoder is not being fed.
    Saving {
        /// Destination of the save.
        path: PathBuf,
    },

    /// Pipeline is releasing its resources.
    ShuttingDown,

    /// Pipeline has stopped.
    Stopped,

    /// Pipeline failed to start or hit a fatal error.
    Error {
        /// Error message.
        message: String,
    },
}

impl PipelineState {
    /// Returns true if the pipeline is processing frames.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::Saving { .. })
    }

    /// Returns true if a save is in progress.
    pub fn is_saving(&self) -> bool {
        matches!(self, Self::Saving { .. })
    }

    /// Returns true if the pipeline has stopped.
    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped)
    }

    /// Returns a simple string representation of the state.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Starting { .. } => "Starting",
            Self::Running => "Running",
            Self::Saving { .. } => "Saving",
            Self::ShuttingDown => "ShuttingDown",
            Self::Stopped => "Stopped",
            Self::Error { .. } => "Error",
        }
    }
}

/// Startup phases for the pipeline, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StartupPhase {
    /// Checking the GPU context.
    BindContext,

    /// Binding the display surface.
    BindDisplaySurface,

    /// Binding the encoder input surface.
    BindEncoderSurface,

    /// Registering the frame listener on the camera source.
    AttachSource,
}

impl StartupPhase {
    /// Returns the next phase, if any.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::BindContext => Some(Self::BindDisplaySurface),
            Self::BindDisplaySurface => Some(Self::BindEncoderSurface),
            Self::BindEncoderSurface => Some(Self::AttachSource),
            Self::AttachSource => None,
        }
    }

    /// Returns the previous phase, if any (for rollback).
    pub fn previous(self) -> Option<Self> {
        match self {
            Self::BindContext => None,
            Self::BindDisplaySurface => Some(Self::BindContext),
            Self::BindEncoderSurface => Some(Self::BindDisplaySurface),
            Self::AttachSource => Some(Self::BindEncoderSurface),
        }
    }

    /// Returns the display name for this phase.
    pub fn name(self) -> &'static str {
        match self {
            Self::BindContext => "Checking GPU context",
            Self::BindDisplaySurface => "Binding display surface",
            Self::BindEncoderSurface => "Binding encoder surface",
            Self::AttachSource => "Attaching camera source",
        }
    }
}

/// Terminal status of a save, delivered as an integer code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum SaveStatus {
    /// File written and moved into place.
    Success = 0,

    /// Nothing decodable was buffered (no sync chunk or no stream format).
    NothingBuffered = 1,

    /// Writing or renaming the file failed.
    Io = 2,

    /// The container muxer rejected the stream.
    Mux = 3,

    /// The background save context was unavailable.
    ExecutorUnavailable = 4,
}

impl SaveStatus {
    /// Integer code delivered through `FileSaveComplete`.
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Maps a status code back to a known status.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Success),
            1 => Some(Self::NothingBuffered),
            2 => Some(Self::Io),
            3 => Some(Self::Mux),
            4 => Some(Self::ExecutorUnavailable),
            _ => None,
        }
    }

    /// Returns true for [`SaveStatus::Success`].
    pub fn is_success(self) -> bool {
        self == Self::Success
    }

    /// Returns a display message for this status.
    pub fn message(self) -> &'static str {
        match self {
            Self::Success => "Video saved",
            Self::NothingBuffered => "No decodable video buffered yet",
            Self::Io => "Failed to write video file",
            Self::Mux => "Failed to mux video",
            Self::ExecutorUnavailable => "Save worker unavailable",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup_phases_walk_both_ways() {
        let mut phase = StartupPhase::BindContext;
        let mut forward = vec![phase];
        while let Some(next) = phase.next() {
            forward.push(next);
            phase = next;
        }
        assert_eq!(forward.len(), 4);
        assert_eq!(phase, StartupPhase::AttachSource);

        let mut backward = vec![phase];
        while let Some(prev) = phase.previous() {
            backward.push(prev);
            phase = prev;
        }
        backward.reverse();
        assert_eq!(forward, backward);
    }

    #[test]
    fn test_save_status_codes() {
        assert_eq!(SaveStatus::Success.code(), 0);
        assert_eq!(SaveStatus::NothingBuffered.code(), 1);
        assert_eq!(SaveStatus::Io.code(), 2);
        for code in 0..5 {
            let status = SaveStatus::from_code(code).unwrap();
            assert_eq!(status.code(), code);
        }
        assert!(SaveStatus::from_code(42).is_none());
        assert!(SaveStatus::Success.is_success());
        assert!(!SaveStatus::Mux.is_success());
    }

    #[test]
    fn test_saving_state_is_active() {
        let state = PipelineState::Saving {
            path: PathBuf::from("/tmp/out.mp4"),
        };
        assert!(state.is_active());
        assert!(state.is_saving());
        assert_eq!(state.name(), "Saving");
        assert!(!PipelineState::Idle.is_active());
    }
}
