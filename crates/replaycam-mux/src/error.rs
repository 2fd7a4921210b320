//! Error types for the mux module.

use replaycam_encoder::MuxFailure;
use replaycam_ipc::SaveStatus;
use thiserror::Error;

/// Errors that can occur while writing a container file.
#[derive(Debug, Error)]
pub enum MuxError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// MP4 writer error.
    #[error("MP4 error: {0}")]
    Mp4(#[from] mp4::Error),

    /// The finished file could not be moved into place.
    #[error("Failed to move file into place: {0}")]
    Persist(#[from] tempfile::PersistError),

    /// The stream format carries no SPS/PPS.
    #[error("Stream format has no SPS/PPS")]
    MissingParameterSets,

    /// Nothing to write.
    #[error("No samples to write")]
    Empty,
}

impl MuxError {
    /// Save status reported for this error.
    pub fn status(&self) -> SaveStatus {
        match self {
            Self::Io(_) | Self::Persist(_) => SaveStatus::Io,
            Self::Empty => SaveStatus::NothingBuffered,
            Self::Mp4(_) | Self::MissingParameterSets => SaveStatus::Mux,
        }
    }
}

impl From<MuxError> for MuxFailure {
    fn from(err: MuxError) -> Self {
        MuxFailure::new(err.status(), err.to_string())
    }
}
