//! Save job and the muxer seam.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use replaycam_ipc::SaveStatus;
use tracing::{error, info, instrument, warn};

use crate::ring::SaveSnapshot;

/// Result of a successful mux.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MuxSummary {
    /// Final path of the written file.
    pub path: PathBuf,

    /// Number of samples written.
    pub samples: usize,

    /// Duration of the written track in microseconds.
    pub duration_usec: u64,

    /// Size of the written file in bytes.
    pub bytes_written: u64,
}

/// A failed mux, with the status code reported to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MuxFailure {
    pub status: SaveStatus,
    pub message: String,
}

impl MuxFailure {
    /// Create a failure.
    pub fn new(status: SaveStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl fmt::Display for MuxFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.status.message())
    }
}

/// Writes a snapshot to a container file.
///
/// Runs on the save executor, never on the dispatch thread. An implementation
/// must not leave a file at `destination` unless it returns `Ok`.
pub trait Muxer: Send + Sync {
    /// Write `snapshot` to `destination`.
    fn mux(&self, snapshot: &SaveSnapshot, destination: &Path) -> Result<MuxSummary, MuxFailure>;

    /// Muxer name for diagnostics.
    fn name(&self) -> &'static str;
}

/// Completion hook of a save job. Called exactly once.
pub type SaveCompletion = Box<dyn FnOnce(SaveStatus) + Send>;

/// A snapshot waiting to be written.
pub struct SaveJob {
    snapshot: SaveSnapshot,
    destination: PathBuf,
    muxer: Arc<dyn Muxer>,
    on_complete: SaveCompletion,
}

impl SaveJob {
    /// Create a job.
    pub fn new(
        snapshot: SaveSnapshot,
        destination: PathBuf,
        muxer: Arc<dyn Muxer>,
        on_complete: SaveCompletion,
    ) -> Self {
        Self {
            snapshot,
            destination,
            muxer,
            on_complete,
        }
    }

    /// Destination path.
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Chunks to be written.
    pub fn snapshot(&self) -> &SaveSnapshot {
        &self.snapshot
    }

    /// Mux the snapshot and report the outcome. A panicking muxer reports
    /// [`SaveStatus::Mux`].
    #[instrument(name = "save_job", skip(self), fields(path = %self.destination.display(), muxer = self.muxer.name()))]
    pub fn run(self) -> SaveStatus {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.muxer.mux(&self.snapshot, &self.destination)
        }));

        let status = match outcome {
            Err(_) => {
                error!("Muxer panicked");
                SaveStatus::Mux
            }
            Ok(Ok(summary)) => {
                info!(
                    samples = summary.samples,
                    duration_ms = summary.duration_usec / 1000,
                    bytes = summary.bytes_written,
                    "Saved video"
                );
                SaveStatus::Success
            }
            Ok(Err(failure)) => {
                warn!(status = failure.status.code(), "Save failed: {}", failure.message);
                failure.status
            }
        };

        (self.on_complete)(status);
        status
    }

    /// Report `status` without muxing.
    pub fn abandon(self, status: SaveStatus) {
        warn!(path = %self.destination.display(), status = status.code(), "Save abandoned");
        (self.on_complete)(status);
    }
}

impl fmt::Debug for SaveJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SaveJob")
            .field("destination", &self.destination)
            .field("chunks", &self.snapshot.len())
            .field("muxer", &self.muxer.name())
            .finish()
    }
}
