//! Messages processed by the dispatch loop.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A message posted onto the dispatch queue.
///
/// Messages are processed strictly in arrival order on the dispatch thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatchMessage {
    /// The camera has a new image ready to be latched.
    FrameAvailable,

    /// Cosmetic tick toggling the "saving" indicator.
    BlinkTick,

    /// A background save finished. `status == 0` means success.
    FileSaveComplete { status: i32 },

    /// Currently buffered duration, in microseconds.
    BufferStatus { duration_usec: u64 },

    /// Capture the buffered video into `path`.
    Capture { path: PathBuf },

    /// Stop the encoder, release surfaces and exit the loop.
    Shutdown,
}

impl DispatchMessage {
    /// Returns a short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::FrameAvailable => "FrameAvailable",
            Self::BlinkTick => "BlinkTick",
            Self::FileSaveComplete { .. } => "FileSaveComplete",
            Self::BufferStatus { .. } => "BufferStatus",
            Self::Capture { .. } => "Capture",
            Self::Shutdown => "Shutdown",
        }
    }
}
