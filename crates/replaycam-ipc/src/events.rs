//! Events sent from the dispatch loop to the host.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::state::PipelineState;
use crate::types::PipelineMetrics;

/// Events that the pipeline reports to its host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PipelineEvent {
    /// Pipeline state has changed.
    StateChanged {
        /// Previous state.
        previous: Box<PipelineState>,

        /// Current state.
        current: Box<PipelineState>,
    },

    /// A save finished; `status == 0` means success.
    FileSaveComplete {
        /// Save status code.
        status: i32,

        /// Destination of the save, if one was in flight.
        path: Option<PathBuf>,
    },

    /// Currently buffered duration, in microseconds.
    BufferStatus { duration_usec: u64 },

    /// A capture request was rejected.
    CaptureRejected { reason: String },

    /// Saving indicator blink.
    Blink { visible: bool },

    /// Periodic pipeline metrics.
    Metrics(PipelineMetrics),

    /// Error occurred.
    Error {
        /// Whether the error is recoverable.
        recoverable: bool,

        /// Error message.
        message: String,
    },
}
