//! Frame dispatch and save coordination for replaycam.
//!
//! A [`Pipeline`] owns one dispatch thread. Camera notifications, encoder
//! callbacks and capture requests are queued onto it and handled in order:
//! each camera frame is drawn to the display and, unless a save is running,
//! to the encoder's input surface.

mod coordinator;
mod dispatch;
mod error;
mod host;
mod metrics;
mod orchestrator;
mod source;
mod state;

pub use coordinator::{CaptureOutcome, SaveCoordinator, SaveTarget};
pub use error::EngineError;
pub use host::{ChannelHost, PipelineHost};
pub use metrics::MetricsCollector;
pub use orchestrator::{Pipeline, PipelineParts};
pub use source::{test_pattern, SyntheticCamera};
pub use state::{GpuResources, StartupInputs};

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
