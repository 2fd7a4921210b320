//! Typed messages shared by the replaycam pipeline crates.
//!
//! This crate defines the dispatch-queue messages, the events surfaced to a
//! host application, the pipeline state machine types and the capture
//! configuration.

mod config;
mod events;
mod messages;
mod state;
mod types;

pub use config::{CaptureConfig, ConfigError};
pub use events::PipelineEvent;
pub use messages::DispatchMessage;
pub use state::{PipelineState, SaveStatus, StartupPhase};
pub use types::PipelineMetrics;

use crossbeam_channel::{Receiver, Sender};

/// Queued events (dispatch thread → host) past which periodic events are dropped.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Creates the event channel.
///
/// The channel is unbounded so terminal events never block the dispatch
/// thread; senders cap periodic events at [`EVENT_CHANNEL_CAPACITY`].
pub fn event_channel() -> (Sender<PipelineEvent>, Receiver<PipelineEvent>) {
    crossbeam_channel::unbounded()
}
