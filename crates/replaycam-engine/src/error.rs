//! Error types for the engine.

use replaycam_encoder::EncoderError;
use replaycam_gpu::GpuError;
use replaycam_ipc::ConfigError;
use thiserror::Error;

/// Errors reported by the pipeline handle.
#[derive(Debug, Error)]
pub enum EngineError {
    /// GPU context or surface failure.
    #[error("GPU error: {0}")]
    Gpu(#[from] GpuError),

    /// Encoder failure.
    #[error("Encoder error: {0}")]
    Encoder(#[from] EncoderError),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// The dispatch loop is gone.
    #[error("Dispatch channel disconnected")]
    ChannelDisconnected,

    /// A worker thread could not be started.
    #[error("Failed to spawn thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// The pipeline was already shut down.
    #[error("Pipeline is not running")]
    NotRunning,
}
