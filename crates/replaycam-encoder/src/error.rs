//! Error types for the encoder module.

use thiserror::Error;

/// Errors that can occur during encoding operations.
#[derive(Debug, Error)]
pub enum EncoderError {
    /// A save was requested while another one is active.
    #[error("A save is already in progress")]
    AlreadyInProgress,

    /// The encoder has been shut down.
    #[error("Encoder is closed")]
    EncoderClosed,

    /// Backend initialization failed.
    #[error("Initialization failed: {0}")]
    Initialization(String),

    /// Backend encoding error.
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Invalid input data.
    #[error("Invalid input data: {0}")]
    InvalidInput(String),

    /// Backend not compiled in or not available on this platform.
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// The encoder input surface is gone.
    #[error("Encoder input disconnected")]
    InputDisconnected,
}
