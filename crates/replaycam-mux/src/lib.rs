//! Container muxing for saved clips.
//!
//! This crate converts buffered Annex B access units to AVCC samples and
//! writes them as a single-track MP4.

mod error;
mod muxer;
pub mod nal;

pub use muxer::{Mp4Muxer, MP4_TIMESCALE};
pub use error::MuxError;

/// Result type for mux operations.
pub type MuxResult<T> = Result<T, MuxError>;
