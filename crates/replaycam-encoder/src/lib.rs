//! Encoder core for replaycam.
//!
//! Encoded output is kept in a bounded [`ChunkRing`]; the
//! [`CircularEncoder`] drives a [`VideoEncoder`] backend, owns the ring and
//! runs the save-to-file state machine. Muxing itself happens behind the
//! [`Muxer`] seam on a [`SaveExecutor`].

mod chunk;
mod circular;
mod error;
mod executor;
mod ring;
mod save;
mod synthetic;
#[cfg(feature = "x264")]
mod x264;

pub use chunk::{EncodedChunk, StreamFormat};
pub use circular::{CircularEncoder, EncoderCallback, EncoderState};
pub use error::EncoderError;
pub use executor::{BackgroundExecutor, InlineExecutor, SaveExecutor};
pub use ring::{ChunkRing, SaveSnapshot};
pub use save::{MuxFailure, MuxSummary, Muxer, SaveCompletion, SaveJob};
pub use synthetic::{SyntheticEncoder, SYNTHETIC_PPS, SYNTHETIC_SPS};
#[cfg(feature = "x264")]
pub use x264::X264Encoder;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use replaycam_gpu::{CpuSurface, TextureStore};
use replaycam_ipc::CaptureConfig;

/// Frames that may wait between the encoder input surface and the encoder.
pub const ENCODER_INPUT_CAPACITY: usize = 8;

/// Result type for encoder operations.
pub type EncoderResult<T> = Result<T, EncoderError>;

/// One item of encoder output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncoderOutput {
    /// Output format is known; precedes the first chunk.
    FormatChanged(StreamFormat),

    /// An encoded access unit.
    Chunk(EncodedChunk),

    /// No further output will be produced.
    EndOfStream,
}

/// Trait for video encoders fed through an input surface.
pub trait VideoEncoder: Send {
    /// Take the next available output, waiting at most `timeout`.
    /// A zero timeout never blocks.
    fn poll_output(&mut self, timeout: Duration) -> Option<EncoderOutput>;

    /// Stop accepting input; output ends with [`EncoderOutput::EndOfStream`].
    fn signal_end_of_stream(&mut self);

    /// Free native resources. Further polls return `None`.
    fn release(&mut self);

    /// Get encoder name for diagnostics.
    fn name(&self) -> &'static str;
}

/// Available encoder backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncoderKind {
    #[default]
    Synthetic,
    X264,
}

impl EncoderKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Synthetic => "synthetic",
            Self::X264 => "x264",
        }
    }
}

impl fmt::Display for EncoderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EncoderKind {
    type Err = EncoderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "synthetic" => Ok(Self::Synthetic),
            "x264" => Ok(Self::X264),
            other => Err(EncoderError::NotSupported(format!(
                "unknown encoder '{}'",
                other
            ))),
        }
    }
}

/// Create an encoder and the surface that feeds it.
///
/// Frames swapped on the returned surface become encoder input.
pub fn create_surface_encoder(
    kind: EncoderKind,
    config: &CaptureConfig,
    textures: TextureStore,
) -> EncoderResult<(Box<dyn VideoEncoder>, CpuSurface)> {
    let (tx, rx) = crossbeam_channel::bounded(ENCODER_INPUT_CAPACITY);
    let surface = CpuSurface::new(config.width, config.height, textures).with_sink(tx);

    let encoder: Box<dyn VideoEncoder> = match kind {
        EncoderKind::Synthetic => Box::new(SyntheticEncoder::new(
            rx,
            config.width,
            config.height,
            config.frame_rate,
            config.keyframe_interval_frames(),
        )),
        #[cfg(feature = "x264")]
        EncoderKind::X264 => Box::new(X264Encoder::new(rx, config)?),
        #[cfg(not(feature = "x264"))]
        EncoderKind::X264 => {
            return Err(EncoderError::NotSupported(
                "x264 support was not compiled in".into(),
            ))
        }
    };

    tracing::info!(encoder = encoder.name(), "Created surface encoder");
    Ok((encoder, surface))
}
