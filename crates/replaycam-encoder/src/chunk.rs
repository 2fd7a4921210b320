//! Encoder output units.

use bytes::Bytes;

/// One compressed access unit produced by the encoder.
///
/// Immutable once produced; cloning shares the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedChunk {
    /// Annex B payload.
    pub data: Bytes,

    /// Presentation timestamp in microseconds.
    pub pts_usec: u64,

    /// Whether this is a synchronization (key) frame.
    pub is_sync: bool,
}

impl EncodedChunk {
    /// Create a chunk.
    pub fn new(data: Bytes, pts_usec: u64, is_sync: bool) -> Self {
        Self {
            data,
            pts_usec,
            is_sync,
        }
    }

    /// Payload size in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Output format reported by the encoder before its first chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFormat {
    /// Coded width in pixels.
    pub width: u32,

    /// Coded height in pixels.
    pub height: u32,

    /// Codec configuration (SPS/PPS) in Annex B form.
    pub codec_config: Bytes,
}
