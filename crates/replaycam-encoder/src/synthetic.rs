//! Deterministic stand-in for a hardware encoder.
//!
//! Each presented frame becomes one Annex B access unit whose payload encodes
//! the frame number and a digest of the pixels, so tests can tell frames apart
//! after a round trip through the ring and the muxer.

use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use replaycam_gpu::PresentedFrame;
use tracing::{debug, trace};

use crate::chunk::{EncodedChunk, StreamFormat};
use crate::{EncoderOutput, VideoEncoder};

/// Baseline-profile SPS used in the synthetic stream format.
pub const SYNTHETIC_SPS: [u8; 9] = [0x67, 0x42, 0xC0, 0x1E, 0xDA, 0x01, 0x40, 0x16, 0xE8];

/// PPS used in the synthetic stream format.
pub const SYNTHETIC_PPS: [u8; 4] = [0x68, 0xCE, 0x3C, 0x80];

const START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];
const NAL_IDR: u8 = 0x65;
const NAL_NON_IDR: u8 = 0x41;

/// Encoder producing one small access unit per presented frame.
pub struct SyntheticEncoder {
    input: Receiver<PresentedFrame>,
    width: u32,
    height: u32,
    frame_rate: u32,
    keyframe_interval: u64,
    frame_count: u64,
    format_sent: bool,
    eos_requested: bool,
    eos_sent: bool,
    released: bool,
}

impl SyntheticEncoder {
    /// Create an encoder reading frames from `input`.
    pub fn new(
        input: Receiver<PresentedFrame>,
        width: u32,
        height: u32,
        frame_rate: u32,
        keyframe_interval: u64,
    ) -> Self {
        debug!(width, height, frame_rate, keyframe_interval, "Initializing synthetic encoder");
        Self {
            input,
            width,
            height,
            frame_rate: frame_rate.max(1),
            keyframe_interval: keyframe_interval.max(1),
            frame_count: 0,
            format_sent: false,
            eos_requested: false,
            eos_sent: false,
            released: false,
        }
    }

    /// Stream format reported before the first chunk.
    pub fn stream_format(&self) -> StreamFormat {
        let mut config = BytesMut::with_capacity(8 + SYNTHETIC_SPS.len() + SYNTHETIC_PPS.len());
        config.put_slice(&START_CODE);
        config.put_slice(&SYNTHETIC_SPS);
        config.put_slice(&START_CODE);
        config.put_slice(&SYNTHETIC_PPS);

        StreamFormat {
            width: self.width,
            height: self.height,
            codec_config: config.freeze(),
        }
    }

    fn encode(&mut self, frame: PresentedFrame) -> EncodedChunk {
        let is_sync = self.frame_count % self.keyframe_interval == 0;
        let timestamp_ns = frame
            .timestamp_ns
            .unwrap_or(self.frame_count * 1_000_000_000 / self.frame_rate as u64);

        let payload = format!("{:08x}{:08x}", self.frame_count, digest(&frame.pixels));
        let mut data = BytesMut::with_capacity(START_CODE.len() + 1 + payload.len());
        data.put_slice(&START_CODE);
        data.put_u8(if is_sync { NAL_IDR } else { NAL_NON_IDR });
        data.put_slice(payload.as_bytes());

        trace!(frame = self.frame_count, is_sync, "Encoded frame");
        self.frame_count += 1;

        EncodedChunk::new(data.freeze(), timestamp_ns / 1000, is_sync)
    }

    fn end_of_stream(&mut self) -> Option<EncoderOutput> {
        if self.eos_sent {
            return None;
        }
        self.eos_sent = true;
        debug!(frames = self.frame_count, "Synthetic encoder reached end of stream");
        Some(EncoderOutput::EndOfStream)
    }
}

impl VideoEncoder for SyntheticEncoder {
    fn poll_output(&mut self, timeout: Duration) -> Option<EncoderOutput> {
        if self.released || self.eos_sent {
            return None;
        }

        if !self.format_sent {
            self.format_sent = true;
            return Some(EncoderOutput::FormatChanged(self.stream_format()));
        }

        let received = if timeout.is_zero() {
            self.input.try_recv().map_err(|e| match e {
                TryRecvError::Empty => RecvTimeoutError::Timeout,
                TryRecvError::Disconnected => RecvTimeoutError::Disconnected,
            })
        } else {
            self.input.recv_timeout(timeout)
        };

        match received {
            Ok(frame) => Some(EncoderOutput::Chunk(self.encode(frame))),
            Err(RecvTimeoutError::Timeout) if self.eos_requested => self.end_of_stream(),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => self.end_of_stream(),
        }
    }

    fn signal_end_of_stream(&mut self) {
        self.eos_requested = true;
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            debug!("Releasing synthetic encoder");
        }
    }

    fn name(&self) -> &'static str {
        "synthetic"
    }
}

/// FNV-1a over every 61st byte.
fn digest(pixels: &Bytes) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in pixels.iter().step_by(61) {
        hash ^= *byte as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(sequence: u64, timestamp_ns: Option<u64>, fill: u8) -> PresentedFrame {
        PresentedFrame {
            pixels: Bytes::from(vec![fill; 16 * 16 * 4]),
            width: 16,
            height: 16,
            timestamp_ns,
            sequence,
        }
    }

    #[test]
    fn test_format_precedes_chunks() {
        let (_tx, rx) = crossbeam_channel::unbounded();
        let mut encoder = SyntheticEncoder::new(rx, 16, 16, 30, 3);

        match encoder.poll_output(Duration::ZERO) {
            Some(EncoderOutput::FormatChanged(format)) => {
                assert_eq!(format.width, 16);
                assert_eq!(&format.codec_config[..5], &[0, 0, 0, 1, 0x67]);
            }
            other => panic!("expected format, got {:?}", other),
        }
        assert_eq!(encoder.poll_output(Duration::ZERO), None);
    }

    #[test]
    fn test_keyframe_interval_and_timestamps() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut encoder = SyntheticEncoder::new(rx, 16, 16, 30, 3);
        encoder.poll_output(Duration::ZERO);

        for i in 0..7u64 {
            tx.send(frame(i, Some(i * 33_000_000), i as u8)).unwrap();
        }

        let mut chunks = Vec::new();
        while let Some(EncoderOutput::Chunk(chunk)) = encoder.poll_output(Duration::ZERO) {
            chunks.push(chunk);
        }

        assert_eq!(chunks.len(), 7);
        let sync: Vec<bool> = chunks.iter().map(|c| c.is_sync).collect();
        assert_eq!(sync, [true, false, false, true, false, false, true]);
        assert_eq!(chunks[2].pts_usec, 66_000);
        assert_eq!(chunks[0].data[4], 0x65);
        assert_eq!(chunks[1].data[4], 0x41);
        assert_ne!(chunks[0].data, chunks[1].data);
    }

    #[test]
    fn test_missing_timestamp_uses_frame_rate() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut encoder = SyntheticEncoder::new(rx, 16, 16, 25, 10);
        encoder.poll_output(Duration::ZERO);

        tx.send(frame(0, None, 0)).unwrap();
        tx.send(frame(1, None, 0)).unwrap();
        encoder.poll_output(Duration::ZERO);
        match encoder.poll_output(Duration::ZERO) {
            Some(EncoderOutput::Chunk(chunk)) => assert_eq!(chunk.pts_usec, 40_000),
            other => panic!("expected chunk, got {:?}", other),
        }
    }

    #[test]
    fn test_end_of_stream() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut encoder = SyntheticEncoder::new(rx, 16, 16, 30, 3);
        encoder.poll_output(Duration::ZERO);

        tx.send(frame(0, Some(0), 0)).unwrap();
        encoder.signal_end_of_stream();

        assert!(matches!(
            encoder.poll_output(Duration::ZERO),
            Some(EncoderOutput::Chunk(_))
        ));
        assert_eq!(
            encoder.poll_output(Duration::ZERO),
            Some(EncoderOutput::EndOfStream)
        );
        assert_eq!(encoder.poll_output(Duration::ZERO), None);
    }

    #[test]
    fn test_disconnected_input_ends_stream() {
        let (tx, rx) = crossbeam_channel::unbounded::<PresentedFrame>();
        let mut encoder = SyntheticEncoder::new(rx, 16, 16, 30, 3);
        encoder.poll_output(Duration::ZERO);
        drop(tx);

        assert_eq!(
            encoder.poll_output(Duration::from_millis(10)),
            Some(EncoderOutput::EndOfStream)
        );
    }
}
