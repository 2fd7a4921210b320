//! x264 software video encoder.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use replaycam_gpu::PresentedFrame;
use replaycam_ipc::CaptureConfig;
use tracing::{debug, instrument, trace, warn};

use crate::chunk::{EncodedChunk, StreamFormat};
use crate::error::EncoderError;
use crate::{EncoderOutput, EncoderResult, VideoEncoder};

/// x264 encoder reading RGBA frames from the encoder input surface.
pub struct X264Encoder {
    encoder: Option<x264::Encoder>,
    input: Receiver<PresentedFrame>,
    width: u32,
    height: u32,
    fps: u32,
    frame_count: u64,
    /// Input timestamps by encoder pts (frame index).
    timestamps: HashMap<i64, u64>,
    /// SPS/PPS in Annex B form.
    headers: Bytes,
    format_sent: bool,
    pending: VecDeque<EncoderOutput>,
    nv12: Vec<u8>,
    eos_requested: bool,
    eos_sent: bool,
}

impl X264Encoder {
    /// Create a new x264 encoder.
    #[instrument(name = "x264_new", skip_all)]
    pub fn new(input: Receiver<PresentedFrame>, config: &CaptureConfig) -> EncoderResult<Self> {
        let bitrate_kbps = (config.bitrate_bps / 1000).max(1);
        let keyframe_interval = config.keyframe_interval_frames();
        debug!(
            width = config.width,
            height = config.height,
            fps = config.frame_rate,
            bitrate_kbps,
            keyframe_interval,
            "Initializing x264 encoder"
        );

        let setup = x264::Setup::preset(
            x264::Preset::Veryfast,
            x264::Tune::None,
            false, // fast_decode
            true,  // zero_latency
        )
        .fps(config.frame_rate, 1)
        .bitrate(bitrate_kbps as i32)
        .max_keyframe_interval(keyframe_interval as i32)
        .scenecut_threshold(0)
        .baseline();

        let mut encoder = setup
            .build(
                x264::Colorspace::NV12,
                config.width as i32,
                config.height as i32,
            )
            .map_err(|e| EncoderError::Initialization(format!("x264 setup failed: {:?}", e)))?;

        let headers = encoder
            .headers()
            .map(|h| Bytes::from(h.entirety().to_vec()))
            .map_err(|e| EncoderError::Initialization(format!("x264 headers: {:?}", e)))?;

        debug!(header_size = headers.len(), "x264 encoder initialized");

        Ok(Self {
            encoder: Some(encoder),
            input,
            width: config.width,
            height: config.height,
            fps: config.frame_rate.max(1),
            frame_count: 0,
            timestamps: HashMap::new(),
            headers,
            format_sent: false,
            pending: VecDeque::new(),
            nv12: vec![0; (config.width * config.height * 3 / 2) as usize],
            eos_requested: false,
            eos_sent: false,
        })
    }

    #[instrument(name = "x264_encode", skip(self, frame), fields(sequence = frame.sequence))]
    fn encode(&mut self, frame: PresentedFrame) -> EncoderResult<Option<EncodedChunk>> {
        if frame.width != self.width || frame.height != self.height {
            return Err(EncoderError::InvalidInput(format!(
                "Expected {}x{} frame, got {}x{}",
                self.width, self.height, frame.width, frame.height
            )));
        }

        rgba_to_nv12(&frame.pixels, self.width, self.height, &mut self.nv12);

        let y_size = (self.width * self.height) as usize;
        let image = x264::Image::new(
            x264::Colorspace::NV12,
            self.width as i32,
            self.height as i32,
            &[
                x264::Plane {
                    data: &self.nv12[..y_size],
                    stride: self.width as i32,
                },
                x264::Plane {
                    data: &self.nv12[y_size..],
                    stride: self.width as i32,
                },
            ],
        );

        let timestamp_ns = frame
            .timestamp_ns
            .unwrap_or(self.frame_count * 1_000_000_000 / self.fps as u64);
        let pts_usec = timestamp_ns / 1000;

        let pts = self.frame_count as i64;
        self.timestamps.insert(pts, pts_usec);

        let encoder = self
            .encoder
            .as_mut()
            .ok_or_else(|| EncoderError::Encoding("Encoder has been flushed".to_string()))?;
        let (data, picture) = encoder
            .encode(pts, image)
            .map_err(|e| EncoderError::Encoding(format!("x264 encode failed: {:?}", e)))?;

        self.frame_count += 1;
        trace!(frame = self.frame_count, pts_usec, "Encoded frame");

        if data.len() == 0 {
            return Ok(None);
        }

        let payload = Bytes::from(data.entirety().to_vec());
        let is_sync = picture.keyframe();
        let pts_usec = self.output_pts_usec(picture.pts());
        Ok(Some(EncodedChunk::new(payload, pts_usec, is_sync)))
    }

    fn output_pts_usec(&mut self, pts: i64) -> u64 {
        self.timestamps
            .remove(&pts)
            .unwrap_or(pts.max(0) as u64 * 1_000_000 / self.fps as u64)
    }

    fn flush(&mut self) {
        let Some(encoder) = self.encoder.take() else {
            return;
        };
        debug!("Flushing x264 encoder");

        let mut flush = encoder.flush();
        loop {
            match flush.next() {
                Some(Ok((data, picture))) => {
                    if data.len() > 0 {
                        let pts_usec = self.output_pts_usec(picture.pts());
                        self.pending.push_back(EncoderOutput::Chunk(EncodedChunk::new(
                            Bytes::from(data.entirety().to_vec()),
                            pts_usec,
                            picture.keyframe(),
                        )));
                    }
                }
                Some(Err(e)) => {
                    debug!("Flush iteration ended: {:?}", e);
                    break;
                }
                None => break,
            }
        }
        self.pending.push_back(EncoderOutput::EndOfStream);
    }
}

impl VideoEncoder for X264Encoder {
    fn poll_output(&mut self, timeout: Duration) -> Option<EncoderOutput> {
        if !self.format_sent {
            self.format_sent = true;
            return Some(EncoderOutput::FormatChanged(StreamFormat {
                width: self.width,
                height: self.height,
                codec_config: self.headers.clone(),
            }));
        }

        loop {
            if let Some(output) = self.pending.pop_front() {
                if output == EncoderOutput::EndOfStream {
                    self.eos_sent = true;
                }
                return Some(output);
            }
            if self.eos_sent || self.encoder.is_none() {
                return None;
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
                Ok(frame) => match self.encode(frame) {
                    Ok(Some(chunk)) => return Some(EncoderOutput::Chunk(chunk)),
                    // Buffered inside x264; look for more input.
                    Ok(None) => continue,
                    Err(e) => {
                        warn!("Dropping frame: {}", e);
                        continue;
                    }
                },
                Err(RecvTimeoutError::Timeout) if !self.eos_requested => return None,
                Err(_) => self.flush(),
            }
        }
    }

    fn signal_end_of_stream(&mut self) {
        self.eos_requested = true;
    }

    fn release(&mut self) {
        if self.encoder.take().is_some() {
            debug!("Closing x264 encoder");
        }
        self.pending.clear();
    }

    fn name(&self) -> &'static str {
        "x264"
    }
}

// SAFETY: x264::Encoder uses raw pointers internally but is designed for
// single-threaded use. The encoder is only accessed from the dispatch thread.
unsafe impl Send for X264Encoder {}

/// Convert bottom-up RGBA to top-down NV12 (BT.601, limited range).
fn rgba_to_nv12(rgba: &[u8], width: u32, height: u32, out: &mut [u8]) {
    let (w, h) = (width as usize, height as usize);
    let (y_plane, uv_plane) = out.split_at_mut(w * h);

    let pixel = |x: usize, row: usize| -> (i32, i32, i32) {
        // Row 0 of the output is the top of the image.
        let offset = ((h - 1 - row) * w + x) * 4;
        (
            rgba[offset] as i32,
            rgba[offset + 1] as i32,
            rgba[offset + 2] as i32,
        )
    };

    for row in 0..h {
        for x in 0..w {
            let (r, g, b) = pixel(x, row);
            y_plane[row * w + x] = (((66 * r + 129 * g + 25 * b + 128) >> 8) + 16) as u8;
        }
    }

    for row in (0..h).step_by(2) {
        for x in (0..w).step_by(2) {
            let (r, g, b) = pixel(x, row);
            let u = ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128;
            let v = ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128;
            let offset = (row / 2) * w + x;
            uv_plane[offset] = u.clamp(0, 255) as u8;
            uv_plane[offset + 1] = v.clamp(0, 255) as u8;
        }
    }
}
