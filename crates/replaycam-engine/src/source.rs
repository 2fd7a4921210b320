//! Synthetic camera feeding an [`ImageProducer`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, info, warn};

use replaycam_gpu::{CpuImage, ImageProducer, Transform};
use replaycam_ipc::ConfigError;

use crate::{EngineError, EngineResult};

const BAR_COLORS: [[u8; 4]; 8] = [
    [255, 255, 255, 255],
    [255, 255, 0, 255],
    [0, 255, 255, 255],
    [0, 255, 0, 255],
    [255, 0, 255, 255],
    [255, 0, 0, 255],
    [0, 0, 255, 255],
    [0, 0, 0, 255],
];

/// Color bars shifted four pixels per frame.
pub fn test_pattern(frame: u64, width: u32, height: u32) -> Bytes {
    let mut pixels = vec![0u8; width as usize * height as usize * 4];
    if width == 0 {
        return Bytes::from(pixels);
    }

    let bar = (width / 8).max(1);
    let shift = ((frame * 4) % width as u64) as u32;

    for (i, px) in pixels.chunks_exact_mut(4).enumerate() {
        let x = i as u32 % width;
        let band = ((x + shift) / bar) % 8;
        px.copy_from_slice(&BAR_COLORS[band as usize]);
    }

    Bytes::from(pixels)
}

/// Produces camera images at a fixed rate on its own thread.
pub struct SyntheticCamera {
    stop: Arc<AtomicBool>,
    frames: Arc<AtomicU64>,
    handle: Option<JoinHandle<()>>,
}

impl SyntheticCamera {
    /// Start producing `width` x `height` images at `frame_rate`.
    pub fn start(
        producer: ImageProducer,
        width: u32,
        height: u32,
        frame_rate: u32,
    ) -> EngineResult<Self> {
        if width == 0 || height == 0 || frame_rate == 0 {
            return Err(ConfigError::Invalid(format!(
                "camera needs a nonzero size and rate, got {}x{} @ {}",
                width, height, frame_rate
            ))
            .into());
        }

        let stop = Arc::new(AtomicBool::new(false));
        let frames = Arc::new(AtomicU64::new(0));
        let interval = Duration::from_nanos(1_000_000_000 / frame_rate as u64);

        let handle = {
            let stop = Arc::clone(&stop);
            let frames = Arc::clone(&frames);
            thread::Builder::new()
                .name("replaycam-camera".into())
                .spawn(move || {
                    camera_loop(producer, width, height, interval, stop, frames);
                })
                .map_err(EngineError::Spawn)?
        };

        info!(width, height, frame_rate, "Synthetic camera started");
        Ok(Self {
            stop,
            frames,
            handle: Some(handle),
        })
    }

    /// Images handed to the producer so far.
    pub fn frames_submitted(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Stop the camera thread and wait for it.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
            info!(frames = self.frames_submitted(), "Synthetic camera stopped");
        }
    }

    /// Returns true once the camera thread has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }
}

impl Drop for SyntheticCamera {
    fn drop(&mut self) {
        self.stop();
    }
}

fn camera_loop(
    producer: ImageProducer,
    width: u32,
    height: u32,
    interval: Duration,
    stop: Arc<AtomicBool>,
    frames: Arc<AtomicU64>,
) {
    let start = Instant::now();
    let mut frame: u64 = 0;

    while !stop.load(Ordering::SeqCst) {
        let image = match CpuImage::new(width, height, test_pattern(frame, width, height)) {
            Ok(image) => image,
            Err(e) => {
                warn!("Failed to build camera image: {}", e);
                break;
            }
        };

        let timestamp_ns = start.elapsed().as_nanos() as u64;
        if !producer.submit(image, timestamp_ns, Transform::IDENTITY) {
            debug!("Camera texture detached");
            break;
        }
        frame += 1;
        frames.store(frame, Ordering::Relaxed);

        let next = interval * frame as u32;
        let elapsed = start.elapsed();
        if next > elapsed {
            thread::sleep(next - elapsed);
        }
    }
}
