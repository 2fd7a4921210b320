//! Circular encoder: encoder backend, ring buffer and save state machine.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use replaycam_ipc::{CaptureConfig, SaveStatus};
use tracing::{debug, info, instrument, trace, warn};

use crate::error::EncoderError;
use crate::executor::SaveExecutor;
use crate::ring::ChunkRing;
use crate::save::{Muxer, SaveJob};
use crate::{EncoderOutput, EncoderResult, VideoEncoder};

/// Upper bound on outputs taken per drain so a busy encoder cannot stall the
/// render path.
const MAX_OUTPUTS_PER_DRAIN: usize = 64;

/// Encoder state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderState {
    /// Buffering encoder output.
    Running,

    /// A save is in flight. Draining continues.
    Saving,

    /// Shut down; every operation fails with `EncoderClosed`.
    Shutdown,
}

/// Notifications from the circular encoder.
///
/// `file_save_complete` is called from the save executor's thread;
/// implementations post it back onto the dispatch queue.
pub trait EncoderCallback: Send + Sync {
    /// A save finished with `status` (0 on success).
    fn file_save_complete(&self, status: i32);

    /// Currently buffered duration, emitted every few frames.
    fn buffer_status(&self, duration_usec: u64);
}

/// Keeps the last few seconds of encoded video and writes them on request.
pub struct CircularEncoder {
    encoder: Box<dyn VideoEncoder>,
    ring: ChunkRing,
    state: EncoderState,
    callback: Arc<dyn EncoderCallback>,
    executor: Arc<dyn SaveExecutor>,
    muxer: Arc<dyn Muxer>,
    drain_timeout: Duration,
    status_interval: u64,
    frame_num: u64,
    end_of_stream: bool,
}

impl CircularEncoder {
    /// Wrap `encoder` with a ring sized from `config`.
    pub fn new(
        config: &CaptureConfig,
        encoder: Box<dyn VideoEncoder>,
        muxer: Arc<dyn Muxer>,
        executor: Arc<dyn SaveExecutor>,
        callback: Arc<dyn EncoderCallback>,
    ) -> Self {
        info!(
            encoder = encoder.name(),
            muxer = muxer.name(),
            executor = executor.name(),
            window_secs = config.buffer_window_secs,
            max_bytes = config.max_buffer_bytes(),
            "Circular encoder created"
        );

        Self {
            encoder,
            ring: ChunkRing::new(config.buffer_window(), config.max_buffer_bytes()),
            state: EncoderState::Running,
            callback,
            executor,
            muxer,
            drain_timeout: config.drain_timeout(),
            status_interval: config.buffer_status_interval_frames.max(1) as u64,
            frame_num: 0,
            end_of_stream: false,
        }
    }

    /// Current state.
    pub fn state(&self) -> EncoderState {
        self.state
    }

    /// Returns true while a save is in flight.
    pub fn is_saving(&self) -> bool {
        self.state == EncoderState::Saving
    }

    /// The live ring.
    pub fn ring(&self) -> &ChunkRing {
        &self.ring
    }

    /// Duration currently buffered.
    pub fn buffered_duration_usec(&self) -> u64 {
        self.ring.span_usec()
    }

    /// Frames announced through [`CircularEncoder::frame_available_soon`].
    pub fn frames_announced(&self) -> u64 {
        self.frame_num
    }

    /// Announce that a frame is about to be submitted to the encoder surface.
    ///
    /// Drains pending encoder output into the ring. Never waits longer than
    /// the configured drain timeout.
    pub fn frame_available_soon(&mut self) -> EncoderResult<()> {
        self.ensure_open()?;
        self.drain();

        self.frame_num += 1;
        if self.frame_num % self.status_interval == 0 {
            let duration_usec = self.ring.span_usec();
            trace!(duration_usec, "Buffer status");
            self.callback.buffer_status(duration_usec);
        }
        Ok(())
    }

    /// Drain encoder output without announcing a frame.
    pub fn poll(&mut self) -> EncoderResult<usize> {
        self.ensure_open()?;
        Ok(self.drain())
    }

    fn drain(&mut self) -> usize {
        let mut drained = 0;
        let mut timeout = self.drain_timeout;

        while drained < MAX_OUTPUTS_PER_DRAIN && !self.end_of_stream {
            let Some(output) = self.encoder.poll_output(timeout) else {
                break;
            };
            timeout = Duration::ZERO;
            drained += 1;

            match output {
                EncoderOutput::FormatChanged(format) => {
                    debug!(
                        width = format.width,
                        height = format.height,
                        config_len = format.codec_config.len(),
                        "Encoder output format changed"
                    );
                    self.ring.set_format(format);
                }
                EncoderOutput::Chunk(chunk) => {
                    self.ring.push(chunk);
                }
                EncoderOutput::EndOfStream => {
                    debug!("Encoder reached end of stream");
                    self.end_of_stream = true;
                }
            }
        }

        drained
    }

    /// Write the buffered video to `destination`.
    ///
    /// Fails synchronously only for state errors. Everything else, including
    /// an empty buffer, is reported through `file_save_complete`.
    #[instrument(name = "save_video", skip(self, destination))]
    pub fn save_video(&mut self, destination: impl Into<PathBuf>) -> EncoderResult<()> {
        match self.state {
            EncoderState::Shutdown => return Err(EncoderError::EncoderClosed),
            EncoderState::Saving => {
                warn!("Save rejected: already in progress");
                return Err(EncoderError::AlreadyInProgress);
            }
            EncoderState::Running => {}
        }

        let destination = destination.into();
        self.drain();
        let snapshot = self.ring.snapshot();
        self.state = EncoderState::Saving;

        info!(
            path = %destination.display(),
            chunks = snapshot.len(),
            duration_ms = snapshot.duration_usec() / 1000,
            "Saving buffered video"
        );

        if !snapshot.is_playable() {
            warn!(
                buffered = self.ring.len(),
                has_format = snapshot.format.is_some(),
                "Nothing decodable buffered"
            );
            self.callback
                .file_save_complete(SaveStatus::NothingBuffered.code());
            return Ok(());
        }

        let callback = Arc::clone(&self.callback);
        let job = SaveJob::new(
            snapshot,
            destination,
            Arc::clone(&self.muxer),
            Box::new(move |status| callback.file_save_complete(status.code())),
        );

        if let Err(job) = self.executor.execute(job) {
            job.abandon(SaveStatus::ExecutorUnavailable);
        }
        Ok(())
    }

    /// Leave the saving state after `file_save_complete` was delivered.
    ///
    /// Returns false if no save was in flight.
    pub fn finish_save(&mut self) -> EncoderResult<bool> {
        self.ensure_open()?;
        if self.state == EncoderState::Saving {
            self.state = EncoderState::Running;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Stop the encoder, free its resources and drop the buffered video.
    ///
    /// Must be the last call. A save already handed to the executor keeps
    /// its own copy of the chunks and finishes normally.
    #[instrument(name = "encoder_shutdown", skip(self))]
    pub fn shutdown(&mut self) -> EncoderResult<()> {
        self.ensure_open()?;

        self.encoder.signal_end_of_stream();
        self.drain();
        self.encoder.release();

        info!(
            chunks = self.ring.len(),
            evicted = self.ring.evicted(),
            frames = self.frame_num,
            "Circular encoder shut down"
        );
        self.ring.clear();
        self.state = EncoderState::Shutdown;
        Ok(())
    }

    fn ensure_open(&self) -> EncoderResult<()> {
        if self.state == EncoderState::Shutdown {
            Err(EncoderError::EncoderClosed)
        } else {
            Ok(())
        }
    }
}

impl Drop for CircularEncoder {
    fn drop(&mut self) {
        if self.state != EncoderState::Shutdown {
            let _ = self.shutdown();
        }
    }
}
