//! Pipeline handle.

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use crossbeam_channel::Sender;
use tracing::{debug, error, info, instrument};

use replaycam_encoder::{
    create_surface_encoder, BackgroundExecutor, EncoderKind, Muxer, SaveExecutor, VideoEncoder,
};
use replaycam_gpu::{
    ExternalTexture, FrameSource, GpuContext, ImageProducer, PlatformSurface, TextureStore,
};
use replaycam_ipc::{CaptureConfig, DispatchMessage, PipelineMetrics, PipelineState};
use replaycam_mux::Mp4Muxer;

use crate::dispatch::{DispatchLoop, LoopMessage, Shared};
use crate::host::PipelineHost;
use crate::{EngineError, EngineResult};

/// Platform pieces the pipeline takes ownership of.
pub struct PipelineParts {
    /// Context shared by both render surfaces.
    pub context: GpuContext,

    /// Camera frames.
    pub source: Box<dyn FrameSource>,

    /// On-screen preview, if any.
    pub display: Option<Box<dyn PlatformSurface>>,

    /// Encoder fed by `encoder_surface`.
    pub encoder: Box<dyn VideoEncoder>,

    /// Input surface of `encoder`.
    pub encoder_surface: Box<dyn PlatformSurface>,

    /// Container writer for saves.
    pub muxer: Arc<dyn Muxer>,

    /// Where saves run.
    pub executor: Arc<dyn SaveExecutor>,
}

impl PipelineParts {
    /// Software parts: a camera texture fed by the returned producer, an
    /// encoder of `kind`, MP4 output and a background save thread. No display.
    pub fn software(
        config: &CaptureConfig,
        kind: EncoderKind,
        textures: &TextureStore,
    ) -> EngineResult<(Self, ImageProducer)> {
        let (source, producer) = ExternalTexture::new(textures);
        let (encoder, encoder_surface) = create_surface_encoder(kind, config, textures.clone())?;
        let executor = BackgroundExecutor::spawn("replaycam-save")?;

        let parts = Self {
            context: GpuContext::new("replaycam"),
            source: Box::new(source),
            display: None,
            encoder,
            encoder_surface: Box::new(encoder_surface),
            muxer: Arc::new(Mp4Muxer::new(config.frame_rate)),
            executor: Arc::new(executor),
        };
        Ok((parts, producer))
    }

    /// Render previews into `display`.
    pub fn with_display(mut self, display: Box<dyn PlatformSurface>) -> Self {
        self.display = Some(display);
        self
    }
}

/// Handle to a running capture pipeline.
///
/// All GPU and encoder work happens on the dispatch thread; the handle only
/// posts messages and reads shared state.
pub struct Pipeline {
    tx: Sender<LoopMessage>,
    shared: Shared,
    thread: Option<JoinHandle<()>>,
}

impl Pipeline {
    /// Start the dispatch thread and wait until startup finished.
    ///
    /// The pipeline stops on its own once `host` is dropped.
    #[instrument(name = "pipeline_spawn", skip_all)]
    pub fn spawn(
        config: CaptureConfig,
        parts: PipelineParts,
        host: Weak<dyn PipelineHost>,
    ) -> EngineResult<Self> {
        config.validate()?;

        let (tx, rx) = crossbeam_channel::unbounded();
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        let shared = Shared::new();

        let thread = {
            let tx = tx.clone();
            let shared = shared.clone();
            thread::Builder::new()
                .name("replaycam-dispatch".into())
                .spawn(move || match DispatchLoop::start(config, parts, host, shared, tx, rx) {
                    Ok(dispatch) => {
                        let _ = ready_tx.send(Ok(()));
                        dispatch.run();
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                })
                .map_err(EngineError::Spawn)?
        };

        let started = ready_rx
            .recv()
            .unwrap_or(Err(EngineError::ChannelDisconnected));
        if let Err(e) = started {
            let _ = thread.join();
            return Err(e);
        }

        info!("Pipeline started");
        Ok(Self {
            tx,
            shared,
            thread: Some(thread),
        })
    }

    /// Capture the buffered video into `path`.
    ///
    /// Returns false without posting anything while a capture is pending or
    /// saving. Completion is reported through the host.
    pub fn click_capture(&self, path: impl Into<PathBuf>) -> EngineResult<bool> {
        self.ensure_running()?;

        if self
            .shared
            .capture_enabled
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Capture disabled, ignoring click");
            return Ok(false);
        }

        let path = path.into();
        info!(path = %path.display(), "Capture requested");
        self.send(DispatchMessage::Capture { path }.into())?;
        Ok(true)
    }

    /// Show previews on `display`, replacing the current one.
    pub fn attach_display(&self, display: Box<dyn PlatformSurface>) -> EngineResult<()> {
        self.ensure_running()?;
        self.send(LoopMessage::AttachDisplay(display))
    }

    /// Stop showing previews. Encoding continues.
    pub fn detach_display(&self) -> EngineResult<()> {
        self.ensure_running()?;
        self.send(LoopMessage::DetachDisplay)
    }

    /// Returns true if a capture click would be accepted.
    pub fn is_capture_enabled(&self) -> bool {
        self.shared.capture_enabled.load(Ordering::SeqCst)
    }

    /// Current pipeline state.
    pub fn state(&self) -> PipelineState {
        self.shared.state.read().clone()
    }

    /// Current pipeline counters.
    pub fn metrics(&self) -> PipelineMetrics {
        self.shared.metrics.snapshot()
    }

    /// Stop the dispatch thread and release everything it owns.
    #[instrument(name = "pipeline_shutdown", skip(self))]
    pub fn shutdown(&mut self) -> EngineResult<()> {
        let handle = self.thread.take().ok_or(EngineError::NotRunning)?;

        info!("Shutting down pipeline");
        if self.tx.send(DispatchMessage::Shutdown.into()).is_err() {
            debug!("Dispatch loop already stopped");
        }
        if handle.join().is_err() {
            error!("Dispatch thread panicked");
        }
        Ok(())
    }

    fn ensure_running(&self) -> EngineResult<()> {
        if self.thread.is_some() {
            Ok(())
        } else {
            Err(EngineError::NotRunning)
        }
    }

    fn send(&self, message: LoopMessage) -> EngineResult<()> {
        self.tx
            .send(message)
            .map_err(|_| EngineError::ChannelDisconnected)
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if self.thread.is_some() {
            let _ = self.shutdown();
        }
    }
}
