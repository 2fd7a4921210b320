//! The dispatch loop: one thread owning every GPU and encoder call.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::RwLock;
use tracing::{debug, error, info, instrument, trace, warn};

use replaycam_encoder::{CircularEncoder, EncoderCallback};
use replaycam_gpu::{Frame, FrameListener, FrameRenderer, PlatformSurface, Transform};
use replaycam_ipc::{CaptureConfig, DispatchMessage, PipelineState, SaveStatus};

use crate::coordinator::{CaptureOutcome, SaveCoordinator};
use crate::host::PipelineHost;
use crate::metrics::MetricsCollector;
use crate::orchestrator::PipelineParts;
use crate::state::{GpuResources, StartupInputs};
use crate::EngineResult;

const METRICS_INTERVAL: Duration = Duration::from_secs(1);
const STATS_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// Everything that travels on the dispatch queue.
pub(crate) enum LoopMessage {
    Dispatch(DispatchMessage),
    AttachDisplay(Box<dyn PlatformSurface>),
    DetachDisplay,
}

impl LoopMessage {
    fn name(&self) -> &'static str {
        match self {
            Self::Dispatch(message) => message.name(),
            Self::AttachDisplay(_) => "AttachDisplay",
            Self::DetachDisplay => "DetachDisplay",
        }
    }
}

impl From<DispatchMessage> for LoopMessage {
    fn from(message: DispatchMessage) -> Self {
        Self::Dispatch(message)
    }
}

/// State shared between the dispatch thread and the pipeline handle.
#[derive(Clone)]
pub(crate) struct Shared {
    pub state: Arc<RwLock<PipelineState>>,
    pub metrics: Arc<MetricsCollector>,
    pub frame_pending: Arc<AtomicBool>,
    pub capture_enabled: Arc<AtomicBool>,
}

impl Shared {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(PipelineState::Idle)),
            metrics: Arc::new(MetricsCollector::new()),
            frame_pending: Arc::new(AtomicBool::new(false)),
            capture_enabled: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// Posts encoder callbacks back onto the dispatch queue.
struct DispatchPoster {
    tx: Sender<LoopMessage>,
}

impl EncoderCallback for DispatchPoster {
    fn file_save_complete(&self, status: i32) {
        if let Err(e) = self
            .tx
            .send(DispatchMessage::FileSaveComplete { status }.into())
        {
            warn!("Failed to post save completion: {}", e);
        }
    }

    fn buffer_status(&self, duration_usec: u64) {
        if let Err(e) = self
            .tx
            .send(DispatchMessage::BufferStatus { duration_usec }.into())
        {
            warn!("Failed to post buffer status: {}", e);
        }
    }
}

/// Build the camera listener. At most one `FrameAvailable` is queued at a
/// time; extra notifications are counted and dropped.
pub(crate) fn frame_listener(
    tx: Sender<LoopMessage>,
    pending: Arc<AtomicBool>,
    metrics: Arc<MetricsCollector>,
) -> FrameListener {
    Arc::new(move || {
        metrics.record_frame_available();
        if pending.swap(true, Ordering::AcqRel) {
            metrics.record_coalesced();
            return;
        }
        if tx.send(DispatchMessage::FrameAvailable.into()).is_err() {
            pending.store(false, Ordering::Release);
        }
    })
}

fn transition(
    state: &RwLock<PipelineState>,
    host: &Weak<dyn PipelineHost>,
    new_state: PipelineState,
) {
    let previous = {
        let mut state = state.write();
        std::mem::replace(&mut *state, new_state.clone())
    };

    debug!(
        previous = %previous.name(),
        current = %new_state.name(),
        "State transition"
    );

    if let Some(host) = host.upgrade() {
        host.state_changed(&previous, &new_state);
    }
}

/// Runs on the dispatch thread and owns the GPU resources, the encoder and
/// the save coordinator.
pub(crate) struct DispatchLoop {
    config: CaptureConfig,
    rx: Receiver<LoopMessage>,
    tx: Sender<LoopMessage>,
    resources: GpuResources,
    renderer: FrameRenderer,
    encoder: CircularEncoder,
    coordinator: SaveCoordinator,
    host: Weak<dyn PipelineHost>,
    shared: Shared,
    frame_counter: u64,
    blink_visible: bool,
    last_blink: Instant,
    last_metrics: Instant,
    last_log: Instant,
}

impl DispatchLoop {
    /// Bind GPU resources and build the encoder. Everything acquired is
    /// released again on failure.
    #[instrument(name = "dispatch_start", skip_all)]
    pub fn start(
        config: CaptureConfig,
        parts: PipelineParts,
        host: Weak<dyn PipelineHost>,
        shared: Shared,
        tx: Sender<LoopMessage>,
        rx: Receiver<LoopMessage>,
    ) -> EngineResult<Self> {
        info!(
            width = config.width,
            height = config.height,
            frame_rate = config.frame_rate,
            "Starting pipeline"
        );

        let listener = frame_listener(
            tx.clone(),
            Arc::clone(&shared.frame_pending),
            Arc::clone(&shared.metrics),
        );

        let mut resources = GpuResources::new(parts.context, parts.source);
        let mut inputs = StartupInputs {
            display: parts.display,
            encoder_surface: Some(parts.encoder_surface),
            listener: Some(listener),
        };

        let init = resources.initialize(&mut inputs, |phase| {
            transition(&shared.state, &host, PipelineState::Starting { phase })
        });
        if let Err(e) = init {
            error!("Pipeline start failed: {}", e);
            resources.shutdown();
            transition(
                &shared.state,
                &host,
                PipelineState::Error {
                    message: e.to_string(),
                },
            );
            if let Some(host) = host.upgrade() {
                host.error(false, &e.to_string());
            }
            return Err(e);
        }

        let encoder = CircularEncoder::new(
            &config,
            parts.encoder,
            parts.muxer,
            parts.executor,
            Arc::new(DispatchPoster { tx: tx.clone() }),
        );
        let coordinator = SaveCoordinator::new(Arc::clone(&shared.capture_enabled));

        shared.metrics.start();
        transition(&shared.state, &host, PipelineState::Running);

        let now = Instant::now();
        Ok(Self {
            renderer: FrameRenderer::new(config.show_overlay),
            config,
            rx,
            tx,
            resources,
            encoder,
            coordinator,
            host,
            shared,
            frame_counter: 0,
            blink_visible: false,
            last_blink: now,
            last_metrics: now,
            last_log: now,
        })
    }

    /// Process messages until shutdown or until the host goes away.
    #[instrument(name = "dispatch_run", skip(self))]
    pub fn run(mut self) {
        info!("Dispatch loop running");

        loop {
            match self.rx.recv_timeout(self.config.poll_interval()) {
                Ok(message) => {
                    let Some(host) = self.host.upgrade() else {
                        info!(message = message.name(), "Host dropped, stopping");
                        break;
                    };
                    if !self.handle_message(message, host.as_ref()) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    if self.host.strong_count() == 0 {
                        info!("Host dropped, stopping");
                        break;
                    }
                    if let Err(e) = self.encoder.poll() {
                        warn!("Encoder poll failed: {}", e);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    info!("Dispatch channel disconnected, stopping");
                    break;
                }
            }

            self.tick_timers();
        }

        self.teardown();
    }

    /// Handle one message. Returns false if the loop should stop.
    fn handle_message(&mut self, message: LoopMessage, host: &dyn PipelineHost) -> bool {
        trace!(message = message.name(), "Handling message");

        match message {
            LoopMessage::Dispatch(DispatchMessage::FrameAvailable) => self.on_frame_available(),
            LoopMessage::Dispatch(DispatchMessage::BlinkTick) => self.on_blink_tick(host),
            LoopMessage::Dispatch(DispatchMessage::FileSaveComplete { status }) => {
                self.on_save_complete(status, host)
            }
            LoopMessage::Dispatch(DispatchMessage::BufferStatus { duration_usec }) => {
                self.shared.metrics.set_buffered(duration_usec);
                host.buffer_status(duration_usec);
            }
            LoopMessage::Dispatch(DispatchMessage::Capture { path }) => {
                self.on_capture(path, host)
            }
            LoopMessage::Dispatch(DispatchMessage::Shutdown) => {
                info!("Shutdown requested");
                return false;
            }
            LoopMessage::AttachDisplay(target) => {
                if let Err(e) = self.resources.attach_display(target) {
                    warn!("Failed to attach display: {}", e);
                    host.error(true, &e.to_string());
                }
            }
            LoopMessage::DetachDisplay => {
                self.resources.detach_display();
            }
        }

        true
    }

    fn on_frame_available(&mut self) {
        self.shared.frame_pending.store(false, Ordering::Release);

        let frame = match self.resources.source_mut().latch() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                trace!("No new camera image");
                return;
            }
            Err(e) => {
                warn!("Failed to latch camera image: {}", e);
                self.shared.metrics.record_draw_failure();
                return;
            }
        };
        let transform = self.resources.source_mut().transform();
        let counter = self.frame_counter;

        if counter < 5 || counter % 100 == 0 {
            debug!(
                "Frame latched: #{}, sequence={}, timestamp_ns={}",
                counter, frame.sequence, frame.timestamp_ns
            );
        }

        self.render_display(&frame, &transform, counter);

        if self.coordinator.is_in_progress() || self.encoder.is_saving() {
            self.shared.metrics.record_paused();
        } else {
            self.submit_to_encoder(&frame, &transform, counter);
        }

        self.frame_counter += 1;
    }

    fn render_display(&mut self, frame: &Frame, transform: &Transform, counter: u64) {
        let Some(display) = self.resources.display_mut() else {
            return;
        };
        let (width, height) = (display.width(), display.height());

        if let Err(e) = self
            .renderer
            .draw(display, frame.texture, transform, counter, width, height)
        {
            warn!("Display draw failed: {}", e);
            self.shared.metrics.record_draw_failure();
            return;
        }

        if display.swap_buffers() {
            self.shared.metrics.record_rendered();
        } else {
            warn!("Display swap failed, frame dropped");
            self.shared.metrics.record_swap_failure();
        }
    }

    fn submit_to_encoder(&mut self, frame: &Frame, transform: &Transform, counter: u64) {
        let Some(surface) = self.resources.encoder_surface_mut() else {
            return;
        };

        if let Err(e) = self.renderer.draw(
            surface,
            frame.texture,
            transform,
            counter,
            self.config.width,
            self.config.height,
        ) {
            warn!("Encoder surface draw failed: {}", e);
            self.shared.metrics.record_draw_failure();
            return;
        }

        if let Err(e) = self.encoder.frame_available_soon() {
            warn!("Encoder rejected frame: {}", e);
            return;
        }

        if let Err(e) = surface.set_presentation_time(frame.timestamp_ns) {
            warn!("Failed to set presentation time: {}", e);
            self.shared.metrics.record_swap_failure();
            return;
        }

        if surface.swap_buffers() {
            self.shared.metrics.record_submitted();
        } else {
            warn!("Encoder surface swap failed, frame dropped");
            self.shared.metrics.record_swap_failure();
        }
    }

    fn on_blink_tick(&mut self, host: &dyn PipelineHost) {
        if !self.coordinator.is_in_progress() {
            return;
        }
        self.blink_visible = !self.blink_visible;
        host.blink(self.blink_visible);
    }

    fn on_capture(&mut self, path: PathBuf, host: &dyn PipelineHost) {
        match self
            .coordinator
            .request_capture(path.clone(), &mut self.encoder)
        {
            CaptureOutcome::Started => {
                self.last_blink = Instant::now();
                self.transition_to(PipelineState::Saving { path });
            }
            CaptureOutcome::Rejected(reason) => host.capture_rejected(&reason),
        }
    }

    fn on_save_complete(&mut self, status: i32, host: &dyn PipelineHost) {
        if let Err(e) = self.encoder.finish_save() {
            warn!("Save completed on a closed encoder: {}", e);
        }
        let path = self.coordinator.complete(status);
        self.shared.metrics.record_save(status);

        match SaveStatus::from_code(status) {
            Some(SaveStatus::Success) => info!(status, "Save complete"),
            Some(known) => warn!(status, "Save failed: {}", known.message()),
            None => warn!(status, "Save failed with unknown status"),
        }

        host.file_save_complete(status, path.as_deref());

        if self.blink_visible {
            self.blink_visible = false;
            host.blink(false);
        }

        if self.shared.state.read().is_saving() {
            self.transition_to(PipelineState::Running);
        }
    }

    fn tick_timers(&mut self) {
        let now = Instant::now();

        if self.coordinator.is_in_progress()
            && now.duration_since(self.last_blink) >= self.config.blink_interval()
        {
            self.last_blink = now;
            if let Err(e) = self.tx.send(DispatchMessage::BlinkTick.into()) {
                warn!("Failed to post blink tick: {}", e);
            }
        }

        if now.duration_since(self.last_metrics) >= METRICS_INTERVAL {
            self.last_metrics = now;
            if let Some(host) = self.host.upgrade() {
                host.metrics(&self.shared.metrics.snapshot());
            }
            self.shared.metrics.mark_reported();
        }

        if now.duration_since(self.last_log) >= STATS_LOG_INTERVAL {
            self.last_log = now;
            let metrics = self.shared.metrics.snapshot();
            info!(
                "Dispatch stats: frames={}, rendered={}, submitted={}, paused={}, coalesced={}, buffered_ms={}",
                self.frame_counter,
                metrics.frames_rendered,
                metrics.frames_submitted,
                metrics.frames_paused,
                metrics.frames_coalesced,
                self.encoder.buffered_duration_usec() / 1000
            );
        }
    }

    fn transition_to(&self, new_state: PipelineState) {
        transition(&self.shared.state, &self.host, new_state);
    }

    fn teardown(&mut self) {
        self.transition_to(PipelineState::ShuttingDown);
        self.shared.capture_enabled.store(false, Ordering::SeqCst);

        self.resources.detach_source();
        if let Err(e) = self.encoder.shutdown() {
            debug!("Encoder already shut down: {}", e);
        }
        self.resources.shutdown();
        self.shared.metrics.stop();

        info!(
            frames = self.frame_counter,
            saves = self.coordinator.accepted(),
            "Dispatch loop stopped"
        );
        self.transition_to(PipelineState::Stopped);
    }
}
