//! GPU resource lifecycle and startup tracking.

use tracing::{debug, info, instrument, warn};

use replaycam_gpu::{
    FrameListener, FrameSource, GpuContext, PlatformSurface, RenderSurface, SurfaceRole,
};
use replaycam_ipc::StartupPhase;

use crate::EngineResult;

/// Platform pieces consumed by startup.
pub struct StartupInputs {
    /// Display target; the pipeline can run without one.
    pub display: Option<Box<dyn PlatformSurface>>,

    /// Encoder input target.
    pub encoder_surface: Option<Box<dyn PlatformSurface>>,

    /// Listener registered on the frame source.
    pub listener: Option<FrameListener>,
}

/// GPU state owned by the dispatch thread.
pub struct GpuResources {
    context: GpuContext,
    source: Box<dyn FrameSource>,
    display: Option<RenderSurface>,
    encoder_surface: Option<RenderSurface>,
    listener_attached: bool,
    current_phase: Option<StartupPhase>,
}

impl GpuResources {
    /// Wrap `context` and `source`; nothing is bound yet.
    pub fn new(context: GpuContext, source: Box<dyn FrameSource>) -> Self {
        Self {
            context,
            source,
            display: None,
            encoder_surface: None,
            listener_attached: false,
            current_phase: None,
        }
    }

    /// Run every startup phase in order, reporting each to `on_phase`.
    ///
    /// On failure the phases already run are not rolled back; call
    /// [`GpuResources::rollback`].
    #[instrument(name = "init_resources", skip_all)]
    pub fn initialize(
        &mut self,
        inputs: &mut StartupInputs,
        mut on_phase: impl FnMut(StartupPhase),
    ) -> EngineResult<()> {
        let mut phase = StartupPhase::BindContext;

        loop {
            self.current_phase = Some(phase);
            on_phase(phase);
            self.init_phase(phase, inputs)?;

            match phase.next() {
                Some(next) => phase = next,
                None => break,
            }
        }

        Ok(())
    }

    fn init_phase(&mut self, phase: StartupPhase, inputs: &mut StartupInputs) -> EngineResult<()> {
        info!("Initializing phase: {:?}", phase);

        match phase {
            StartupPhase::BindContext => {
                self.context.ensure_alive()?;
            }
            StartupPhase::BindDisplaySurface => {
                if let Some(target) = inputs.display.take() {
                    let mut surface = RenderSurface::bind(&self.context, SurfaceRole::Display, target)?;
                    surface.make_current()?;
                    self.display = Some(surface);
                } else {
                    debug!("No display surface, running headless");
                }
            }
            StartupPhase::BindEncoderSurface => {
                let target = inputs.encoder_surface.take().ok_or_else(|| {
                    replaycam_gpu::GpuError::Backend("no encoder input surface".into())
                })?;
                let mut surface =
                    RenderSurface::bind(&self.context, SurfaceRole::EncoderInput, target)?;
                surface.make_current()?;
                self.encoder_surface = Some(surface);
            }
            StartupPhase::AttachSource => {
                self.source.set_frame_listener(inputs.listener.take());
                self.listener_attached = true;
            }
        }

        Ok(())
    }

    /// Undo startup from the current phase backwards.
    #[instrument(name = "rollback_resources", skip(self))]
    pub fn rollback(&mut self) {
        if let Some(mut phase) = self.current_phase.take() {
            loop {
                info!("Rolling back phase: {:?}", phase);
                self.rollback_phase(phase);

                match phase.previous() {
                    Some(prev) => phase = prev,
                    None => break,
                }
            }
        }
    }

    fn rollback_phase(&mut self, phase: StartupPhase) {
        match phase {
            StartupPhase::AttachSource => {
                if self.listener_attached {
                    self.source.set_frame_listener(None);
                    self.listener_attached = false;
                }
            }
            StartupPhase::BindEncoderSurface => {
                if let Some(mut surface) = self.encoder_surface.take() {
                    surface.release();
                }
            }
            StartupPhase::BindDisplaySurface => {
                if let Some(mut surface) = self.display.take() {
                    surface.release();
                }
            }
            StartupPhase::BindContext => {
                // Nothing to undo
            }
        }
    }

    /// Stop frame notifications.
    pub fn detach_source(&mut self) {
        self.rollback_phase(StartupPhase::AttachSource);
    }

    /// Release everything, including the source texture and the context.
    #[instrument(name = "shutdown_resources", skip(self))]
    pub fn shutdown(&mut self) {
        info!("Releasing GPU resources");
        self.rollback();
        self.source.release();
        self.context.release();
    }

    /// Replace the display surface. The previous one is released.
    #[instrument(name = "attach_display", skip_all)]
    pub fn attach_display(&mut self, target: Box<dyn PlatformSurface>) -> EngineResult<()> {
        self.detach_display();
        let surface = RenderSurface::bind(&self.context, SurfaceRole::Display, target)?;
        info!(width = surface.width(), height = surface.height(), "Display attached");
        self.display = Some(surface);
        Ok(())
    }

    /// Release the display surface, if any.
    pub fn detach_display(&mut self) -> bool {
        match self.display.take() {
            Some(mut surface) => {
                surface.release();
                info!("Display detached");
                true
            }
            None => false,
        }
    }

    pub fn context(&self) -> &GpuContext {
        &self.context
    }

    pub fn source_mut(&mut self) -> &mut dyn FrameSource {
        self.source.as_mut()
    }

    pub fn display_mut(&mut self) -> Option<&mut RenderSurface> {
        self.display.as_mut()
    }

    pub fn encoder_surface_mut(&mut self) -> Option<&mut RenderSurface> {
        self.encoder_surface.as_mut()
    }

    pub fn has_display(&self) -> bool {
        self.display.is_some()
    }
}

impl Drop for GpuResources {
    fn drop(&mut self) {
        if self.current_phase.is_some() {
            warn!("GPU resources dropped without shutdown");
            self.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use replaycam_gpu::{CpuSurface, ExternalTexture, GpuError, TextureStore};

    use super::*;

    /// Wraps a CPU surface and counts releases.
    struct Counted {
        inner: CpuSurface,
        releases: Arc<AtomicU32>,
    }

    impl PlatformSurface for Counted {
        fn size(&self) -> (u32, u32) {
            self.inner.size()
        }

        fn make_current(&mut self) -> replaycam_gpu::GpuResult<()> {
            self.inner.make_current()
        }

        fn draw_texture(
            &mut self,
            texture: replaycam_gpu::TextureId,
            transform: &replaycam_gpu::Transform,
            viewport: replaycam_gpu::Rect,
        ) -> replaycam_gpu::GpuResult<()> {
            self.inner.draw_texture(texture, transform, viewport)
        }

        fn clear_rect(
            &mut self,
            rect: replaycam_gpu::Rect,
            color: replaycam_gpu::Rgba,
        ) -> replaycam_gpu::GpuResult<()> {
            self.inner.clear_rect(rect, color)
        }

        fn set_presentation_time(&mut self, timestamp_ns: u64) {
            self.inner.set_presentation_time(timestamp_ns)
        }

        fn swap_buffers(&mut self) -> bool {
            self.inner.swap_buffers()
        }

        fn release(&mut self) {
            self.releases.fetch_add(1, Ordering::SeqCst);
            self.inner.release();
        }
    }

    fn counted(store: &TextureStore, releases: &Arc<AtomicU32>) -> Box<dyn PlatformSurface> {
        Box::new(Counted {
            inner: CpuSurface::new(8, 8, store.clone()),
            releases: Arc::clone(releases),
        })
    }

    fn resources(store: &TextureStore) -> GpuResources {
        let (source, _producer) = ExternalTexture::new(store);
        GpuResources::new(GpuContext::new("test"), Box::new(source))
    }

    #[test]
    fn test_initialize_runs_all_phases() {
        let store = TextureStore::new();
        let releases = Arc::new(AtomicU32::new(0));
        let mut res = resources(&store);
        let mut inputs = StartupInputs {
            display: Some(counted(&store, &releases)),
            encoder_surface: Some(counted(&store, &releases)),
            listener: Some(Arc::new(|| {})),
        };

        let mut phases = Vec::new();
        res.initialize(&mut inputs, |p| phases.push(p)).unwrap();
        assert_eq!(
            phases,
            vec![
                StartupPhase::BindContext,
                StartupPhase::BindDisplaySurface,
                StartupPhase::BindEncoderSurface,
                StartupPhase::AttachSource,
            ]
        );
        assert!(res.has_display());
        assert!(res.encoder_surface_mut().unwrap().is_current());

        res.shutdown();
        assert_eq!(releases.load(Ordering::SeqCst), 2);
        assert!(res.context().is_released());
    }

    #[test]
    fn test_failed_phase_rolls_back_earlier_phases() {
        let store = TextureStore::new();
        let releases = Arc::new(AtomicU32::new(0));
        let mut res = resources(&store);

        let mut broken = CpuSurface::new(8, 8, store.clone());
        broken.release();
        let mut inputs = StartupInputs {
            display: Some(counted(&store, &releases)),
            encoder_surface: Some(Box::new(broken)),
            listener: Some(Arc::new(|| {})),
        };

        let err = res.initialize(&mut inputs, |_| {}).unwrap_err();
        assert!(matches!(
            err,
            crate::EngineError::Gpu(GpuError::SurfaceReleased)
        ));

        res.rollback();
        assert!(!res.has_display());
        assert_eq!(releases.load(Ordering::SeqCst), 1);

        // A second rollback has nothing left to release.
        res.rollback();
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_released_context_fails_first_phase() {
        let store = TextureStore::new();
        let mut res = resources(&store);
        res.context().release();

        let mut inputs = StartupInputs {
            display: None,
            encoder_surface: Some(Box::new(CpuSurface::new(8, 8, store.clone()))),
            listener: None,
        };
        let err = res.initialize(&mut inputs, |_| {}).unwrap_err();
        assert!(matches!(err, crate::EngineError::Gpu(GpuError::Context(_))));
    }

    #[test]
    fn test_display_can_be_replaced() {
        let store = TextureStore::new();
        let releases = Arc::new(AtomicU32::new(0));
        let mut res = resources(&store);

        res.attach_display(counted(&store, &releases)).unwrap();
        res.attach_display(counted(&store, &releases)).unwrap();
        assert_eq!(releases.load(Ordering::SeqCst), 1);

        assert!(res.detach_display());
        assert!(!res.detach_display());
        assert_eq!(releases.load(Ordering::SeqCst), 2);
    }
}
