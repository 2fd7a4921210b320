//! Renderable surfaces.

use std::fmt;

use tracing::{debug, instrument, trace};

use crate::context::GpuContext;
use crate::error::GpuError;
use crate::frame::TextureId;
use crate::geometry::{Rect, Rgba, Transform};
use crate::GpuResult;

/// Identifier of a bound surface, unique per context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceId(pub u64);

/// What a surface is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceRole {
    /// On-screen preview.
    Display,

    /// Input of the video encoder.
    EncoderInput,
}

/// A platform drawable: a window surface or an encoder input surface.
///
/// Implementations provide the primitive operations; [`RenderSurface`]
/// enforces the context and lifecycle rules on top.
pub trait PlatformSurface: Send {
    /// Surface size in pixels.
    fn size(&self) -> (u32, u32);

    /// Bind this surface for drawing on the calling thread.
    fn make_current(&mut self) -> GpuResult<()>;

    /// Draw `texture` as a textured quad covering `viewport`.
    fn draw_texture(
        &mut self,
        texture: TextureId,
        transform: &Transform,
        viewport: Rect,
    ) -> GpuResult<()>;

    /// Clear `rect` (a scissored clear) to `color`.
    fn clear_rect(&mut self, rect: Rect, color: Rgba) -> GpuResult<()>;

    /// Presentation timestamp attached to the next swap.
    fn set_presentation_time(&mut self, timestamp_ns: u64);

    /// Present the back buffer. Returns false on a transient failure.
    fn swap_buffers(&mut self) -> bool;

    /// Free platform resources. Called at most once.
    fn release(&mut self);
}

/// A platform surface bound to a GPU context.
pub struct RenderSurface {
    id: SurfaceId,
    role: SurfaceRole,
    context: GpuContext,
    target: Option<Box<dyn PlatformSurface>>,
    width: u32,
    height: u32,
}

impl RenderSurface {
    /// Bind `target` to `context`. Fails if the context was released.
    #[instrument(name = "surface_bind", skip(context, target), fields(context = %context.label()))]
    pub fn bind(
        context: &GpuContext,
        role: SurfaceRole,
        target: Box<dyn PlatformSurface>,
    ) -> GpuResult<Self> {
        context.ensure_alive()?;

        let (width, height) = target.size();
        let id = context.allocate_surface_id();
        debug!(?id, width, height, "Bound surface");

        Ok(Self {
            id,
            role,
            context: context.clone(),
            target: Some(target),
            width,
            height,
        })
    }

    /// Surface identifier.
    pub fn id(&self) -> SurfaceId {
        self.id
    }

    /// Surface role.
    pub fn role(&self) -> SurfaceRole {
        self.role
    }

    /// Cached width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Cached height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Returns true once the surface has been released.
    pub fn is_released(&self) -> bool {
        self.target.is_none()
    }

    /// Returns true if this surface is the context's current surface.
    pub fn is_current(&self) -> bool {
        self.target.is_some() && self.context.current() == Some(self.id)
    }

    /// Make this surface current, replacing whatever was current before.
    pub fn make_current(&mut self) -> GpuResult<()> {
        self.context.ensure_alive()?;
        let target = self.target.as_mut().ok_or(GpuError::SurfaceReleased)?;
        target.make_current()?;
        self.context.set_current(self.id);
        trace!(id = ?self.id, "Surface made current");
        Ok(())
    }

    /// Draw `texture` over the whole surface.
    pub fn draw_frame(&mut self, texture: TextureId, transform: &Transform) -> GpuResult<()> {
        let viewport = Rect::new(0, 0, self.width, self.height);
        self.draw_frame_in(viewport, texture, transform)
    }

    /// Draw `texture` into `viewport`.
    pub fn draw_frame_in(
        &mut self,
        viewport: Rect,
        texture: TextureId,
        transform: &Transform,
    ) -> GpuResult<()> {
        self.current_target()?
            .draw_texture(texture, transform, viewport)
    }

    /// Scissored clear of `rect` to `color`.
    pub fn clear_rect(&mut self, rect: Rect, color: Rgba) -> GpuResult<()> {
        self.current_target()?.clear_rect(rect, color)
    }

    /// Attach a presentation timestamp to the next swap.
    pub fn set_presentation_time(&mut self, timestamp_ns: u64) -> GpuResult<()> {
        self.context.ensure_alive()?;
        let target = self.target.as_mut().ok_or(GpuError::SurfaceReleased)?;
        target.set_presentation_time(timestamp_ns);
        Ok(())
    }

    /// Present the frame. A `false` return is transient: log and continue.
    pub fn swap_buffers(&mut self) -> bool {
        if self.context.is_released() {
            return false;
        }
        match self.target.as_mut() {
            Some(target) => target.swap_buffers(),
            None => false,
        }
    }

    /// Release the platform surface. Calling this more than once is a no-op.
    pub fn release(&mut self) {
        if let Some(mut target) = self.target.take() {
            target.release();
            self.context.clear_current(self.id);
            debug!(id = ?self.id, role = ?self.role, "Released surface");
        }
    }

    fn current_target(&mut self) -> GpuResult<&mut Box<dyn PlatformSurface>> {
        self.context.ensure_alive()?;
        if self.target.is_none() {
            return Err(GpuError::SurfaceReleased);
        }
        if !self.is_current() {
            return Err(GpuError::NotCurrent);
        }
        self.target.as_mut().ok_or(GpuError::SurfaceReleased)
    }
}

impl fmt::Debug for RenderSurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderSurface")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("released", &self.is_released())
            .finish()
    }
}

impl Drop for RenderSurface {
    fn drop(&mut self) {
        self.release();
    }
}
