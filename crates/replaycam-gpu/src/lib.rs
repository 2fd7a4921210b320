//! Renderable surfaces and the frame renderer.
//!
//! A [`RenderSurface`] binds a [`GpuContext`] to a platform drawable
//! ([`PlatformSurface`]): the display, or the encoder's input. The
//! [`FrameRenderer`] draws a camera texture into the current surface and adds
//! the diagnostic overlay. The `software` backend implements the platform side
//! on the CPU so the pipeline can run headless.

mod context;
mod error;
mod frame;
mod geometry;
mod renderer;
mod software;
mod surface;

pub use context::GpuContext;
pub use error::GpuError;
pub use frame::{Frame, FrameListener, FrameSource, TextureId};
pub use geometry::{Rect, Rgba, Transform};
pub use renderer::{overlay_for, FrameRenderer, OverlayRect, OVERLAY_COLORS};
pub use software::external::{ExternalTexture, ImageProducer};
pub use software::surface::{CpuSurface, PresentedFrame};
pub use software::texture::{CpuImage, TextureStore};
pub use surface::{PlatformSurface, RenderSurface, SurfaceId, SurfaceRole};

/// Result type for GPU operations.
pub type GpuResult<T> = Result<T, GpuError>;
