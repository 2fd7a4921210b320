//! Error types for the GPU module.

use thiserror::Error;

/// Errors that can occur during GPU operations.
#[derive(Debug, Error)]
pub enum GpuError {
    /// The GPU context is invalid (released or lost).
    #[error("GPU context error: {0}")]
    Context(String),

    /// A draw was issued on a surface that is not current.
    #[error("Surface is not current")]
    NotCurrent,

    /// The surface has already been released.
    #[error("Surface has been released")]
    SurfaceReleased,

    /// The texture handle does not name a live texture.
    #[error("Invalid texture handle: {0}")]
    InvalidTexture(u32),

    /// Platform backend failure.
    #[error("Backend error: {0}")]
    Backend(String),
}

impl GpuError {
    /// Returns true for errors caused by an invalid or non-current context or
    /// surface. These are fatal to the attempted operation only; the surface
    /// can be recreated.
    pub fn is_context_error(&self) -> bool {
        matches!(
            self,
            Self::Context(_) | Self::NotCurrent | Self::SurfaceReleased
        )
    }
}
