//! GPU context tracking.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::GpuError;
use crate::surface::SurfaceId;
use crate::GpuResult;

struct ContextInner {
    label: String,
    released: AtomicBool,
    current: Mutex<Option<SurfaceId>>,
    next_surface: AtomicU64,
}

/// Handle to the GPU context owned by the dispatch thread.
///
/// Tracks which surface is current; at most one is current at a time. Cloning
/// the handle shares the same context.
#[derive(Clone)]
pub struct GpuContext {
    inner: Arc<ContextInner>,
}

impl GpuContext {
    /// Create a new context.
    pub fn new(label: impl Into<String>) -> Self {
        let label = label.into();
        debug!(%label, "Created GPU context");
        Self {
            inner: Arc::new(ContextInner {
                label,
                released: AtomicBool::new(false),
                current: Mutex::new(None),
                next_surface: AtomicU64::new(1),
            }),
        }
    }

    /// Context label for diagnostics.
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Returns true once [`GpuContext::release`] has been called.
    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::SeqCst)
    }

    /// Fail with a context error if the context was released.
    pub fn ensure_alive(&self) -> GpuResult<()> {
        if self.is_released() {
            return Err(GpuError::Context(format!(
                "context '{}' has been released",
                self.inner.label
            )));
        }
        Ok(())
    }

    /// The surface currently bound, if any.
    pub fn current(&self) -> Option<SurfaceId> {
        *self.inner.current.lock()
    }

    /// Release the context. Calling this more than once is a no-op.
    pub fn release(&self) {
        if self.inner.released.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.inner.current.lock() = None;
        info!(label = %self.inner.label, "Released GPU context");
    }

    pub(crate) fn allocate_surface_id(&self) -> SurfaceId {
        SurfaceId(self.inner.next_surface.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn set_current(&self, id: SurfaceId) {
        *self.inner.current.lock() = Some(id);
    }

    pub(crate) fn clear_current(&self, id: SurfaceId) {
        let mut current = self.inner.current.lock();
        if *current == Some(id) {
            *current = None;
        }
    }
}

impl fmt::Debug for GpuContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpuContext")
            .field("label", &self.inner.label)
            .field("released", &self.is_released())
            .field("current", &self.current())
            .finish()
    }
}
