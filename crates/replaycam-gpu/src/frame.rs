//! Camera frame types and the frame source interface.

use std::sync::Arc;

use crate::geometry::Transform;
use crate::GpuResult;

/// Opaque handle to a GPU texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u32);

/// A latched camera frame.
///
/// Only valid for one dispatch cycle: the texture content is replaced when the
/// next frame is latched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    /// Texture holding the image.
    pub texture: TextureId,

    /// Monotonic presentation timestamp in nanoseconds.
    pub timestamp_ns: u64,

    /// Monotonically increasing sequence number.
    pub sequence: u64,
}

/// Callback fired on an arbitrary thread when a new image is ready.
pub type FrameListener = Arc<dyn Fn() + Send + Sync>;

/// A camera-fed texture.
///
/// The listener fires on the producer's thread; `latch` and `transform` are
/// called from the thread that owns the GPU state.
pub trait FrameSource: Send {
    /// Texture the source latches images into.
    fn texture(&self) -> TextureId;

    /// Register (or clear) the new-frame notification.
    fn set_frame_listener(&mut self, listener: Option<FrameListener>);

    /// Latch the newest image into the texture. Returns `None` if nothing new
    /// arrived since the last latch.
    fn latch(&mut self) -> GpuResult<Option<Frame>>;

    /// Texture coordinate transform of the latched image.
    fn transform(&self) -> Transform;

    /// Detach from the producer and free the texture.
    fn release(&mut self);
}
