//! Camera-fed texture backed by a CPU image queue.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::frame::{Frame, FrameListener, FrameSource, TextureId};
use crate::geometry::Transform;
use crate::software::texture::{CpuImage, TextureStore};
use crate::GpuResult;

struct Pending {
    image: CpuImage,
    timestamp_ns: u64,
    transform: Transform,
}

#[derive(Default)]
struct Shared {
    pending: Option<Pending>,
    listener: Option<FrameListener>,
    submitted: u64,
    detached: bool,
}

/// Consumer side: latches the newest submitted image into a texture.
pub struct ExternalTexture {
    texture: TextureId,
    store: TextureStore,
    shared: Arc<Mutex<Shared>>,
    transform: Transform,
    sequence: u64,
    released: bool,
}

/// Producer side: hands images to an [`ExternalTexture`].
#[derive(Clone)]
pub struct ImageProducer {
    shared: Arc<Mutex<Shared>>,
}

impl ExternalTexture {
    /// Allocate a texture in `store` and return both ends.
    pub fn new(store: &TextureStore) -> (Self, ImageProducer) {
        let shared = Arc::new(Mutex::new(Shared::default()));
        let texture = store.create();
        debug!(?texture, "Created external texture");

        let consumer = Self {
            texture,
            store: store.clone(),
            shared: Arc::clone(&shared),
            transform: Transform::IDENTITY,
            sequence: 0,
            released: false,
        };
        (consumer, ImageProducer { shared })
    }
}

impl FrameSource for ExternalTexture {
    fn texture(&self) -> TextureId {
        self.texture
    }

    fn set_frame_listener(&mut self, listener: Option<FrameListener>) {
        self.shared.lock().listener = listener;
    }

    fn latch(&mut self) -> GpuResult<Option<Frame>> {
        let pending = self.shared.lock().pending.take();
        let Some(pending) = pending else {
            return Ok(None);
        };

        self.store.upload(self.texture, pending.image)?;
        self.transform = pending.transform;

        let frame = Frame {
            texture: self.texture,
            timestamp_ns: pending.timestamp_ns,
            sequence: self.sequence,
        };
        self.sequence += 1;
        trace!(sequence = frame.sequence, "Latched image");
        Ok(Some(frame))
    }

    fn transform(&self) -> Transform {
        self.transform
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let mut shared = self.shared.lock();
        shared.listener = None;
        shared.pending = None;
        shared.detached = true;
        drop(shared);

        self.store.delete(self.texture);
        debug!(texture = ?self.texture, "Released external texture");
    }
}

impl Drop for ExternalTexture {
    fn drop(&mut self) {
        self.release();
    }
}

impl ImageProducer {
    /// Queue `image`, replacing any image not yet latched, and notify the
    /// listener. Returns false once the consumer has been released.
    pub fn submit(&self, image: CpuImage, timestamp_ns: u64, transform: Transform) -> bool {
        let listener = {
            let mut shared = self.shared.lock();
            if shared.detached {
                return false;
            }
            shared.pending = Some(Pending {
                image,
                timestamp_ns,
                transform,
            });
            shared.submitted += 1;
            shared.listener.clone()
        };

        // Called outside the lock: the listener may re-enter the consumer.
        if let Some(listener) = listener {
            listener();
        }
        true
    }

    /// Number of images submitted so far.
    pub fn submitted(&self) -> u64 {
        self.shared.lock().submitted
    }

    /// Returns true once the consumer has been released.
    pub fn is_detached(&self) -> bool {
        self.shared.lock().detached
    }
}
