//! CPU render target.

use bytes::Bytes;
use crossbeam_channel::{Sender, TrySendError};
use tracing::{debug, trace};

use crate::error::GpuError;
use crate::frame::TextureId;
use crate::geometry::{Rect, Rgba, Transform};
use crate::software::texture::TextureStore;
use crate::surface::PlatformSurface;
use crate::GpuResult;

/// A frame presented by [`CpuSurface::swap_buffers`].
#[derive(Debug, Clone)]
pub struct PresentedFrame {
    /// RGBA pixels, rows bottom-up.
    pub pixels: Bytes,

    /// Width in pixels.
    pub width: u32,

    /// Height in pixels.
    pub height: u32,

    /// Presentation timestamp set before the swap, if any.
    pub timestamp_ns: Option<u64>,

    /// Monotonically increasing swap counter.
    pub sequence: u64,
}

impl PresentedFrame {
    /// Pixel at `(x, y)` with `y = 0` the bottom row.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let offset = (y as usize * self.width as usize + x as usize) * 4;
        [
            self.pixels[offset],
            self.pixels[offset + 1],
            self.pixels[offset + 2],
            self.pixels[offset + 3],
        ]
    }
}

/// Software render target.
///
/// Presented frames are forwarded to an optional sink, which is how the
/// encoder input surface hands frames to a software encoder.
pub struct CpuSurface {
    width: u32,
    height: u32,
    back: Vec<u8>,
    textures: TextureStore,
    sink: Option<Sender<PresentedFrame>>,
    pending_timestamp: Option<u64>,
    sequence: u64,
    released: bool,
}

impl CpuSurface {
    /// Create a `width` x `height` target sampling from `textures`.
    pub fn new(width: u32, height: u32, textures: TextureStore) -> Self {
        Self {
            width,
            height,
            back: vec![0; width as usize * height as usize * 4],
            textures,
            sink: None,
            pending_timestamp: None,
            sequence: 0,
            released: false,
        }
    }

    /// Forward presented frames to `sink`.
    pub fn with_sink(mut self, sink: Sender<PresentedFrame>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Back-buffer pixel at `(x, y)`.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let offset = self.offset(x, y);
        [
            self.back[offset],
            self.back[offset + 1],
            self.back[offset + 2],
            self.back[offset + 3],
        ]
    }

    /// Number of successful swaps.
    pub fn frames_presented(&self) -> u64 {
        self.sequence
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * 4
    }

    fn fill(&mut self, rect: Rect, rgba: [u8; 4]) {
        for y in rect.y..rect.y + rect.height {
            let row = self.offset(rect.x, y);
            for px in self.back[row..row + rect.width as usize * 4].chunks_exact_mut(4) {
                px.copy_from_slice(&rgba);
            }
        }
    }
}

impl PlatformSurface for CpuSurface {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn make_current(&mut self) -> GpuResult<()> {
        if self.released {
            return Err(GpuError::SurfaceReleased);
        }
        Ok(())
    }

    fn draw_texture(
        &mut self,
        texture: TextureId,
        transform: &Transform,
        viewport: Rect,
    ) -> GpuResult<()> {
        let image = self.textures.get(texture)?;
        let Some(viewport) = viewport.clip(self.width, self.height) else {
            return Ok(());
        };

        let Some(image) = image else {
            // Nothing latched yet: draw black.
            self.fill(viewport, Rgba::BLACK.to_bytes());
            return Ok(());
        };

        let (iw, ih) = (image.width(), image.height());
        if iw == 0 || ih == 0 {
            self.fill(viewport, Rgba::BLACK.to_bytes());
            return Ok(());
        }

        let vw = viewport.width as f32;
        let vh = viewport.height as f32;
        for y in 0..viewport.height {
            let v = (y as f32 + 0.5) / vh;
            for x in 0..viewport.width {
                let u = (x as f32 + 0.5) / vw;
                let (s, t) = transform.apply(u, v);
                let tx = ((s * iw as f32).floor().max(0.0) as u32).min(iw - 1);
                let ty = ((t * ih as f32).floor().max(0.0) as u32).min(ih - 1);

                let offset = self.offset(viewport.x + x, viewport.y + y);
                self.back[offset..offset + 4].copy_from_slice(&image.pixel(tx, ty));
            }
        }

        Ok(())
    }

    fn clear_rect(&mut self, rect: Rect, color: Rgba) -> GpuResult<()> {
        if let Some(rect) = rect.clip(self.width, self.height) {
            self.fill(rect, color.to_bytes());
        }
        Ok(())
    }

    fn set_presentation_time(&mut self, timestamp_ns: u64) {
        self.pending_timestamp = Some(timestamp_ns);
    }

    fn swap_buffers(&mut self) -> bool {
        if self.released {
            return false;
        }

        let frame = PresentedFrame {
            pixels: Bytes::copy_from_slice(&self.back),
            width: self.width,
            height: self.height,
            timestamp_ns: self.pending_timestamp.take(),
            sequence: self.sequence,
        };

        if let Some(ref sink) = self.sink {
            match sink.try_send(frame) {
                Ok(()) => {}
                Err(TrySendError::Full(frame)) => {
                    // The consumer is behind; the frame is lost but the
                    // surface itself is healthy.
                    debug!(sequence = frame.sequence, "Surface sink full, dropping frame");
                }
                Err(TrySendError::Disconnected(_)) => {
                    debug!("Surface sink disconnected");
                    return false;
                }
            }
        }

        trace!(sequence = self.sequence, "Presented frame");
        self.sequence += 1;
        true
    }

    fn release(&mut self) {
        self.released = true;
        self.sink = None;
        self.back = Vec::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::software::texture::CpuImage;

    fn checker_store() -> (TextureStore, TextureId) {
        // 2x2: bottom row red, green; top row blue, white.
        let pixels = vec![
            255, 0, 0, 255, 0, 255, 0, 255, //
            0, 0, 255, 255, 255, 255, 255, 255,
        ];
        let store = TextureStore::new();
        let id = store.create();
        store
            .upload(id, CpuImage::new(2, 2, Bytes::from(pixels)).unwrap())
            .unwrap();
        (store, id)
    }

    #[test]
    fn test_draw_samples_with_transform() {
        let (store, id) = checker_store();
        let mut surface = CpuSurface::new(4, 4, store);

        surface
            .draw_texture(id, &Transform::IDENTITY, Rect::new(0, 0, 4, 4))
            .unwrap();
        assert_eq!(surface.pixel(0, 0), [255, 0, 0, 255]);
        assert_eq!(surface.pixel(3, 0), [0, 255, 0, 255]);
        assert_eq!(surface.pixel(0, 3), [0, 0, 255, 255]);

        surface
            .draw_texture(id, &Transform::VERTICAL_FLIP, Rect::new(0, 0, 4, 4))
            .unwrap();
        assert_eq!(surface.pixel(0, 0), [0, 0, 255, 255]);
        assert_eq!(surface.pixel(0, 3), [255, 0, 0, 255]);
    }

    #[test]
    fn test_draw_unlatched_texture_is_black() {
        let store = TextureStore::new();
        let id = store.create();
        let mut surface = CpuSurface::new(2, 2, store);
        surface.clear_rect(Rect::new(0, 0, 2, 2), Rgba::RED).unwrap();

        surface
            .draw_texture(id, &Transform::IDENTITY, Rect::new(0, 0, 2, 2))
            .unwrap();
        assert_eq!(surface.pixel(1, 1), [0, 0, 0, 255]);
    }

    #[test]
    fn test_draw_unknown_texture_fails() {
        let mut surface = CpuSurface::new(2, 2, TextureStore::new());
        let err = surface
            .draw_texture(TextureId(99), &Transform::IDENTITY, Rect::new(0, 0, 2, 2))
            .unwrap_err();
        assert!(matches!(err, GpuError::InvalidTexture(99)));
    }

    #[test]
    fn test_swap_forwards_timestamp_to_sink() {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let mut surface = CpuSurface::new(2, 2, TextureStore::new()).with_sink(tx);

        surface.set_presentation_time(42);
        assert!(surface.swap_buffers());
        // Sink full: frame dropped, swap still succeeds.
        assert!(surface.swap_buffers());

        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.timestamp_ns, Some(42));
        assert_eq!(frame.sequence, 0);
        assert!(rx.try_recv().is_err());
        assert_eq!(surface.frames_presented(), 2);
    }

    #[test]
    fn test_swap_fails_when_sink_disconnected() {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let mut surface = CpuSurface::new(2, 2, TextureStore::new()).with_sink(tx);
        drop(rx);
        assert!(!surface.swap_buffers());
    }

    #[test]
    fn test_released_surface() {
        let mut surface = CpuSurface::new(2, 2, TextureStore::new());
        surface.release();
        assert!(matches!(
            surface.make_current(),
            Err(GpuError::SurfaceReleased)
        ));
        assert!(!surface.swap_buffers());
    }
}
