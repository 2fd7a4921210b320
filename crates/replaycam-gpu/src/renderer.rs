//! Frame renderer with the diagnostic overlay.
//!
//! Every frame is drawn as a full-viewport textured quad, followed by a small
//! scissored clear whose color cycles red, green, blue with `frame % 3` and
//! whose horizontal position sweeps the viewport with `frame % 100`. Dropped or
//! reordered frames show up as a skipped color or a jump in position.

use tracing::trace;

use crate::frame::TextureId;
use crate::geometry::{Rect, Rgba, Transform};
use crate::surface::RenderSurface;
use crate::GpuResult;

/// Overlay colors, indexed by `frame_counter % 3`.
pub const OVERLAY_COLORS: [Rgba; 3] = [Rgba::RED, Rgba::GREEN, Rgba::BLUE];

/// Placement and color of the overlay for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayRect {
    pub color: Rgba,
    pub rect: Rect,
}

/// Compute the overlay for `frame_counter` on a `width` x `height` viewport.
///
/// The x position is computed in `f32` and truncated, so for some widths it
/// lands one pixel away from the exact product.
pub fn overlay_for(frame_counter: u64, width: u32, height: u32) -> OverlayRect {
    let color = OVERLAY_COLORS[(frame_counter % 3) as usize];
    let x = (width as f32 * ((frame_counter % 100) as f32 / 100.0)) as u32;

    OverlayRect {
        color,
        rect: Rect::new(x, 0, width / 32, height / 32),
    }
}

/// Draws camera frames into render surfaces.
#[derive(Debug, Clone)]
pub struct FrameRenderer {
    show_overlay: bool,
}

impl FrameRenderer {
    /// Create a renderer.
    pub fn new(show_overlay: bool) -> Self {
        Self { show_overlay }
    }

    /// Returns true if the overlay is drawn.
    pub fn show_overlay(&self) -> bool {
        self.show_overlay
    }

    /// Make `surface` current and draw `texture` into a `width` x `height`
    /// viewport, then the overlay for `frame_counter`.
    pub fn draw(
        &self,
        surface: &mut RenderSurface,
        texture: TextureId,
        transform: &Transform,
        frame_counter: u64,
        width: u32,
        height: u32,
    ) -> GpuResult<()> {
        surface.make_current()?;
        surface.draw_frame_in(Rect::new(0, 0, width, height), texture, transform)?;

        if self.show_overlay {
            let overlay = overlay_for(frame_counter, width, height);
            trace!(frame_counter, x = overlay.rect.x, "Drawing overlay");
            surface.clear_rect(overlay.rect, overlay.color)?;
        }

        Ok(())
    }
}

impl Default for FrameRenderer {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::GpuContext;
    use crate::software::surface::CpuSurface;
    use crate::software::texture::{CpuImage, TextureStore};
    use crate::surface::SurfaceRole;

    #[test]
    fn test_overlay_color_cycles() {
        for f in 0..1000u64 {
            let overlay = overlay_for(f, 1280, 720);
            let expected = match f % 3 {
                0 => Rgba::RED,
                1 => Rgba::GREEN,
                _ => Rgba::BLUE,
            };
            assert_eq!(overlay.color, expected, "frame {f}");
        }
    }

    #[test]
    fn test_overlay_position_sweeps_viewport() {
        for f in 0..1000u64 {
            let overlay = overlay_for(f, 1280, 720);
            let expected = (1280.0f32 * ((f % 100) as f32 / 100.0)) as u32;
            assert_eq!(overlay.rect.x, expected, "frame {f}");
            assert_eq!(overlay.rect.y, 0);
            assert_eq!(overlay.rect.width, 40);
            assert_eq!(overlay.rect.height, 22);
        }

        assert_eq!(overlay_for(0, 1280, 720).rect.x, 0);
        assert_eq!(overlay_for(50, 1280, 720).rect.x, 640);
        assert_eq!(overlay_for(150, 1280, 720).rect.x, 640);
        assert_eq!(overlay_for(25, 64, 36).rect.x, 16);
    }

    #[test]
    fn test_overlay_position_uses_single_precision() {
        // 720 * 0.65 is 468 exactly, but 0.65f32 sits just below it.
        assert_eq!(overlay_for(65, 720, 480).rect.x, 467);
        assert_eq!(overlay_for(35, 720, 480).rect.x, 252);
    }

    #[test]
    fn test_draw_golden_pixels() {
        let store = TextureStore::new();
        let texture = store.create();
        store
            .upload(texture, CpuImage::solid(4, 4, Rgba::new(0.0, 0.0, 0.0, 1.0)))
            .unwrap();

        let context = GpuContext::new("test");
        let renderer = FrameRenderer::new(true);
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut surface = RenderSurface::bind(
            &context,
            SurfaceRole::Display,
            Box::new(CpuSurface::new(64, 64, store).with_sink(tx)),
        )
        .unwrap();

        // Frame 25: green (25 % 3 == 1) at x = 64 * 0.25 = 16, 2x2 box.
        renderer
            .draw(&mut surface, texture, &Transform::IDENTITY, 25, 64, 64)
            .unwrap();
        assert!(surface.swap_buffers());

        let presented = rx.try_recv().unwrap();
        assert_eq!(presented.pixel(16, 0), [0, 255, 0, 255]);
        assert_eq!(presented.pixel(17, 1), [0, 255, 0, 255]);
        assert_eq!(presented.pixel(18, 0), [0, 0, 0, 255]);
        assert_eq!(presented.pixel(16, 2), [0, 0, 0, 255]);
        assert_eq!(presented.pixel(15, 0), [0, 0, 0, 255]);

        // Frame 51: red (51 % 3 == 0) at x = 64 * 0.51.
        renderer
            .draw(&mut surface, texture, &Transform::IDENTITY, 51, 64, 64)
            .unwrap();
        assert!(surface.swap_buffers());
        let presented = rx.try_recv().unwrap();
        let x = overlay_for(51, 64, 64).rect.x;
        assert_eq!(presented.pixel(x, 0), [255, 0, 0, 255]);
    }

    #[test]
    fn test_draw_without_overlay_leaves_frame_untouched() {
        let store = TextureStore::new();
        let texture = store.create();
        store
            .upload(texture, CpuImage::solid(2, 2, Rgba::new(1.0, 1.0, 1.0, 1.0)))
            .unwrap();

        let context = GpuContext::new("test");
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut surface = RenderSurface::bind(
            &context,
            SurfaceRole::Display,
            Box::new(CpuSurface::new(64, 32, store).with_sink(tx)),
        )
        .unwrap();

        FrameRenderer::new(false)
            .draw(&mut surface, texture, &Transform::IDENTITY, 0, 64, 32)
            .unwrap();
        assert!(surface.swap_buffers());

        let presented = rx.try_recv().unwrap();
        assert_eq!(presented.pixel(0, 0), [255, 255, 255, 255]);
        assert_eq!(presented.pixel(1, 0), [255, 255, 255, 255]);
    }
}
