//! CPU textures.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;

use crate::error::GpuError;
use crate::frame::TextureId;
use crate::geometry::Rgba;
use crate::GpuResult;

/// An RGBA image with rows stored bottom-up.
#[derive(Debug, Clone, PartialEq)]
pub struct CpuImage {
    width: u32,
    height: u32,
    pixels: Bytes,
}

impl CpuImage {
    /// Wrap RGBA pixel data. Fails if the length does not match the size.
    pub fn new(width: u32, height: u32, pixels: Bytes) -> GpuResult<Self> {
        let expected = Self::buffer_size(width, height);
        if pixels.len() != expected {
            return Err(GpuError::Backend(format!(
                "expected {} bytes for {}x{} RGBA, got {}",
                expected,
                width,
                height,
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// An image filled with one color.
    pub fn solid(width: u32, height: u32, color: Rgba) -> Self {
        let rgba = color.to_bytes();
        let pixels: Vec<u8> = rgba
            .iter()
            .copied()
            .cycle()
            .take(Self::buffer_size(width, height))
            .collect();
        Self {
            width,
            height,
            pixels: Bytes::from(pixels),
        }
    }

    /// RGBA buffer size for the given dimensions.
    pub fn buffer_size(width: u32, height: u32) -> usize {
        width as usize * height as usize * 4
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &Bytes {
        &self.pixels
    }

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

/// Shared table of CPU textures, addressed by [`TextureId`].
#[derive(Clone, Default)]
pub struct TextureStore {
    textures: Arc<RwLock<HashMap<TextureId, Option<CpuImage>>>>,
    next_id: Arc<AtomicU32>,
}

impl TextureStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an empty texture.
    pub fn create(&self) -> TextureId {
        let id = TextureId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.textures.write().insert(id, None);
        id
    }

    /// Replace the content of `id`.
    pub fn upload(&self, id: TextureId, image: CpuImage) -> GpuResult<()> {
        match self.textures.write().get_mut(&id) {
            Some(slot) => {
                *slot = Some(image);
                Ok(())
            }
            None => Err(GpuError::InvalidTexture(id.0)),
        }
    }

    /// Current content of `id`; `None` if nothing was uploaded yet.
    pub fn get(&self, id: TextureId) -> GpuResult<Option<CpuImage>> {
        self.textures
            .read()
            .get(&id)
            .cloned()
            .ok_or(GpuError::InvalidTexture(id.0))
    }

    /// Free `id`. Unknown ids are ignored.
    pub fn delete(&self, id: TextureId) {
        self.textures.write().remove(&id);
    }

    /// Returns true if `id` names a live texture.
    pub fn contains(&self, id: TextureId) -> bool {
        self.textures.read().contains_key(&id)
    }
}
