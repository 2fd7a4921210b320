//! Small geometry types used by surfaces and the renderer.

/// A 4x4 row-major matrix mapping unit-quad coordinates to texture
/// coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform(pub [f32; 16]);

impl Transform {
    /// Identity mapping.
    pub const IDENTITY: Self = Self([
        1.0, 0.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0, //
        0.0, 0.0, 0.0, 1.0,
    ]);

    /// Mirror along the horizontal axis (`t' = 1 - t`).
    pub const VERTICAL_FLIP: Self = Self([
        1.0, 0.0, 0.0, 0.0, //
        0.0, -1.0, 0.0, 1.0, //
        0.0, 0.0, 1.0, 0.0, //
        0.0, 0.0, 0.0, 1.0,
    ]);

    /// Build from a row-major array.
    pub fn from_row_major(values: [f32; 16]) -> Self {
        Self(values)
    }

    /// Map a quad coordinate `(u, v)` to a texture coordinate `(s, t)`.
    pub fn apply(&self, u: f32, v: f32) -> (f32, f32) {
        let m = &self.0;
        let w = m[12] * u + m[13] * v + m[15];
        let w = if w.abs() > f32::EPSILON { w } else { 1.0 };
        let s = (m[0] * u + m[1] * v + m[3]) / w;
        let t = (m[4] * u + m[5] * v + m[7]) / w;
        (s, t)
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// A rectangle in window coordinates (origin at the bottom-left).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    /// Create a rectangle.
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Returns true if `(px, py)` lies inside the rectangle.
    pub fn contains(&self, px: u32, py: u32) -> bool {
        px >= self.x && py >= self.y && px - self.x < self.width && py - self.y < self.height
    }

    /// Clip to a `width` x `height` target. Returns `None` if nothing remains.
    pub fn clip(&self, width: u32, height: u32) -> Option<Self> {
        if self.x >= width || self.y >= height || self.width == 0 || self.height == 0 {
            return None;
        }
        Some(Self {
            x: self.x,
            y: self.y,
            width: self.width.min(width - self.x),
            height: self.height.min(height - self.y),
        })
    }
}

/// An RGBA color with unit-range channels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rgba {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Rgba {
    pub const RED: Self = Self::new(1.0, 0.0, 0.0, 1.0);
    pub const GREEN: Self = Self::new(0.0, 1.0, 0.0, 1.0);
    pub const BLUE: Self = Self::new(0.0, 0.0, 1.0, 1.0);
    pub const BLACK: Self = Self::new(0.0, 0.0, 0.0, 1.0);

    /// Create a color.
    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Convert to 8-bit RGBA.
    pub fn to_bytes(self) -> [u8; 4] {
        let q = |c: f32| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
        [q(self.r), q(self.g), q(self.b), q(self.a)]
    }
}
