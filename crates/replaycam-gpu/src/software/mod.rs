//! CPU implementation of the platform surface and camera texture.
//!
//! Pixels are stored as RGBA rows ordered bottom-up, matching window
//! coordinates, so `(x, 0)` is the bottom-left row.

pub mod external;
pub mod surface;
pub mod texture;
