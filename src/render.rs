//! Rendering subsystem seam.
//!
//! Texture creation and release happen only through [`RenderBackend`], which
//! the cache keeps behind its own lock and only calls from consumer-driven
//! operations (`upload`, `cancel`, `cancel_all`), never from the loader thread.

use std::fmt;

use crate::error::CacheResult;
use crate::pixels::PixelBuffer;

/// Opaque handle to a GPU texture owned by a [`RenderBackend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub u64);

impl fmt::Display for TextureHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tex#{}", self.0)
    }
}

/// GPU texture upload/release.
pub trait RenderBackend: Send {
    /// Copy `pixels` into a new GPU-addressable texture.
    fn upload(&mut self, pixels: &PixelBuffer) -> CacheResult<TextureHandle>;

    /// Free a texture previously returned by [`RenderBackend::upload`].
    fn release(&mut self, texture: TextureHandle);
}
