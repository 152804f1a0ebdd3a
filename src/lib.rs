//! Shot Cache - multi-resolution image cache with a background loader.
//!
//! This crate provides:
//! - Low/full resolution buffers per image under separate budgets
//! - Whole-image, region and centered-box requests with Low/Full/Continuous quality
//! - A dedicated loader thread that decodes the most-wanted image first
//! - Consumer-driven texture upload with sharing and upgrade replacement
//!
//! Usage:
//! ```no_run
//! use std::path::Path;
//! use shot_cache::{CacheConfig, Content, Quality, ShotCache, ShotId};
//! # use shot_cache::{CacheResult, PixelBuffer, RenderBackend, TextureHandle};
//! # struct Backend;
//! # impl RenderBackend for Backend {
//! #     fn upload(&mut self, _: &PixelBuffer) -> CacheResult<TextureHandle> { Ok(TextureHandle(1)) }
//! #     fn release(&mut self, _: TextureHandle) {}
//! # }
//!
//! # fn main() -> CacheResult<()> {
//! let cache = ShotCache::new(CacheConfig::default(), shot_cache::FileDecoder::new(), Backend)?;
//! let handle = cache.submit(ShotId(7), Path::new("IMG_0007.jpg"), Quality::Continuous, Content::Whole)?;
//!
//! // Render loop
//! if cache.is_ready(handle)? {
//!     cache.upload(handle)?;
//!     let (texture, uv) = cache.texture(handle)?;
//! }
//!
//! cache.cancel(handle)?;
//! cache.shutdown()?;
//! # Ok(())
//! # }
//! ```

mod cache;
mod config;
mod decoder;
mod error;
mod eviction;
#[cfg(feature = "wgpu")]
mod gpu;
mod pixels;
mod render;
mod request;
mod resolver;
mod shot;
mod state;
mod upload;
mod worker;
#[cfg(test)]
pub(crate) mod test_utils;

pub use cache::ShotCache;
pub use config::{CacheConfig, ExhaustionPolicy};
pub use decoder::{fit_within, DecodedImage, FileDecoder, ImageLibrary, PLACEHOLDER_SIZE};
pub use error::{CacheError, CacheResult};
#[cfg(feature = "wgpu")]
pub use gpu::WgpuBackend;
pub use pixels::{crop_copy, PixelBuffer, PixelRect, UvRect, BYTES_PER_PIXEL};
pub use render::{RenderBackend, TextureHandle};
pub use request::{Content, Quality, RequestHandle, MAX_WINDOW_EXTENT};
pub use shot::{Resolution, ShotId};
pub use state::CacheStats;
