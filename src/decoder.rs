//! Image decoding and resizing.
//!
//! The cache only talks to decoding through [`ImageLibrary`], guarded by its
//! own lock. [`FileDecoder`] is the stock implementation: zune-jpeg for JPEG
//! (SIMD-accelerated, ~2-3x faster than the image crate), the image crate for
//! everything else, fast_image_resize for downscaling.

use std::path::Path;

use fast_image_resize as fir;
use zune_jpeg::JpegDecoder;

use crate::error::{CacheError, CacheResult};
use crate::pixels::{PixelBuffer, BYTES_PER_PIXEL};

/// Edge length of the placeholder substituted for undecodable images.
pub const PLACEHOLDER_SIZE: u32 = 64;

const PLACEHOLDER_CHECKER: u32 = 8;

const JPEG_MAGIC: [u8; 3] = [0xFF, 0xD8, 0xFF];

/// A decoded image plus the dimensions of its source before resizing.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub pixels: PixelBuffer,
    pub source_width: u32,
    pub source_height: u32,
}

/// Decode/resize library used by the loader thread.
pub trait ImageLibrary: Send {
    /// Decode `path` and downscale it to fit within `max_edge`.
    fn decode_and_resize(&mut self, path: &Path, max_edge: u32) -> CacheResult<DecodedImage>;

    /// Downscale an already decoded buffer to fit within `max_edge`.
    fn resize(&mut self, src: &PixelBuffer, max_edge: u32) -> CacheResult<PixelBuffer>;

    /// Buffer substituted when decoding fails.
    fn placeholder(&mut self) -> PixelBuffer {
        placeholder()
    }
}

/// Dimensions of a `width`x`height` image scaled to fit within `max_edge`,
/// keeping aspect ratio. Never upscales; never returns a zero extent.
pub fn fit_within(width: u32, height: u32, max_edge: u32) -> (u32, u32) {
    let longest = width.max(height);
    if longest <= max_edge || longest == 0 {
        return (width.max(1), height.max(1));
    }
    let scale = f64::from(max_edge) / f64::from(longest);
    let w = (f64::from(width) * scale).round().max(1.0) as u32;
    let h = (f64::from(height) * scale).round().max(1.0) as u32;
    (w, h)
}

/// Magenta/grey checkerboard.
pub(crate) fn placeholder() -> PixelBuffer {
    let mut data = Vec::with_capacity((PLACEHOLDER_SIZE * PLACEHOLDER_SIZE) as usize * BYTES_PER_PIXEL);
    for y in 0..PLACEHOLDER_SIZE {
        for x in 0..PLACEHOLDER_SIZE {
            let on = ((x / PLACEHOLDER_CHECKER) + (y / PLACEHOLDER_CHECKER)) % 2 == 0;
            if on {
                data.extend_from_slice(&[255, 0, 255, 255]);
            } else {
                data.extend_from_slice(&[128, 128, 128, 255]);
            }
        }
    }
    PixelBuffer::new(data, PLACEHOLDER_SIZE, PLACEHOLDER_SIZE)
}

/// Decodes image files from disk.
pub struct FileDecoder {
    resizer: fir::Resizer,
}

impl FileDecoder {
    pub fn new() -> Self {
        Self {
            resizer: fir::Resizer::new(),
        }
    }

    fn resize_to(&mut self, src: &PixelBuffer, target_w: u32, target_h: u32) -> CacheResult<PixelBuffer> {
        if src.width == target_w && src.height == target_h {
            return Ok(src.clone());
        }

        let src_view = fir::images::ImageRef::new(src.width, src.height, &src.data, fir::PixelType::U8x4)
            .map_err(|e| CacheError::Decode(format!("Invalid resize source: {e:?}")))?;
        let mut dst_image = fir::images::Image::new(target_w, target_h, fir::PixelType::U8x4);
        let options = fir::ResizeOptions::new()
            .resize_alg(fir::ResizeAlg::Convolution(fir::FilterType::CatmullRom));
        self.resizer
            .resize(&src_view, &mut dst_image, Some(&options))
            .map_err(|e| CacheError::Decode(format!("Resize failed: {e:?}")))?;
        Ok(PixelBuffer::new(dst_image.into_vec(), target_w, target_h))
    }
}

impl Default for FileDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageLibrary for FileDecoder {
    fn decode_and_resize(&mut self, path: &Path, max_edge: u32) -> CacheResult<DecodedImage> {
        let bytes = std::fs::read(path)?;
        let decoded = decode_rgba(&bytes)?;
        let (source_width, source_height) = decoded.dimensions();
        let (w, h) = fit_within(source_width, source_height, max_edge);
        let pixels = self.resize_to(&decoded, w, h)?;
        Ok(DecodedImage {
            pixels,
            source_width,
            source_height,
        })
    }

    fn resize(&mut self, src: &PixelBuffer, max_edge: u32) -> CacheResult<PixelBuffer> {
        let (w, h) = fit_within(src.width, src.height, max_edge);
        self.resize_to(src, w, h)
    }
}

/// Decode encoded image bytes to RGBA8.
pub(crate) fn decode_rgba(bytes: &[u8]) -> CacheResult<PixelBuffer> {
    if bytes.starts_with(&JPEG_MAGIC) {
        return decode_jpeg_rgba(bytes);
    }
    let img = image::load_from_memory(bytes)
        .map_err(|e| CacheError::Decode(format!("Failed to decode image: {e}")))?
        .to_rgba8();
    let (width, height) = img.dimensions();
    Ok(PixelBuffer::new(img.into_raw(), width, height))
}

/// Decode JPEG bytes with zune-jpeg, expanding grayscale and RGB to RGBA.
fn decode_jpeg_rgba(bytes: &[u8]) -> CacheResult<PixelBuffer> {
    let mut decoder = JpegDecoder::new(bytes);

    let pixels = decoder
        .decode()
        .map_err(|e| CacheError::Decode(format!("Failed to decode JPEG: {:?}", e)))?;

    let info = decoder
        .info()
        .ok_or_else(|| CacheError::Decode("Failed to get image info".into()))?;

    let width = info.width as u32;
    let height = info.height as u32;
    let pixel_count = width as usize * height as usize;
    if pixel_count == 0 {
        return Err(CacheError::Decode("JPEG has zero extent".into()));
    }

    let rgba = match pixels.len() / pixel_count {
        1 => pixels.iter().flat_map(|&g| [g, g, g, 255]).collect(),
        3 => pixels
            .chunks_exact(3)
            .flat_map(|rgb| [rgb[0], rgb[1], rgb[2], 255])
            .collect(),
        4 => pixels,
        n => {
            return Err(CacheError::Decode(format!(
                "Unsupported JPEG output with {n} components"
            )))
        }
    };

    Ok(PixelBuffer::new(rgba, width, height))
}
