//! Decoded RGBA8 pixel buffers and window copies.

use bytes::Bytes;
use rayon::prelude::*;

use crate::error::{CacheError, CacheResult};

/// Every buffer in the cache is tightly packed RGBA8.
pub const BYTES_PER_PIXEL: usize = 4;

/// Crops with at least this many rows copy rows in parallel.
const PARALLEL_COPY_ROWS: u32 = 256;

/// Decoded pixel data.
#[derive(Debug, Clone)]
pub struct PixelBuffer {
    /// Raw RGBA pixel data, row-major, no row padding.
    pub data: Bytes,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl PixelBuffer {
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        debug_assert_eq!(
            data.len(),
            width as usize * height as usize * BYTES_PER_PIXEL,
            "pixel data does not match {width}x{height} RGBA"
        );
        Self {
            data: Bytes::from(data),
            width,
            height,
        }
    }

    /// A fully transparent black buffer.
    pub fn zeroed(width: u32, height: u32) -> Self {
        Self::new(
            vec![0u8; width as usize * height as usize * BYTES_PER_PIXEL],
            width,
            height,
        )
    }

    /// Size in bytes.
    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// RGBA value at `(x, y)`. Panics when out of bounds.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let offset = (y as usize * self.width as usize + x as usize) * BYTES_PER_PIXEL;
        let mut rgba = [0u8; 4];
        rgba.copy_from_slice(&self.data[offset..offset + BYTES_PER_PIXEL]);
        rgba
    }

    fn bounds(&self) -> PixelRect {
        PixelRect::new(0, 0, i64::from(self.width), i64::from(self.height))
    }
}

/// Half-open integer pixel rectangle. May extend past a buffer's edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x0: i64,
    pub y0: i64,
    pub x1: i64,
    pub y1: i64,
}

impl PixelRect {
    pub fn new(x0: i64, y0: i64, x1: i64, y1: i64) -> Self {
        Self { x0, y0, x1, y1 }
    }

    pub fn width(&self) -> i64 {
        self.x1.saturating_sub(self.x0).max(0)
    }

    pub fn height(&self) -> i64 {
        self.y1.saturating_sub(self.y0).max(0)
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// Overlap of two rectangles, `None` when they do not overlap.
    pub fn intersect(&self, other: &PixelRect) -> Option<PixelRect> {
        let r = PixelRect::new(
            self.x0.max(other.x0),
            self.y0.max(other.y0),
            self.x1.min(other.x1),
            self.y1.min(other.y1),
        );
        (!r.is_empty()).then_some(r)
    }
}

/// Normalized texture coordinates of a sub-rectangle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UvRect {
    pub min: [f32; 2],
    pub max: [f32; 2],
}

impl UvRect {
    /// The whole texture.
    pub const FULL: UvRect = UvRect {
        min: [0.0, 0.0],
        max: [1.0, 1.0],
    };

    /// Nothing valid to sample.
    pub const EMPTY: UvRect = UvRect {
        min: [0.0, 0.0],
        max: [0.0, 0.0],
    };
}

/// Copy `window` of `src` into a new buffer sized to the window.
///
/// The window is clipped against `src`; everything outside the clip stays
/// zero. With `pad_to_power_of_two` the output extents are rounded up and
/// the padding is zero as well. The returned [`UvRect`] covers exactly the
/// copied pixels inside the output buffer.
///
/// Fails with [`CacheError::InvalidWindow`] when the output would not be
/// addressable.
pub fn crop_copy(
    src: &PixelBuffer,
    window: PixelRect,
    pad_to_power_of_two: bool,
) -> CacheResult<(PixelBuffer, UvRect)> {
    let too_large = || CacheError::InvalidWindow(format!("crop of {window:?} is too large"));

    let want_w = u32::try_from(window.width().max(1)).map_err(|_| too_large())?;
    let want_h = u32::try_from(window.height().max(1)).map_err(|_| too_large())?;
    let (out_w, out_h) = if pad_to_power_of_two {
        (
            want_w.checked_next_power_of_two().ok_or_else(too_large)?,
            want_h.checked_next_power_of_two().ok_or_else(too_large)?,
        )
    } else {
        (want_w, want_h)
    };

    let dst_stride = (out_w as usize)
        .checked_mul(BYTES_PER_PIXEL)
        .ok_or_else(too_large)?;
    let len = dst_stride
        .checked_mul(out_h as usize)
        .filter(|&len| len <= isize::MAX as usize)
        .ok_or_else(too_large)?;
    let mut out = vec![0u8; len];

    let Some(clip) = window.intersect(&src.bounds()) else {
        return Ok((PixelBuffer::new(out, out_w, out_h), UvRect::EMPTY));
    };

    let dst_x = (clip.x0 - window.x0) as usize;
    let dst_y = (clip.y0 - window.y0) as usize;
    let copy_w = clip.width() as usize;
    let copy_h = clip.height() as usize;
    let row_bytes = copy_w * BYTES_PER_PIXEL;
    let src_stride = src.width as usize * BYTES_PER_PIXEL;
    let src_data = &src.data;

    let copy_row = |row: usize, dst_row: &mut [u8]| {
        let src_offset = (clip.y0 as usize + row) * src_stride + clip.x0 as usize * BYTES_PER_PIXEL;
        let dst_offset = dst_x * BYTES_PER_PIXEL;
        dst_row[dst_offset..dst_offset + row_bytes]
            .copy_from_slice(&src_data[src_offset..src_offset + row_bytes]);
    };

    if copy_h as u32 >= PARALLEL_COPY_ROWS {
        out.par_chunks_mut(dst_stride)
            .skip(dst_y)
            .take(copy_h)
            .enumerate()
            .for_each(|(row, dst_row)| copy_row(row, dst_row));
    } else {
        out.chunks_mut(dst_stride)
            .skip(dst_y)
            .take(copy_h)
            .enumerate()
            .for_each(|(row, dst_row)| copy_row(row, dst_row));
    }

    let uv = UvRect {
        min: [
            dst_x as f32 / out_w as f32,
            dst_y as f32 / out_h as f32,
        ],
        max: [
            (dst_x + copy_w) as f32 / out_w as f32,
            (dst_y + copy_h) as f32 / out_h as f32,
        ],
    };
    Ok((PixelBuffer::new(out, out_w, out_h), uv))
}
