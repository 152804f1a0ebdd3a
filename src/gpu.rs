//! wgpu-backed [`RenderBackend`].

use std::collections::HashMap;

use crate::error::{CacheError, CacheResult};
use crate::pixels::{PixelBuffer, BYTES_PER_PIXEL};
use crate::render::{RenderBackend, TextureHandle};

/// Uploads shot buffers as sRGB RGBA8 textures on a wgpu device.
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    textures: HashMap<TextureHandle, wgpu::Texture>,
    next_id: u64,
}

impl WgpuBackend {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self {
            device,
            queue,
            textures: HashMap::new(),
            next_id: 1,
        }
    }

    /// Texture behind a handle, for binding at draw time.
    pub fn texture(&self, handle: TextureHandle) -> Option<&wgpu::Texture> {
        self.textures.get(&handle)
    }

    pub fn len(&self) -> usize {
        self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }
}

/// Reject extents the device cannot hold as a 2D texture.
fn check_extent(width: u32, height: u32, max_dimension: u32) -> CacheResult<()> {
    if width == 0 || height == 0 {
        return Err(CacheError::Render(format!("empty {width}x{height} texture")));
    }
    if width > max_dimension || height > max_dimension {
        return Err(CacheError::Render(format!(
            "{width}x{height} texture exceeds device limit {max_dimension}"
        )));
    }
    Ok(())
}

impl RenderBackend for WgpuBackend {
    fn upload(&mut self, pixels: &PixelBuffer) -> CacheResult<TextureHandle> {
        check_extent(
            pixels.width,
            pixels.height,
            self.device.limits().max_texture_dimension_2d,
        )?;
        let size = wgpu::Extent3d {
            width: pixels.width,
            height: pixels.height,
            depth_or_array_layers: 1,
        };
        let tex = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("shot"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        self.queue.write_texture(
            tex.as_image_copy(),
            &pixels.data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(BYTES_PER_PIXEL as u32 * pixels.width),
                rows_per_image: Some(pixels.height),
            },
            size,
        );

        let handle = TextureHandle(self.next_id);
        self.next_id += 1;
        self.textures.insert(handle, tex);
        Ok(handle)
    }

    fn release(&mut self, texture: TextureHandle) {
        if let Some(tex) = self.textures.remove(&texture) {
            tex.destroy();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_extent() {
        assert!(check_extent(64, 32, 8192).is_ok());
        assert!(check_extent(8192, 8192, 8192).is_ok());
        assert!(matches!(check_extent(8193, 1, 8192), Err(CacheError::Render(_))));
        assert!(matches!(check_extent(1, 8193, 8192), Err(CacheError::Render(_))));
        assert!(matches!(check_extent(0, 16, 8192), Err(CacheError::Render(_))));
    }
}
