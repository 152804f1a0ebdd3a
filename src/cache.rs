//! Public facade: one owned cache with an explicit start and shutdown.

use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::decoder::ImageLibrary;
use crate::error::{CacheError, CacheResult};
use crate::pixels::{PixelBuffer, UvRect};
use crate::render::{RenderBackend, TextureHandle};
use crate::request::{Content, Quality, RequestHandle};
use crate::shot::{Resolution, ShotId};
use crate::state::CacheStats;
use crate::upload;
use crate::worker::{self, Shared};

/// Multi-resolution image cache with a background loader thread.
///
/// Producers [`submit`](Self::submit) requests and eventually
/// [`cancel`](Self::cancel) them; the render thread polls
/// [`is_ready`](Self::is_ready), calls [`upload`](Self::upload) and draws
/// with [`texture`](Self::texture). All methods take `&self` and may be
/// called from any thread.
pub struct ShotCache {
    shared: Arc<Shared>,
    render: Mutex<Box<dyn RenderBackend>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ShotCache {
    /// Validate `config` and start the loader thread.
    pub fn new(
        config: CacheConfig,
        library: impl ImageLibrary + 'static,
        backend: impl RenderBackend + 'static,
    ) -> CacheResult<Self> {
        config.validate()?;
        let shared = Arc::new(Shared::new(config, Box::new(library)));
        let handle = worker::spawn(Arc::clone(&shared))?;
        Ok(Self {
            shared,
            render: Mutex::new(Box::new(backend)),
            worker: Mutex::new(Some(handle)),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.shared.config
    }

    /// Ask for pixels of `shot` at `path`. Resolves immediately when the
    /// needed buffer is already resident; otherwise the loader picks it up.
    pub fn submit(
        &self,
        shot: ShotId,
        path: &Path,
        quality: Quality,
        content: Content,
    ) -> CacheResult<RequestHandle> {
        let handle = self.shared.state.lock().submit(
            shot,
            path,
            quality,
            content,
            self.shared.config.pad_to_power_of_two,
        )?;
        self.shared.wake.notify_one();
        Ok(handle)
    }

    /// Done, or Continuous with at least low resolution achieved.
    pub fn is_ready(&self, handle: RequestHandle) -> CacheResult<bool> {
        Ok(self.shared.state.lock().requests.get(handle)?.is_ready())
    }

    /// Whether the request reached its final quality.
    pub fn is_done(&self, handle: RequestHandle) -> CacheResult<bool> {
        Ok(self.shared.state.lock().requests.get(handle)?.done)
    }

    pub fn achieved(&self, handle: RequestHandle) -> CacheResult<Option<Resolution>> {
        Ok(self.shared.state.lock().requests.get(handle)?.achieved)
    }

    /// Drop a request and everything it privately owns.
    ///
    /// The handle is stale afterwards; cancelling it again is an error.
    pub fn cancel(&self, handle: RequestHandle) -> CacheResult<()> {
        let textures = {
            let mut state = self.shared.state.lock();
            let mut textures = state.cancel(handle)?;
            textures.append(&mut state.stale_textures);
            textures
        };
        self.shared.wake.notify_one();
        self.release(textures);
        Ok(())
    }

    /// Cancel every live request.
    pub fn cancel_all(&self) {
        let textures = {
            let mut state = self.shared.state.lock();
            let mut textures = Vec::new();
            for handle in state.requests.handles() {
                match state.cancel(handle) {
                    Ok(released) => textures.extend(released),
                    Err(err) => warn!(error = %err, "cancel_all skipped a request"),
                }
            }
            textures.append(&mut state.stale_textures);
            textures
        };
        debug!(released = textures.len(), "cancelled all requests");
        self.shared.wake.notify_one();
        self.release(textures);
    }

    /// Create a texture for the buffer behind `handle` if it has none yet.
    ///
    /// Must be called from the render side. Returns `true` when a texture was
    /// created.
    pub fn upload(&self, handle: RequestHandle) -> CacheResult<bool> {
        upload::upload(&self.shared.state, &self.render, handle)
    }

    /// Texture to draw and the UV rectangle of the valid pixels inside it.
    pub fn texture(&self, handle: RequestHandle) -> CacheResult<(Option<TextureHandle>, UvRect)> {
        let state = self.shared.state.lock();
        Ok(match upload::backing(&state, handle)? {
            Some(backing) => (backing.texture, backing.uv),
            None => (None, UvRect::EMPTY),
        })
    }

    /// Full-resolution dimensions of the request's shot.
    pub fn dimensions(&self, handle: RequestHandle) -> CacheResult<(u32, u32)> {
        let state = self.shared.state.lock();
        let request = state.requests.get(handle)?;
        if !request.is_ready() {
            return Err(CacheError::NotReady);
        }
        state
            .shots
            .get(request.shot)
            .and_then(|s| s.dimensions)
            .ok_or(CacheError::NotReady)
    }

    /// The buffer currently backing a ready request, for CPU-side drawing.
    pub fn pixels(&self, handle: RequestHandle) -> CacheResult<Option<(PixelBuffer, UvRect)>> {
        let state = self.shared.state.lock();
        Ok(upload::backing(&state, handle)?.map(|b| (b.pixels, b.uv)))
    }

    /// Forget every texture binding without releasing it, for when the
    /// rendering context was recreated. Pixel buffers stay resident.
    pub fn flush_texture_handles(&self) {
        let mut state = self.shared.state.lock();
        let mut dropped = state.stale_textures.len();
        state.stale_textures.clear();
        for shot in state.shots.iter_mut() {
            for resolution in Resolution::ALL {
                dropped += usize::from(shot.slot_mut(resolution).texture.take().is_some());
            }
        }
        for request in state.requests.iter_mut() {
            if let Some(crop) = request.crop.as_mut() {
                dropped += usize::from(crop.texture.take().is_some());
            }
        }
        debug!(dropped, "flushed texture handles");
    }

    pub fn stats(&self) -> CacheStats {
        self.shared.state.lock().stats()
    }

    /// `Err` once the loader has stopped on a fatal condition.
    pub fn health(&self) -> CacheResult<()> {
        if let Some((resolution, capacity)) = self.shared.state.lock().exhausted {
            return Err(CacheError::CapacityExhausted {
                resolution,
                capacity,
            });
        }
        match self.worker.lock().as_ref() {
            Some(handle) if handle.is_finished() => Err(CacheError::WorkerPanicked),
            _ => Ok(()),
        }
    }

    /// Cancel everything, stop the loader and wait for it to exit.
    ///
    /// Returns [`CacheError::WorkerPanicked`] if the loader died. Calling it
    /// again is a no-op.
    pub fn shutdown(&self) -> CacheResult<()> {
        let Some(handle) = self.worker.lock().take() else {
            return Ok(());
        };
        self.cancel_all();
        self.shared.state.lock().terminate = true;
        self.shared.wake.notify_all();
        handle.join().map_err(|_| CacheError::WorkerPanicked)?;
        debug!("cache shut down");
        Ok(())
    }

    fn release(&self, textures: Vec<TextureHandle>) {
        if textures.is_empty() {
            return;
        }
        let mut render = self.render.lock();
        for texture in textures {
            render.release(texture);
        }
    }
}

impl Drop for ShotCache {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            warn!(error = %err, "loader did not shut down cleanly");
        }
    }
}
