//! Upload Bridge: hand ready pixels to the render backend.
//!
//! The cache lock and the render lock are never held together. An upload
//! snapshots what to send under the cache lock, talks to the backend with
//! the cache lock released, then re-validates before storing the texture.

use parking_lot::Mutex;
use tracing::debug;

use crate::error::CacheResult;
use crate::pixels::{PixelBuffer, UvRect};
use crate::render::{RenderBackend, TextureHandle};
use crate::request::{Content, RequestHandle};
use crate::shot::Resolution;
use crate::state::CacheState;

/// Where the texture of a ready request lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Owner {
    /// Shared by every Whole request on the shot.
    Shot(Resolution),
    /// The request's private crop at this quality.
    Crop(Resolution),
}

/// The buffer currently backing a ready request.
#[derive(Debug)]
pub(crate) struct Backing {
    owner: Owner,
    pub(crate) pixels: PixelBuffer,
    pub(crate) texture: Option<TextureHandle>,
    pub(crate) uv: UvRect,
}

/// Look up the buffer behind `handle`. `Ok(None)` while not ready.
pub(crate) fn backing(state: &CacheState, handle: RequestHandle) -> CacheResult<Option<Backing>> {
    let request = state.requests.get(handle)?;
    let Some(achieved) = request.achieved.filter(|_| request.is_ready()) else {
        return Ok(None);
    };

    if request.content == Content::Whole {
        let slot = state.shots.get(request.shot).map(|s| s.slot(achieved));
        debug_assert!(
            slot.is_some_and(|s| s.pixels.is_some()),
            "{} lost its {achieved} buffer while bound",
            request.shot
        );
        return Ok(slot.and_then(|slot| {
            Some(Backing {
                owner: Owner::Shot(achieved),
                pixels: slot.pixels.clone()?,
                texture: slot.texture,
                uv: UvRect::FULL,
            })
        }));
    }

    Ok(request.crop.as_ref().map(|crop| Backing {
        owner: Owner::Crop(crop.quality),
        pixels: crop.pixels.clone(),
        texture: crop.texture,
        uv: crop.uv,
    }))
}

/// Upload the buffer behind `handle` unless it already has a texture.
///
/// Returns `true` when a new texture was created and bound. Textures queued
/// as stale are released first.
pub(crate) fn upload(
    state: &Mutex<CacheState>,
    render: &Mutex<Box<dyn RenderBackend>>,
    handle: RequestHandle,
) -> CacheResult<bool> {
    let (pending, stale) = {
        let mut state = state.lock();
        let backing = backing(&state, handle)?;
        let stale = std::mem::take(&mut state.stale_textures);
        (backing.filter(|b| b.texture.is_none()), stale)
    };

    let uploaded = {
        let mut render = render.lock();
        for texture in stale {
            render.release(texture);
        }
        match &pending {
            Some(backing) => Some(render.upload(&backing.pixels)?),
            None => None,
        }
    };
    let (Some(backing), Some(texture)) = (pending, uploaded) else {
        return Ok(false);
    };

    let bound = bind(&mut state.lock(), handle, backing.owner, texture);
    if !bound {
        debug!(%texture, "request changed during upload, releasing");
        render.lock().release(texture);
    }
    Ok(bound)
}

/// Store `texture` if the request is still backed by the buffer it was made
/// from and nothing else got there first.
fn bind(state: &mut CacheState, handle: RequestHandle, owner: Owner, texture: TextureHandle) -> bool {
    let CacheState {
        shots, requests, ..
    } = state;
    let Ok(request) = requests.get_mut(handle) else {
        return false;
    };

    match owner {
        Owner::Shot(resolution) => {
            if request.achieved != Some(resolution) {
                return false;
            }
            let Some(slot) = shots.get_mut(request.shot).map(|s| s.slot_mut(resolution)) else {
                return false;
            };
            if slot.texture.is_some() || slot.pixels.is_none() || slot.counter == 0 {
                return false;
            }
            slot.texture = Some(texture);
        }
        Owner::Crop(quality) => {
            let Some(crop) = request.crop.as_mut() else {
                return false;
            };
            if crop.quality != quality || crop.texture.is_some() {
                return false;
            }
            crop.texture = Some(texture);
        }
    }
    debug!(shot = %request.shot, %texture, "bound texture");
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::Arc;

    use crate::error::CacheError;
    use crate::request::Quality;
    use crate::shot::{DimensionSource, ShotId};
    use crate::test_utils::RecordingBackend;

    /// Backend that runs `hook` once inside its first upload, while the
    /// cache lock is released.
    struct HookBackend {
        inner: RecordingBackend,
        hook: Option<Box<dyn FnOnce() + Send>>,
    }

    impl RenderBackend for HookBackend {
        fn upload(&mut self, pixels: &PixelBuffer) -> CacheResult<TextureHandle> {
            if let Some(hook) = self.hook.take() {
                hook();
            }
            self.inner.upload(pixels)
        }

        fn release(&mut self, texture: TextureHandle) {
            self.inner.release(texture);
        }
    }

    fn solid(width: u32, height: u32) -> PixelBuffer {
        PixelBuffer::new(vec![9; width as usize * height as usize * 4], width, height)
    }

    /// Shot 1 is 64x32 with only its low resolution resident.
    fn state_with_low() -> Arc<Mutex<CacheState>> {
        let mut state = CacheState::new();
        let shot = state.shots.get_or_insert(ShotId(1), Path::new("/a.jpg")).unwrap();
        shot.learn_dimensions((64, 32), DimensionSource::LowDecode);
        shot.low.pixels = Some(solid(16, 8));
        Arc::new(Mutex::new(state))
    }

    fn render_with(
        hook: impl FnOnce() + Send + 'static,
    ) -> (Mutex<Box<dyn RenderBackend>>, RecordingBackend) {
        let inner = RecordingBackend::new();
        let backend = HookBackend {
            inner: inner.clone(),
            hook: Some(Box::new(hook)),
        };
        (Mutex::new(Box::new(backend)), inner)
    }

    fn submit(state: &Mutex<CacheState>, quality: Quality, content: Content) -> RequestHandle {
        state
            .lock()
            .submit(ShotId(1), Path::new("/a.jpg"), quality, content, false)
            .unwrap()
    }

    struct RejectingBackend;

    impl RenderBackend for RejectingBackend {
        fn upload(&mut self, pixels: &PixelBuffer) -> CacheResult<TextureHandle> {
            Err(CacheError::Render(format!("{}x{} rejected", pixels.width, pixels.height)))
        }

        fn release(&mut self, texture: TextureHandle) {
            panic!("release of {texture} never uploaded");
        }
    }

    #[test]
    fn test_backend_failure_leaves_request_unbound() {
        let state = state_with_low();
        let handle = submit(&state, Quality::Low, Content::Whole);
        let render: Mutex<Box<dyn RenderBackend>> = Mutex::new(Box::new(RejectingBackend));

        assert!(matches!(
            upload(&state, &render, handle),
            Err(CacheError::Render(_))
        ));
        let current = backing(&state.lock(), handle).unwrap().unwrap();
        assert_eq!(current.texture, None);
    }

    #[test]
    fn test_upload_binds_when_nothing_changed() {
        let state = state_with_low();
        let handle = submit(&state, Quality::Low, Content::Whole);
        let (render, backend) = render_with(|| {});

        assert!(upload(&state, &render, handle).unwrap());
        let bound = backing(&state.lock(), handle).unwrap().unwrap();
        assert_eq!(bound.texture, Some(TextureHandle(1)));
        assert!(backend.released().is_empty());

        // Already bound: nothing to send.
        assert!(!upload(&state, &render, handle).unwrap());
        assert_eq!(backend.uploads(), 1);
    }

    #[test]
    fn test_crop_upgraded_during_upload_is_not_bound() {
        let state = state_with_low();
        let region = Content::Region {
            min: [0.0, 0.0],
            max: [32.0, 16.0],
        };
        let handle = submit(&state, Quality::Continuous, region);
        assert_eq!(state.lock().requests.get(handle).unwrap().achieved, Some(Resolution::Low));

        let shared = Arc::clone(&state);
        let (render, backend) = render_with(move || {
            let mut state = shared.lock();
            if let Some(shot) = state.shots.get_mut(ShotId(1)) {
                shot.full.pixels = Some(solid(64, 32));
            }
            state.resolve_pending(false);
        });

        assert!(!upload(&state, &render, handle).unwrap());
        assert_eq!(backend.released(), vec![TextureHandle(1)]);

        let current = backing(&state.lock(), handle).unwrap().unwrap();
        assert_eq!(current.owner, Owner::Crop(Resolution::Full));
        assert_eq!(current.texture, None);

        assert!(upload(&state, &render, handle).unwrap());
        assert_eq!(
            backing(&state.lock(), handle).unwrap().unwrap().texture,
            Some(TextureHandle(2))
        );
    }

    #[test]
    fn test_cancel_during_upload_releases_texture() {
        let state = state_with_low();
        let handle = submit(&state, Quality::Low, Content::Whole);

        let shared = Arc::clone(&state);
        let (render, backend) = render_with(move || {
            let released = shared.lock().cancel(handle).unwrap();
            assert!(released.is_empty());
        });

        assert!(!upload(&state, &render, handle).unwrap());
        assert_eq!(backend.released(), vec![TextureHandle(1)]);
        let state = state.lock();
        assert_eq!(state.shots.get(ShotId(1)).unwrap().low.texture, None);
    }

    #[test]
    fn test_shared_texture_bound_elsewhere_during_upload() {
        let state = state_with_low();
        let handle = submit(&state, Quality::Low, Content::Whole);

        let shared = Arc::clone(&state);
        let (render, backend) = render_with(move || {
            if let Some(shot) = shared.lock().shots.get_mut(ShotId(1)) {
                shot.low.texture = Some(TextureHandle(99));
            }
        });

        assert!(!upload(&state, &render, handle).unwrap());
        assert_eq!(backend.released(), vec![TextureHandle(1)]);
        let state = state.lock();
        assert_eq!(
            state.shots.get(ShotId(1)).unwrap().low.texture,
            Some(TextureHandle(99))
        );
    }
}
