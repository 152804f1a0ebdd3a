//! Shared test fixtures: a scripted image library and a recording backend.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::decoder::{fit_within, DecodedImage, ImageLibrary};
use crate::error::{CacheError, CacheResult};
use crate::pixels::PixelBuffer;
use crate::render::{RenderBackend, TextureHandle};

/// Poll `condition` until it holds or five seconds pass.
pub(crate) fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}

#[derive(Default)]
struct FakeState {
    /// Source dimensions per known path; unknown paths fail to decode.
    images: HashMap<PathBuf, (u32, u32)>,
    decodes: usize,
    /// Decodes left to fail regardless of path.
    fail_next: usize,
    gate_closed: bool,
}

/// Image library producing solid buffers without touching the disk.
///
/// Clones share state, so a test keeps one clone to script the copy the
/// cache owns. Closing the gate parks the loader inside `decode_and_resize`.
#[derive(Clone, Default)]
pub(crate) struct FakeLibrary {
    state: Arc<(Mutex<FakeState>, Condvar)>,
}

impl FakeLibrary {
    pub(crate) const COLOR: [u8; 4] = [200, 100, 50, 255];

    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_image(self, path: &str, width: u32, height: u32) -> Self {
        self.state.0.lock().images.insert(PathBuf::from(path), (width, height));
        self
    }

    /// Number of decode calls started.
    pub(crate) fn decodes(&self) -> usize {
        self.state.0.lock().decodes
    }

    /// Make the next `count` decodes fail.
    pub(crate) fn fail_next(&self, count: usize) {
        self.state.0.lock().fail_next = count;
    }

    pub(crate) fn close_gate(&self) {
        self.state.0.lock().gate_closed = true;
    }

    pub(crate) fn open_gate(&self) {
        self.state.0.lock().gate_closed = false;
        self.state.1.notify_all();
    }

    fn solid(width: u32, height: u32) -> PixelBuffer {
        let data = Self::COLOR.repeat(width as usize * height as usize);
        PixelBuffer::new(data, width, height)
    }
}

impl ImageLibrary for FakeLibrary {
    fn decode_and_resize(&mut self, path: &Path, max_edge: u32) -> CacheResult<DecodedImage> {
        let (lock, gate) = &*self.state;
        let mut state = lock.lock();
        state.decodes += 1;
        while state.gate_closed {
            gate.wait(&mut state);
        }
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(CacheError::Decode(format!("scripted failure: {}", path.display())));
        }
        let (source_width, source_height) = *state
            .images
            .get(path)
            .ok_or_else(|| CacheError::Decode(format!("no such image: {}", path.display())))?;
        let (w, h) = fit_within(source_width, source_height, max_edge);
        Ok(DecodedImage {
            pixels: Self::solid(w, h),
            source_width,
            source_height,
        })
    }

    fn resize(&mut self, src: &PixelBuffer, max_edge: u32) -> CacheResult<PixelBuffer> {
        let (w, h) = fit_within(src.width, src.height, max_edge);
        Ok(Self::solid(w, h))
    }
}

#[derive(Default)]
struct BackendLog {
    next: u64,
    uploads: Vec<(TextureHandle, (u32, u32))>,
    released: Vec<TextureHandle>,
}

/// Render backend that hands out sequential handles and records calls.
#[derive(Clone, Default)]
pub(crate) struct RecordingBackend {
    log: Arc<Mutex<BackendLog>>,
}

impl RecordingBackend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn uploads(&self) -> usize {
        self.log.lock().uploads.len()
    }

    pub(crate) fn released(&self) -> Vec<TextureHandle> {
        self.log.lock().released.clone()
    }
}

impl RenderBackend for RecordingBackend {
    fn upload(&mut self, pixels: &PixelBuffer) -> CacheResult<TextureHandle> {
        let mut log = self.log.lock();
        log.next += 1;
        let texture = TextureHandle(log.next);
        log.uploads.push((texture, pixels.dimensions()));
        Ok(texture)
    }

    fn release(&mut self, texture: TextureHandle) {
        let mut log = self.log.lock();
        assert!(
            log.uploads.iter().any(|(t, _)| *t == texture),
            "release of unknown {texture}"
        );
        assert!(!log.released.contains(&texture), "double release of {texture}");
        log.released.push(texture);
    }
}
