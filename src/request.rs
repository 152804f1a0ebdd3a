//! Request table: in-flight requests in a generation-checked arena.

use crate::error::{CacheError, CacheResult};
use crate::pixels::{PixelBuffer, UvRect};
use crate::render::TextureHandle;
use crate::shot::{Demand, Resolution, ShotId};

/// Quality policy of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Quality {
    /// Done once low resolution (or better) is available.
    Low,
    /// Done once full resolution is available.
    Full,
    /// Ready with low resolution, keeps upgrading, done at full.
    Continuous,
}

impl Quality {
    /// Lowest resolution that counts as progress for this policy.
    pub(crate) fn floor(self) -> Resolution {
        match self {
            Quality::Low | Quality::Continuous => Resolution::Low,
            Quality::Full => Resolution::Full,
        }
    }

    /// Resolutions a request with this policy waits for.
    pub(crate) fn claims(self) -> &'static [Resolution] {
        match self {
            Quality::Low => &[Resolution::Low],
            Quality::Full => &[Resolution::Full],
            Quality::Continuous => &[Resolution::Low, Resolution::Full],
        }
    }

    /// Whether `achieved` is terminal for this policy.
    pub(crate) fn is_done(self, achieved: Option<Resolution>) -> bool {
        match self {
            Quality::Low => achieved.is_some(),
            Quality::Full | Quality::Continuous => achieved == Some(Resolution::Full),
        }
    }
}

/// Largest accepted window width or height, in full-resolution pixels.
pub const MAX_WINDOW_EXTENT: f32 = 16384.0;

/// Which pixels of the shot a request wants. Coordinates are in
/// full-resolution pixel space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Content {
    /// The entire image, shared with every other Whole request.
    Whole,
    /// Absolute pixel box `[min, max)`.
    Region { min: [f32; 2], max: [f32; 2] },
    /// Box spanning `center ± half_extent`.
    Centered {
        center: [f32; 2],
        half_extent: [f32; 2],
    },
}

impl Content {
    pub(crate) fn validate(&self) -> CacheResult<()> {
        let Some((min, max)) = self.window() else {
            return Ok(());
        };
        if min.iter().chain(max.iter()).any(|v| !v.is_finite()) {
            return Err(CacheError::InvalidWindow(format!(
                "non-finite coordinates in {self:?}"
            )));
        }
        if max[0] <= min[0] || max[1] <= min[1] {
            return Err(CacheError::InvalidWindow(format!("empty window in {self:?}")));
        }
        if max[0] - min[0] > MAX_WINDOW_EXTENT || max[1] - min[1] > MAX_WINDOW_EXTENT {
            return Err(CacheError::InvalidWindow(format!(
                "window larger than {MAX_WINDOW_EXTENT} pixels in {self:?}"
            )));
        }
        Ok(())
    }

    /// Window bounds in full-resolution space, `None` for [`Content::Whole`].
    pub(crate) fn window(&self) -> Option<([f32; 2], [f32; 2])> {
        match *self {
            Content::Whole => None,
            Content::Region { min, max } => Some((min, max)),
            Content::Centered {
                center,
                half_extent,
            } => Some((
                [center[0] - half_extent[0], center[1] - half_extent[1]],
                [center[0] + half_extent[0], center[1] + half_extent[1]],
            )),
        }
    }
}

/// Handle to a submitted request. Stale after cancel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestHandle {
    index: u32,
    generation: u64,
}

impl RequestHandle {
    fn stale(&self) -> CacheError {
        CacheError::StaleHandle {
            index: self.index,
            generation: self.generation,
        }
    }
}

/// Private cropped copy owned by a Region/Centered request.
#[derive(Debug)]
pub(crate) struct Crop {
    pub(crate) pixels: PixelBuffer,
    pub(crate) quality: Resolution,
    /// Valid copied area inside `pixels`.
    pub(crate) uv: UvRect,
    pub(crate) texture: Option<TextureHandle>,
}

#[derive(Debug)]
pub(crate) struct Request {
    pub(crate) shot: ShotId,
    pub(crate) quality: Quality,
    pub(crate) content: Content,
    pub(crate) achieved: Option<Resolution>,
    pub(crate) done: bool,
    pub(crate) demands: Vec<Demand>,
    pub(crate) crop: Option<Crop>,
}

impl Request {
    pub(crate) fn new(shot: ShotId, quality: Quality, content: Content, demands: Vec<Demand>) -> Self {
        Self {
            shot,
            quality,
            content,
            achieved: None,
            done: false,
            demands,
            crop: None,
        }
    }

    /// Consumer may draw: done, or Continuous with anything achieved.
    pub(crate) fn is_ready(&self) -> bool {
        self.done || (self.quality == Quality::Continuous && self.achieved.is_some())
    }
}

#[derive(Debug)]
struct Entry {
    generation: u64,
    request: Option<Request>,
}

/// Sparse set of live requests with slot reuse.
#[derive(Debug, Default)]
pub(crate) struct RequestTable {
    entries: Vec<Entry>,
    free: Vec<u32>,
    next_generation: u64,
    live: usize,
}

impl RequestTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, request: Request) -> RequestHandle {
        self.next_generation += 1;
        let generation = self.next_generation;
        self.live += 1;

        if let Some(index) = self.free.pop() {
            let entry = &mut self.entries[index as usize];
            debug_assert!(entry.request.is_none());
            entry.generation = generation;
            entry.request = Some(request);
            return RequestHandle { index, generation };
        }

        let index = self.entries.len() as u32;
        self.entries.push(Entry {
            generation,
            request: Some(request),
        });
        RequestHandle { index, generation }
    }

    pub(crate) fn get(&self, handle: RequestHandle) -> CacheResult<&Request> {
        self.entries
            .get(handle.index as usize)
            .filter(|e| e.generation == handle.generation)
            .and_then(|e| e.request.as_ref())
            .ok_or_else(|| handle.stale())
    }

    pub(crate) fn get_mut(&mut self, handle: RequestHandle) -> CacheResult<&mut Request> {
        self.entries
            .get_mut(handle.index as usize)
            .filter(|e| e.generation == handle.generation)
            .and_then(|e| e.request.as_mut())
            .ok_or_else(|| handle.stale())
    }

    /// Take a request out and return its slot to the free list.
    pub(crate) fn remove(&mut self, handle: RequestHandle) -> CacheResult<Request> {
        let entry = self
            .entries
            .get_mut(handle.index as usize)
            .filter(|e| e.generation == handle.generation)
            .ok_or_else(|| handle.stale())?;
        let request = entry.request.take().ok_or_else(|| handle.stale())?;
        self.free.push(handle.index);
        self.live -= 1;
        Ok(request)
    }

    /// Handles of every live request.
    pub(crate) fn handles(&self) -> Vec<RequestHandle> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.request.is_some())
            .map(|(index, e)| RequestHandle {
                index: index as u32,
                generation: e.generation,
            })
            .collect()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Request> {
        self.entries.iter().filter_map(|e| e.request.as_ref())
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Request> {
        self.entries.iter_mut().filter_map(|e| e.request.as_mut())
    }

    pub(crate) fn len(&self) -> usize {
        self.live
    }
}
