//! Shot registry: per-image cache entries and the demand tokens that keep
//! their counters balanced.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{CacheError, CacheResult};
use crate::pixels::PixelBuffer;
use crate::render::TextureHandle;

/// Stable identifier of a source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShotId(pub u64);

impl fmt::Display for ShotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "shot#{}", self.0)
    }
}

/// A decoded resolution of a shot. `Low < Full`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Resolution {
    Low,
    Full,
}

impl Resolution {
    pub const ALL: [Resolution; 2] = [Resolution::Low, Resolution::Full];
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Low => f.write_str("low"),
            Resolution::Full => f.write_str("full"),
        }
    }
}

/// Where a shot's dimensions came from, ordered from least to most exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub(crate) enum DimensionSource {
    /// Size of a placeholder; only used until a real decode succeeds.
    #[default]
    Placeholder,
    /// Scaled from the source size during a low-resolution decode.
    LowDecode,
    /// Size of a decoded full-resolution buffer.
    FullDecode,
}

/// One resolution of a shot: the shared buffer, its texture, and demand.
#[derive(Debug, Default)]
pub(crate) struct Slot {
    pub(crate) pixels: Option<PixelBuffer>,
    pub(crate) texture: Option<TextureHandle>,
    /// Live Whole requests that need `pixels` to stay resident.
    pub(crate) counter: usize,
    /// Live requests of any content that still wait for this resolution.
    pub(crate) unprocessed: usize,
}

/// A request's outstanding claim on one resolution of a shot.
///
/// Only [`Shot::claim`] creates one and only [`Shot::release`] consumes it,
/// so every counter increment has exactly one matching decrement.
#[must_use]
#[derive(Debug)]
pub(crate) struct Demand {
    resolution: Resolution,
    residency: bool,
    pending: bool,
}

impl Demand {
    pub(crate) fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub(crate) fn is_pending(&self) -> bool {
        self.pending
    }
}

/// Per-image cache entry.
#[derive(Debug)]
pub(crate) struct Shot {
    pub(crate) id: ShotId,
    pub(crate) path: PathBuf,
    pub(crate) low: Slot,
    pub(crate) full: Slot,
    /// Full-resolution dimensions, known after the first decode of either
    /// resolution. All window math is done in this space.
    pub(crate) dimensions: Option<(u32, u32)>,
    pub(crate) dimension_source: DimensionSource,
}

impl Shot {
    fn new(id: ShotId, path: PathBuf) -> Self {
        Self {
            id,
            path,
            low: Slot::default(),
            full: Slot::default(),
            dimensions: None,
            dimension_source: DimensionSource::Placeholder,
        }
    }

    /// Record dimensions unless better ones are already known.
    pub(crate) fn learn_dimensions(&mut self, dimensions: (u32, u32), source: DimensionSource) {
        if self.dimensions.is_none() || source > self.dimension_source {
            self.dimensions = Some(dimensions);
            self.dimension_source = source;
        }
    }

    pub(crate) fn slot(&self, resolution: Resolution) -> &Slot {
        match resolution {
            Resolution::Low => &self.low,
            Resolution::Full => &self.full,
        }
    }

    pub(crate) fn slot_mut(&mut self, resolution: Resolution) -> &mut Slot {
        match resolution {
            Resolution::Low => &mut self.low,
            Resolution::Full => &mut self.full,
        }
    }

    pub(crate) fn resident(&self, resolution: Resolution) -> Option<&PixelBuffer> {
        self.slot(resolution).pixels.as_ref()
    }

    /// Total demand still waiting on this shot.
    pub(crate) fn unprocessed_total(&self) -> usize {
        self.low.unprocessed + self.full.unprocessed
    }

    /// Someone waits for `resolution` and it is not resident.
    pub(crate) fn needs(&self, resolution: Resolution) -> bool {
        let slot = self.slot(resolution);
        slot.unprocessed > 0 && slot.pixels.is_none()
    }

    /// Nobody holds or waits for `resolution`, so its buffer may be freed.
    pub(crate) fn evictable(&self, resolution: Resolution) -> bool {
        let slot = self.slot(resolution);
        slot.pixels.is_some() && slot.counter == 0 && slot.unprocessed == 0
    }

    /// Register demand for `resolution`. With `residency` the caller binds
    /// the shared buffer and keeps it from being evicted until release.
    pub(crate) fn claim(&mut self, resolution: Resolution, residency: bool) -> Demand {
        let slot = self.slot_mut(resolution);
        if residency {
            slot.counter += 1;
        }
        slot.unprocessed += 1;
        Demand {
            resolution,
            residency,
            pending: true,
        }
    }

    /// Mark a demand as satisfied. Idempotent.
    pub(crate) fn settle(&mut self, demand: &mut Demand) {
        if !demand.is_pending() {
            return;
        }
        let slot = self.slot_mut(demand.resolution);
        debug_assert!(slot.unprocessed > 0, "unprocessed underflow on {}", demand.resolution);
        slot.unprocessed = slot.unprocessed.saturating_sub(1);
        demand.pending = false;
    }

    /// Drop a demand. Returns the shared texture once the last residency
    /// claim on that resolution goes away; the caller must release it.
    pub(crate) fn release(&mut self, mut demand: Demand) -> Option<TextureHandle> {
        self.settle(&mut demand);
        if !demand.residency {
            return None;
        }
        let slot = self.slot_mut(demand.resolution);
        debug_assert!(slot.counter > 0, "counter underflow on {}", demand.resolution);
        slot.counter = slot.counter.saturating_sub(1);
        if slot.counter == 0 {
            slot.texture.take()
        } else {
            None
        }
    }
}

/// All shots known to the cache, ordered by id.
#[derive(Debug, Default)]
pub(crate) struct ShotRegistry {
    shots: BTreeMap<ShotId, Shot>,
}

impl ShotRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Look up a shot, creating it on first use. The path is fixed once set.
    pub(crate) fn get_or_insert(&mut self, id: ShotId, path: &Path) -> CacheResult<&mut Shot> {
        let shot = self
            .shots
            .entry(id)
            .or_insert_with(|| Shot::new(id, path.to_path_buf()));
        if shot.path != path {
            return Err(CacheError::PathMismatch {
                shot: id,
                existing: shot.path.clone(),
                requested: path.to_path_buf(),
            });
        }
        Ok(shot)
    }

    pub(crate) fn get(&self, id: ShotId) -> Option<&Shot> {
        self.shots.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: ShotId) -> Option<&mut Shot> {
        self.shots.get_mut(&id)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Shot> {
        self.shots.values()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Shot> {
        self.shots.values_mut()
    }

    /// Number of shots with `resolution` resident.
    pub(crate) fn resident_count(&self, resolution: Resolution) -> usize {
        self.shots
            .values()
            .filter(|s| s.resident(resolution).is_some())
            .count()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.shots.len()
    }
}
