//! Loader thread: resolves what it can, then loads the most-wanted shot.
//!
//! The cache lock is held for everything except decoding. Decoding runs
//! inside [`MutexGuard::unlocked`] and takes only the library lock; after it
//! returns, every shot field is re-read rather than assumed unchanged, since
//! producers may have submitted or cancelled meanwhile.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use crate::config::{CacheConfig, ExhaustionPolicy};
use crate::decoder::{fit_within, ImageLibrary};
use crate::error::{CacheError, CacheResult};
use crate::eviction::make_room;
use crate::pixels::PixelBuffer;
use crate::shot::{DimensionSource, Resolution, ShotId};
use crate::state::CacheState;

/// State shared between the public API and the loader thread.
pub(crate) struct Shared {
    pub(crate) state: Mutex<CacheState>,
    /// Signalled on submit, cancel and shutdown.
    pub(crate) wake: Condvar,
    pub(crate) library: Mutex<Box<dyn ImageLibrary>>,
    pub(crate) config: CacheConfig,
}

impl Shared {
    pub(crate) fn new(config: CacheConfig, library: Box<dyn ImageLibrary>) -> Self {
        Self {
            state: Mutex::new(CacheState::new()),
            wake: Condvar::new(),
            library: Mutex::new(library),
            config,
        }
    }

    fn capacity(&self, resolution: Resolution) -> usize {
        match resolution {
            Resolution::Low => self.config.low_capacity,
            Resolution::Full => self.config.full_capacity,
        }
    }

    fn max_edge(&self, resolution: Resolution) -> u32 {
        match resolution {
            Resolution::Low => self.config.low_size,
            Resolution::Full => self.config.full_size,
        }
    }
}

/// Spawn the loader thread.
pub(crate) fn spawn(shared: Arc<Shared>) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("shot-cache-loader".into())
        .spawn(move || run(&shared))
}

/// Outcome of one attempt at a shot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Progress {
    Loaded,
    /// Nothing was committed; skip this shot until demand changes.
    Stalled,
}

/// Full-resolution dimensions learned from a load.
#[derive(Debug, Clone, Copy)]
struct Extent {
    dimensions: (u32, u32),
    source: DimensionSource,
}

impl Extent {
    fn placeholder(pixels: &PixelBuffer) -> Self {
        Self {
            dimensions: pixels.dimensions(),
            source: DimensionSource::Placeholder,
        }
    }
}

/// Pixels produced while the cache lock was released.
struct Loaded {
    pixels: PixelBuffer,
    extent: Extent,
    /// Low resolution computed in the same pass.
    low: Option<PixelBuffer>,
    decodes: u64,
    failures: u64,
}

fn run(shared: &Shared) {
    let pad = shared.config.pad_to_power_of_two;
    let mut state = shared.state.lock();
    let mut stalled: HashSet<ShotId> = HashSet::new();
    let mut seen_epoch = state.epoch;
    debug!("loader started");

    loop {
        if state.terminate {
            break;
        }
        if state.epoch != seen_epoch {
            stalled.clear();
            seen_epoch = state.epoch;
        }

        state.resolve_pending(pad);

        let Some(shot_id) = state.most_wanted(&stalled) else {
            shared.wake.wait(&mut state);
            continue;
        };

        match load_shot(shared, &mut state, shot_id) {
            Ok(Progress::Loaded) => {}
            Ok(Progress::Stalled) => {
                stalled.insert(shot_id);
            }
            Err(err) => {
                if let CacheError::CapacityExhausted {
                    resolution,
                    capacity,
                } = err
                {
                    state.exhausted = Some((resolution, capacity));
                }
                error!(shot = %shot_id, error = %err, "loader stopping");
                drop(state);
                panic!("{err}");
            }
        }
    }
    debug!("loader stopped");
}

/// Load whatever `shot_id` is missing, then resolve its requests.
fn load_shot(
    shared: &Shared,
    state: &mut MutexGuard<'_, CacheState>,
    shot_id: ShotId,
) -> CacheResult<Progress> {
    let pad = shared.config.pad_to_power_of_two;
    let mut progress = Progress::Stalled;

    for resolution in [Resolution::Full, Resolution::Low] {
        let Some(shot) = state.shots.get(shot_id) else {
            return Ok(Progress::Stalled);
        };
        if !shot.needs(resolution) {
            continue;
        }
        let path = shot.path.clone();

        if !reserve(shared, state, shot_id, resolution)? {
            continue;
        }

        let loaded = match resolution {
            Resolution::Full => {
                let with_low = state
                    .shots
                    .get(shot_id)
                    .is_some_and(|s| s.low.pixels.is_none())
                    && state.shots.resident_count(Resolution::Low) < shared.capacity(Resolution::Low);
                MutexGuard::unlocked(state, || load_full(shared, shot_id, &path, with_low))
            }
            Resolution::Low => {
                // Resize from the resident full buffer rather than decoding again.
                let full = state
                    .shots
                    .get(shot_id)
                    .and_then(|s| s.full.pixels.clone());
                MutexGuard::unlocked(state, || load_low(shared, shot_id, &path, full))
            }
        };

        state.decodes += loaded.decodes;
        state.decode_failures += loaded.failures;
        let extent = loaded.extent;
        if let Some(low) = loaded.low {
            if commit(shared, state, shot_id, Resolution::Low, low, extent, false) {
                debug!(shot = %shot_id, "kept low resolution from full decode");
            }
        }
        if !commit(shared, state, shot_id, resolution, loaded.pixels, extent, true) {
            continue;
        }
        progress = Progress::Loaded;

        // A full load may already satisfy the low-resolution waiters.
        state.resolve_shot(shot_id, pad);
    }

    Ok(progress)
}

/// Make room for one more `resolution` buffer. `Ok(false)` means the shot
/// has to wait for a cancel.
fn reserve(
    shared: &Shared,
    state: &mut MutexGuard<'_, CacheState>,
    shot_id: ShotId,
    resolution: Resolution,
) -> CacheResult<bool> {
    match make_room(&mut state.shots, resolution, shared.capacity(resolution)) {
        Ok(evicted) => {
            if !evicted.is_empty() {
                let shots: Vec<ShotId> = evicted.iter().map(|e| e.shot).collect();
                debug!(shot = %shot_id, %resolution, evicted = ?shots, "made room");
            }
            state.evictions += evicted.len() as u64;
            state
                .stale_textures
                .extend(evicted.into_iter().filter_map(|e| e.texture));
            Ok(true)
        }
        Err(err @ CacheError::CapacityExhausted { .. }) => match shared.config.exhaustion {
            ExhaustionPolicy::Abort => Err(err),
            ExhaustionPolicy::Wait => {
                warn!(shot = %shot_id, %resolution, "cache full, waiting for a cancel");
                Ok(false)
            }
        },
        Err(err) => Err(err),
    }
}

/// Install a freshly loaded buffer unless the world moved on while the lock
/// was released.
///
/// `required` buffers are dropped when nobody wants them any more; optional
/// ones (a low resolution computed alongside full) are kept while the budget
/// allows.
fn commit(
    shared: &Shared,
    state: &mut MutexGuard<'_, CacheState>,
    shot_id: ShotId,
    resolution: Resolution,
    pixels: PixelBuffer,
    extent: Extent,
    required: bool,
) -> bool {
    let resident = state.shots.resident_count(resolution);
    let CacheState {
        shots,
        stale_textures,
        ..
    } = &mut **state;
    let Some(shot) = shots.get_mut(shot_id) else {
        return false;
    };

    let slot = shot.slot(resolution);
    if slot.pixels.is_some() {
        return false;
    }
    if required && slot.counter == 0 && slot.unprocessed == 0 {
        debug!(shot = %shot_id, %resolution, "discarding load nobody wants");
        return false;
    }
    if resident >= shared.capacity(resolution) {
        debug!(shot = %shot_id, %resolution, "discarding load over budget");
        return false;
    }

    shot.learn_dimensions(extent.dimensions, extent.source);
    let slot = shot.slot_mut(resolution);
    stale_textures.extend(slot.texture.take());
    slot.pixels = Some(pixels);
    true
}

/// Decode `path` at full resolution, optionally deriving low from it.
fn load_full(shared: &Shared, shot_id: ShotId, path: &Path, with_low: bool) -> Loaded {
    let start = Instant::now();
    let mut library = shared.library.lock();
    let full_size = shared.max_edge(Resolution::Full);

    let (pixels, extent, failures) = match library.decode_and_resize(path, full_size) {
        Ok(decoded) => {
            let extent = Extent {
                dimensions: decoded.pixels.dimensions(),
                source: DimensionSource::FullDecode,
            };
            (decoded.pixels, extent, 0)
        }
        Err(err) => {
            warn!(shot = %shot_id, path = %path.display(), error = %err, "decode failed, using placeholder");
            let placeholder = library.placeholder();
            let extent = Extent::placeholder(&placeholder);
            (placeholder, extent, 1)
        }
    };
    let t_decode = start.elapsed();

    let low = with_low.then(|| {
        library
            .resize(&pixels, shared.max_edge(Resolution::Low))
            .unwrap_or_else(|err| {
                warn!(shot = %shot_id, error = %err, "low resize failed, using placeholder");
                library.placeholder()
            })
    });

    if shared.config.timing_enabled() {
        info!(
            shot = %shot_id,
            decode = ?t_decode,
            low = ?(start.elapsed() - t_decode),
            total = ?start.elapsed(),
            "loaded full resolution"
        );
    }

    Loaded {
        pixels,
        extent,
        low,
        decodes: 1,
        failures,
    }
}

/// Produce the low resolution, from `full` when resident, else from disk.
fn load_low(shared: &Shared, shot_id: ShotId, path: &Path, full: Option<PixelBuffer>) -> Loaded {
    let start = Instant::now();
    let mut library = shared.library.lock();
    let low_size = shared.max_edge(Resolution::Low);
    let full_size = shared.max_edge(Resolution::Full);

    let loaded = match full {
        Some(full) => {
            // The full commit already recorded the real dimensions.
            let extent = Extent::placeholder(&full);
            let pixels = library.resize(&full, low_size).unwrap_or_else(|err| {
                warn!(shot = %shot_id, error = %err, "low resize failed, using placeholder");
                library.placeholder()
            });
            Loaded {
                pixels,
                extent,
                low: None,
                decodes: 0,
                failures: 0,
            }
        }
        None => match library.decode_and_resize(path, low_size) {
            Ok(decoded) => Loaded {
                pixels: decoded.pixels,
                extent: Extent {
                    dimensions: fit_within(decoded.source_width, decoded.source_height, full_size),
                    source: DimensionSource::LowDecode,
                },
                low: None,
                decodes: 1,
                failures: 0,
            },
            Err(err) => {
                warn!(shot = %shot_id, path = %path.display(), error = %err, "decode failed, using placeholder");
                let pixels = library.placeholder();
                Loaded {
                    extent: Extent::placeholder(&pixels),
                    pixels,
                    low: None,
                    decodes: 1,
                    failures: 1,
                }
            }
        },
    };

    if shared.config.timing_enabled() {
        info!(shot = %shot_id, total = ?start.elapsed(), "loaded low resolution");
    }
    loaded
}
