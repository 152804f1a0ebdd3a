//! Eviction policy: free a buffer nobody holds once a resolution is at budget.

use tracing::debug;

use crate::error::{CacheError, CacheResult};
use crate::render::TextureHandle;
use crate::shot::{Resolution, ShotId, ShotRegistry};

/// A buffer freed by eviction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Evicted {
    pub(crate) shot: ShotId,
    /// Texture left on the slot, to be released on the render side.
    pub(crate) texture: Option<TextureHandle>,
}

/// Free the first shot (by id) whose `resolution` buffer has no counter and
/// no pending demand.
///
/// Only the pixel buffer goes; shared textures are released when their
/// counter drops to zero. Finding nothing to evict means the configured
/// capacity is smaller than the working set.
pub(crate) fn evict(
    shots: &mut ShotRegistry,
    resolution: Resolution,
    capacity: usize,
) -> CacheResult<Evicted> {
    let Some(shot) = shots.iter_mut().find(|s| s.evictable(resolution)) else {
        return Err(CacheError::CapacityExhausted {
            resolution,
            capacity,
        });
    };
    let slot = shot.slot_mut(resolution);
    slot.pixels = None;
    let texture = slot.texture.take();
    debug!(shot = %shot.id, %resolution, "evicted buffer");
    Ok(Evicted {
        shot: shot.id,
        texture,
    })
}

/// Evict until one more `resolution` buffer fits in `capacity`.
pub(crate) fn make_room(
    shots: &mut ShotRegistry,
    resolution: Resolution,
    capacity: usize,
) -> CacheResult<Vec<Evicted>> {
    let mut evicted = Vec::new();
    while shots.resident_count(resolution) >= capacity {
        evicted.push(evict(shots, resolution, capacity)?);
    }
    Ok(evicted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    use crate::pixels::PixelBuffer;

    fn registry(n: u64) -> ShotRegistry {
        let mut registry = ShotRegistry::new();
        for id in 1..=n {
            let path = format!("/{id}.jpg");
            let shot = registry.get_or_insert(ShotId(id), Path::new(&path)).unwrap();
            shot.full.pixels = Some(PixelBuffer::zeroed(2, 2));
            shot.dimensions = Some((2, 2));
        }
        registry
    }

    #[test]
    fn test_evicts_first_unreferenced() {
        let mut shots = registry(3);
        let _held = shots.get_mut(ShotId(1)).unwrap().claim(Resolution::Full, true);

        let evicted = evict(&mut shots, Resolution::Full, 3).unwrap();
        assert_eq!(evicted.shot, ShotId(2));
        assert!(shots.get(ShotId(1)).unwrap().full.pixels.is_some());
        assert!(shots.get(ShotId(2)).unwrap().full.pixels.is_none());
    }

    #[test]
    fn test_exhausted_when_everything_held() {
        let mut shots = registry(2);
        let _a = shots.get_mut(ShotId(1)).unwrap().claim(Resolution::Full, true);
        let _b = shots.get_mut(ShotId(2)).unwrap().claim(Resolution::Full, true);

        let result = evict(&mut shots, Resolution::Full, 2);
        assert!(matches!(
            result,
            Err(CacheError::CapacityExhausted {
                resolution: Resolution::Full,
                capacity: 2
            })
        ));
        assert_eq!(shots.resident_count(Resolution::Full), 2);
    }

    #[test]
    fn test_pending_demand_blocks_eviction() {
        let mut shots = registry(1);
        let _pending = shots.get_mut(ShotId(1)).unwrap().claim(Resolution::Full, false);
        assert!(evict(&mut shots, Resolution::Full, 1).is_err());
    }

    #[test]
    fn test_eviction_keeps_other_resolution() {
        let mut shots = registry(1);
        let shot = shots.get_mut(ShotId(1)).unwrap();
        shot.low.pixels = Some(PixelBuffer::zeroed(1, 1));

        evict(&mut shots, Resolution::Full, 1).unwrap();
        let shot = shots.get(ShotId(1)).unwrap();
        assert!(shot.low.pixels.is_some());
        assert_eq!(shot.dimensions, Some((2, 2)));
    }

    #[test]
    fn test_make_room_evicts_down_to_capacity() {
        let mut shots = registry(3);
        let evicted = make_room(&mut shots, Resolution::Full, 2).unwrap();
        assert_eq!(evicted.len(), 2);
        assert_eq!(shots.resident_count(Resolution::Full), 1);

        // Already has room
        assert!(make_room(&mut shots, Resolution::Full, 2).unwrap().is_empty());
    }

    #[test]
    fn test_eviction_only_targets_zero_counters() {
        // Random submit/release interleavings: whenever eviction picks a
        // shot, that shot's counter is zero.
        let mut shots = registry(4);
        let mut held = Vec::new();
        let mut seed: u64 = 0x9E37_79B9_7F4A_7C15;
        for _ in 0..500 {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            let id = ShotId(seed % 4 + 1);
            match seed % 3 {
                0 => {
                    let demand = shots.get_mut(id).unwrap().claim(Resolution::Full, true);
                    held.push((id, demand));
                }
                1 if !held.is_empty() => {
                    let (id, demand) = held.swap_remove((seed as usize / 3) % held.len());
                    let _ = shots.get_mut(id).unwrap().release(demand);
                }
                _ => {
                    if let Ok(evicted) = evict(&mut shots, Resolution::Full, 4) {
                        let shot = shots.get_mut(evicted.shot).unwrap();
                        assert_eq!(shot.full.counter, 0);
                        shot.full.pixels = Some(PixelBuffer::zeroed(2, 2));
                    }
                }
            }
        }
        for (id, demand) in held {
            let _ = shots.get_mut(id).unwrap().release(demand);
        }
    }
}
