//! Cache state guarded by the cache lock: shots, requests, and counters.

use std::collections::HashSet;
use std::path::Path;

use tracing::debug;

use crate::error::CacheResult;
use crate::render::TextureHandle;
use crate::request::{Content, Quality, Request, RequestHandle, RequestTable};
use crate::resolver::resolve;
use crate::shot::{Resolution, ShotId, ShotRegistry};

/// Snapshot of cache occupancy and loader activity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub resident_low: usize,
    pub resident_full: usize,
    pub live_requests: usize,
    /// Live requests not yet done.
    pub pending_requests: usize,
    /// Decode calls made by the loader, successful or not.
    pub decodes: u64,
    pub decode_failures: u64,
    pub evictions: u64,
    /// Requests resolved inside `submit` without waiting for the loader.
    pub sync_resolutions: u64,
}

/// Everything the cache lock protects.
#[derive(Debug, Default)]
pub(crate) struct CacheState {
    pub(crate) shots: ShotRegistry,
    pub(crate) requests: RequestTable,
    /// Textures that went stale off the render thread; released on the next
    /// render-side call.
    pub(crate) stale_textures: Vec<TextureHandle>,
    /// Bumped on every submit and cancel so a stalled loader re-examines shots.
    pub(crate) epoch: u64,
    pub(crate) terminate: bool,
    /// Set when the loader stopped on capacity exhaustion.
    pub(crate) exhausted: Option<(Resolution, usize)>,
    pub(crate) decodes: u64,
    pub(crate) decode_failures: u64,
    pub(crate) evictions: u64,
    pub(crate) sync_resolutions: u64,
}

impl CacheState {
    pub(crate) fn new() -> Self {
        Self {
            shots: ShotRegistry::new(),
            requests: RequestTable::new(),
            ..Self::default()
        }
    }

    /// Register a request and try to satisfy it immediately.
    pub(crate) fn submit(
        &mut self,
        shot_id: ShotId,
        path: &Path,
        quality: Quality,
        content: Content,
        pad_to_power_of_two: bool,
    ) -> CacheResult<RequestHandle> {
        content.validate()?;
        let shot = self.shots.get_or_insert(shot_id, path)?;

        // Whole requests share the shot's buffer and keep it resident; window
        // requests get a private copy and only wait for the load.
        let residency = content == Content::Whole;
        let demands = quality
            .claims()
            .iter()
            .map(|&r| shot.claim(r, residency))
            .collect();
        let mut request = Request::new(shot_id, quality, content, demands);

        let resolved = resolve(
            &mut request,
            shot,
            pad_to_power_of_two,
            &mut self.stale_textures,
        );
        if resolved {
            self.sync_resolutions += 1;
        }
        debug!(
            shot = %shot_id,
            ?quality,
            ?content,
            achieved = ?request.achieved,
            "submitted request"
        );

        let handle = self.requests.insert(request);
        self.epoch += 1;
        Ok(handle)
    }

    /// Remove a request, drop its demand, and collect every texture that is
    /// no longer referenced.
    pub(crate) fn cancel(&mut self, handle: RequestHandle) -> CacheResult<Vec<TextureHandle>> {
        let request = self.requests.remove(handle)?;
        let mut textures = Vec::new();

        debug_assert!(
            self.shots.get(request.shot).is_some(),
            "request references unknown {}",
            request.shot
        );
        if let Some(shot) = self.shots.get_mut(request.shot) {
            for demand in request.demands {
                textures.extend(shot.release(demand));
            }
        }
        if let Some(crop) = request.crop {
            textures.extend(crop.texture);
        }

        debug!(shot = %request.shot, released = textures.len(), "cancelled request");
        self.epoch += 1;
        Ok(textures)
    }

    /// Resolve every unfinished request whose shot has something new.
    pub(crate) fn resolve_pending(&mut self, pad_to_power_of_two: bool) -> usize {
        self.resolve_where(pad_to_power_of_two, |_| true)
    }

    /// Resolve unfinished requests for one shot.
    pub(crate) fn resolve_shot(&mut self, shot_id: ShotId, pad_to_power_of_two: bool) -> usize {
        self.resolve_where(pad_to_power_of_two, |r| r.shot == shot_id)
    }

    fn resolve_where(&mut self, pad_to_power_of_two: bool, filter: impl Fn(&Request) -> bool) -> usize {
        let Self {
            shots,
            requests,
            stale_textures,
            ..
        } = self;
        let mut resolved = 0;
        for request in requests.iter_mut().filter(|r| !r.done && filter(r)) {
            let Some(shot) = shots.get_mut(request.shot) else {
                continue;
            };
            if resolve(request, shot, pad_to_power_of_two, stale_textures) {
                resolved += 1;
            }
        }
        resolved
    }

    /// The shot with the most unresolved demand, first found on ties.
    pub(crate) fn most_wanted(&self, skip: &HashSet<ShotId>) -> Option<ShotId> {
        let mut best: Option<(ShotId, usize)> = None;
        for shot in self.shots.iter() {
            let demand = shot.unprocessed_total();
            if demand == 0 || skip.contains(&shot.id) {
                continue;
            }
            match best {
                Some((_, d)) if demand <= d => {}
                _ => best = Some((shot.id, demand)),
            }
        }
        best.map(|(id, _)| id)
    }

    pub(crate) fn stats(&self) -> CacheStats {
        CacheStats {
            resident_low: self.shots.resident_count(Resolution::Low),
            resident_full: self.shots.resident_count(Resolution::Full),
            live_requests: self.requests.len(),
            pending_requests: self.requests.iter().filter(|r| !r.done).count(),
            decodes: self.decodes,
            decode_failures: self.decode_failures,
            evictions: self.evictions,
            sync_resolutions: self.sync_resolutions,
        }
    }
}
