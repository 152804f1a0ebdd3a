//! Resolver: satisfy a request from whatever its shot already holds.
//!
//! Runs under the cache lock, both on the submitting thread and on the loader
//! thread. A request's achieved quality only ever goes up.

use tracing::warn;

use crate::pixels::{crop_copy, PixelRect};
use crate::render::TextureHandle;
use crate::request::{Content, Crop, Quality, Request};
use crate::shot::{Resolution, Shot};

/// Try to improve `request` from the buffers resident on `shot`.
///
/// Returns `true` when the achieved quality went up. Textures of replaced
/// private crops are pushed to `stale_textures` for the render side to free.
pub(crate) fn resolve(
    request: &mut Request,
    shot: &mut Shot,
    pad_to_power_of_two: bool,
    stale_textures: &mut Vec<TextureHandle>,
) -> bool {
    debug_assert_eq!(request.shot, shot.id);
    if request.done {
        return false;
    }
    match request.content {
        Content::Whole => resolve_whole(request, shot),
        Content::Region { .. } | Content::Centered { .. } => {
            resolve_window(request, shot, pad_to_power_of_two, stale_textures)
        }
    }
}

/// Bind the shared buffer. Low binds only the low buffer so that every Low
/// request shares one texture.
fn resolve_whole(request: &mut Request, shot: &mut Shot) -> bool {
    let candidates: &[Resolution] = match request.quality {
        Quality::Low => &[Resolution::Low],
        Quality::Full => &[Resolution::Full],
        Quality::Continuous => &[Resolution::Full, Resolution::Low],
    };
    let Some(resolution) = candidates
        .iter()
        .copied()
        .find(|&r| Some(r) > request.achieved && shot.resident(r).is_some())
    else {
        return false;
    };
    achieve(request, shot, resolution);
    true
}

/// Copy the requested window out of the best resident buffer.
fn resolve_window(
    request: &mut Request,
    shot: &mut Shot,
    pad_to_power_of_two: bool,
    stale_textures: &mut Vec<TextureHandle>,
) -> bool {
    let floor = request.quality.floor();
    let Some(resolution) = [Resolution::Full, Resolution::Low]
        .into_iter()
        .filter(|&r| r >= floor)
        .find(|&r| Some(r) > request.achieved && shot.resident(r).is_some())
    else {
        return false;
    };
    debug_assert!(
        shot.dimensions.is_some(),
        "{} has a resident buffer but no dimensions",
        shot.id
    );
    let (Some((shot_w, shot_h)), Some((min, max))) = (shot.dimensions, request.content.window())
    else {
        return false;
    };
    let Some(src) = shot.resident(resolution) else {
        return false;
    };

    // Shot space is full-resolution pixels; rescale into the source buffer.
    let sx = src.width as f32 / shot_w as f32;
    let sy = src.height as f32 / shot_h as f32;
    let window = PixelRect::new(
        (min[0] * sx).floor() as i64,
        (min[1] * sy).floor() as i64,
        (max[0] * sx).ceil() as i64,
        (max[1] * sy).ceil() as i64,
    );
    let (pixels, uv) = match crop_copy(src, window, pad_to_power_of_two) {
        Ok(crop) => crop,
        Err(err) => {
            warn!(shot = %shot.id, %resolution, error = %err, "window not cropped");
            return false;
        }
    };

    let previous = request.crop.replace(Crop {
        pixels,
        quality: resolution,
        uv,
        texture: None,
    });
    if let Some(old) = previous {
        debug_assert!(old.quality < resolution);
        stale_textures.extend(old.texture);
    }

    achieve(request, shot, resolution);
    true
}

/// Record a new achieved quality and settle every stage it covers.
fn achieve(request: &mut Request, shot: &mut Shot, resolution: Resolution) {
    debug_assert!(Some(resolution) > request.achieved);
    request.achieved = Some(resolution);
    for demand in request.demands.iter_mut() {
        if demand.resolution() <= resolution {
            shot.settle(demand);
        }
    }
    request.done = request.quality.is_done(request.achieved);
}
