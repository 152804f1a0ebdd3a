//! Error types for shot_cache.

use std::path::PathBuf;

use thiserror::Error;

use crate::shot::{Resolution, ShotId};

/// Error types for cache operations.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Stale request handle: index={index}, generation={generation}")]
    StaleHandle { index: u32, generation: u64 },

    #[error("Request is not ready yet")]
    NotReady,

    #[error("Invalid content window: {0}")]
    InvalidWindow(String),

    #[error("Shot {shot} already bound to {existing}, not {requested}")]
    PathMismatch {
        shot: ShotId,
        existing: PathBuf,
        requested: PathBuf,
    },

    #[error(
        "No evictable {resolution} buffer with {capacity} slot(s) in use; \
         cache capacity is too small for the concurrent working set"
    )]
    CapacityExhausted {
        resolution: Resolution,
        capacity: usize,
    },

    #[error("Loader thread panicked")]
    WorkerPanicked,

    #[error("Failed to decode image: {0}")]
    Decode(String),

    #[error("Texture upload failed: {0}")]
    Render(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;
