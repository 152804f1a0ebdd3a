//! Cache configuration loaded from JSON.

use std::path::Path;

use serde::Deserialize;

use crate::error::{CacheError, CacheResult};

/// What the loader does when a resolution is at capacity and every resident
/// buffer of that resolution is still wanted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExhaustionPolicy {
    /// Treat it as a capacity-planning bug: record the failure and stop the
    /// loader thread.
    #[default]
    Abort,
    /// Leave the shot unloaded until a cancel frees a slot.
    Wait,
}

/// Budgets and sizes for the cache.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of resident low-resolution buffers.
    pub low_capacity: usize,
    /// Maximum number of resident full-resolution buffers.
    pub full_capacity: usize,
    /// Longest edge of a low-resolution buffer, in pixels.
    pub low_size: u32,
    /// Longest edge of a full-resolution buffer, in pixels.
    pub full_size: u32,
    pub exhaustion: ExhaustionPolicy,
    /// Round private crop buffers up to power-of-two extents.
    pub pad_to_power_of_two: bool,
    /// Log a timing breakdown for every load.
    pub load_timing: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            low_capacity: 64,
            full_capacity: 4,
            low_size: 256,
            full_size: 2048,
            exhaustion: ExhaustionPolicy::Abort,
            pad_to_power_of_two: false,
            load_timing: false,
        }
    }
}

impl CacheConfig {
    /// Load configuration from a JSON file. Missing keys take their defaults.
    pub fn load(path: &Path) -> CacheResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: CacheConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CacheResult<()> {
        if self.low_capacity == 0 || self.full_capacity == 0 {
            return Err(CacheError::Config(
                "low_capacity and full_capacity must be at least 1".into(),
            ));
        }
        if self.low_size == 0 || self.full_size == 0 {
            return Err(CacheError::Config(
                "low_size and full_size must be positive".into(),
            ));
        }
        if self.low_size > self.full_size {
            return Err(CacheError::Config(format!(
                "low_size ({}) exceeds full_size ({})",
                self.low_size, self.full_size
            )));
        }
        Ok(())
    }

    /// Whether per-load timing is on, either here or via `SHOT_CACHE_TIMING`.
    pub(crate) fn timing_enabled(&self) -> bool {
        self.load_timing
            || std::env::var("SHOT_CACHE_TIMING").is_ok_and(|v| v == "1" || v == "true")
    }
}
