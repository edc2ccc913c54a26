//! Default values and limits for every configuration setting.
//!
//! Contains the `DEFAULT_*` constants, CPU-aware helpers and the clamp
//! helpers used by the INI parser.

use tracing::warn;

// =============================================================================
// CPU helpers
// =============================================================================

/// Number of available CPU cores.
pub fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Default request concurrency: one blocking worker per core, minimum 2.
pub fn default_max_concurrent() -> usize {
    num_cpus().max(2)
}

// =============================================================================
// Geometry defaults
// =============================================================================

/// Default coordinate comparison epsilon.
pub const DEFAULT_EPSILON: f64 = crate::geometry::DEFAULT_EPSILON;

pub const MIN_EPSILON: f64 = 1e-15;
pub const MAX_EPSILON: f64 = 1.0;

/// Default disc vertices per quarter turn for buffering.
pub const DEFAULT_QUADRANT_SEGMENTS: u32 = crate::ops::DEFAULT_QUADRANT_SEGMENTS;

pub const MIN_QUADRANT_SEGMENTS: u32 = 1;
pub const MAX_QUADRANT_SEGMENTS: u32 = 64;

/// Default simplification attempts before falling back to the input.
pub const DEFAULT_SIMPLIFY_ATTEMPTS: u32 = crate::ops::DEFAULT_SIMPLIFY_ATTEMPTS;

pub const MAX_SIMPLIFY_ATTEMPTS: u32 = 32;

// =============================================================================
// Raster defaults
// =============================================================================

/// Default tile edge length in cells.
pub const DEFAULT_TILE_SIZE: usize = crate::raster::DEFAULT_TILE_SIZE;

pub const MIN_TILE_SIZE: usize = 16;
pub const MAX_TILE_SIZE: usize = 4096;

/// Default memory budget for single-pass raster reads (256MB).
pub const DEFAULT_MEMORY_BUDGET: usize = 256 * 1024 * 1024;

/// Smallest accepted memory budget (1MB).
pub const MIN_MEMORY_BUDGET: usize = 1024 * 1024;

/// Default histogram bucket count.
pub const DEFAULT_HISTOGRAM_BUCKETS: usize = 64;

pub const MAX_HISTOGRAM_BUCKETS: usize = 4096;

// =============================================================================
// Cache defaults
// =============================================================================

/// Default number of cached results.
pub const DEFAULT_CACHE_CAPACITY: usize = 1024;

pub const MAX_CACHE_CAPACITY: usize = 1_000_000;

// =============================================================================
// Worker defaults
// =============================================================================

pub const MAX_CONCURRENT_LIMIT: usize = 1024;

// =============================================================================
// Logging defaults
// =============================================================================

/// Default log file name.
pub const DEFAULT_LOG_FILE: &str = "gisengine.log";

// =============================================================================
// Clamp helpers
// =============================================================================

/// Clamp `value` into `[min, max]`, logging a warning when it moves.
pub(super) fn clamp_setting<T>(key: &str, value: T, min: T, max: T) -> T
where
    T: PartialOrd + Copy + std::fmt::Display,
{
    if value < min {
        warn!(key, requested = %value, min = %min, "Setting below minimum, clamping to {}", min);
        min
    } else if value > max {
        warn!(key, requested = %value, max = %max, "Setting above maximum, clamping to {}", max);
        max
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_max_concurrent_at_least_two() {
        assert!(default_max_concurrent() >= 2);
    }

    #[test]
    fn test_clamp_setting() {
        assert_eq!(clamp_setting("tile_size", 8, MIN_TILE_SIZE, MAX_TILE_SIZE), MIN_TILE_SIZE);
        assert_eq!(clamp_setting("tile_size", 9000, MIN_TILE_SIZE, MAX_TILE_SIZE), MAX_TILE_SIZE);
        assert_eq!(clamp_setting("tile_size", 512, MIN_TILE_SIZE, MAX_TILE_SIZE), 512);
        assert_eq!(clamp_setting("epsilon", 5.0, MIN_EPSILON, MAX_EPSILON), MAX_EPSILON);
    }
}
