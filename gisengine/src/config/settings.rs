//! Configuration structs, one per concern.

use std::path::PathBuf;

use super::defaults::*;
use crate::geometry::Tolerance;
use crate::raster::tiles_for_budget;

/// Complete engine configuration, as loaded from `config.ini`.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub geometry: GeometrySettings,
    pub raster: RasterSettings,
    pub cache: CacheSettings,
    pub workers: WorkerSettings,
    pub logging: LoggingSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            geometry: GeometrySettings::default(),
            raster: RasterSettings::default(),
            cache: CacheSettings::default(),
            workers: WorkerSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl EngineConfig {
    pub fn with_geometry(mut self, geometry: GeometrySettings) -> Self {
        self.geometry = geometry;
        self
    }

    pub fn with_raster(mut self, raster: RasterSettings) -> Self {
        self.raster = raster;
        self
    }

    pub fn with_cache(mut self, cache: CacheSettings) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_workers(mut self, workers: WorkerSettings) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_logging(mut self, logging: LoggingSettings) -> Self {
        self.logging = logging;
        self
    }
}

/// `[geometry]` section.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeometrySettings {
    /// Coordinate comparison epsilon
    pub epsilon: f64,
    /// Disc vertices per quarter turn for buffering
    pub quadrant_segments: u32,
    /// Simplification retries before falling back to the input
    pub simplify_attempts: u32,
}

impl Default for GeometrySettings {
    fn default() -> Self {
        Self {
            epsilon: DEFAULT_EPSILON,
            quadrant_segments: DEFAULT_QUADRANT_SEGMENTS,
            simplify_attempts: DEFAULT_SIMPLIFY_ATTEMPTS,
        }
    }
}

impl GeometrySettings {
    pub fn tolerance(&self) -> Tolerance {
        Tolerance(self.epsilon)
    }

    pub fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }

    pub fn with_quadrant_segments(mut self, segments: u32) -> Self {
        self.quadrant_segments = segments;
        self
    }

    pub fn with_simplify_attempts(mut self, attempts: u32) -> Self {
        self.simplify_attempts = attempts;
        self
    }
}

/// `[raster]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterSettings {
    /// Tile edge length in cells
    pub tile_size: usize,
    /// Bytes a single-pass read may hold in tiles
    pub memory_budget: usize,
    /// Histogram buckets when the caller does not choose
    pub histogram_buckets: usize,
    /// Directory for a persistent chunk store; `None` keeps tiles in memory
    pub chunk_directory: Option<PathBuf>,
}

impl Default for RasterSettings {
    fn default() -> Self {
        Self {
            tile_size: DEFAULT_TILE_SIZE,
            memory_budget: DEFAULT_MEMORY_BUDGET,
            histogram_buckets: DEFAULT_HISTOGRAM_BUCKETS,
            chunk_directory: None,
        }
    }
}

impl RasterSettings {
    /// Memory budget expressed in tiles of `tile_size`.
    pub fn budget_tiles(&self) -> usize {
        tiles_for_budget(self.memory_budget as u64, self.tile_size)
    }

    pub fn with_tile_size(mut self, tile_size: usize) -> Self {
        self.tile_size = tile_size;
        self
    }

    pub fn with_memory_budget(mut self, bytes: usize) -> Self {
        self.memory_budget = bytes;
        self
    }

    pub fn with_histogram_buckets(mut self, buckets: usize) -> Self {
        self.histogram_buckets = buckets;
        self
    }

    pub fn with_chunk_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.chunk_directory = Some(dir.into());
        self
    }
}

/// `[cache]` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSettings {
    pub enabled: bool,
    /// Maximum stored results
    pub capacity: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl CacheSettings {
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }
}

/// `[workers]` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSettings {
    /// Requests executing at once; further requests queue
    pub max_concurrent: usize,
    /// Rebuild spatial indexes in the background after each publish
    pub index_prebuild: bool,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            index_prebuild: true,
        }
    }
}

impl WorkerSettings {
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    pub fn with_index_prebuild(mut self, prebuild: bool) -> Self {
        self.index_prebuild = prebuild;
        self
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingSettings {
    pub directory: PathBuf,
    pub file: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            directory: super::file::config_directory().join("logs"),
            file: DEFAULT_LOG_FILE.to_string(),
        }
    }
}
