//! INI serialization logic for converting `EngineConfig` → INI string.
//!
//! This module contains the `to_config_string()` function that produces
//! the commented INI representation written to `config.ini`.

use std::path::Path;

use super::settings::EngineConfig;
use super::size::format_size;

/// Convert an `EngineConfig` to a commented INI string for saving.
pub(super) fn to_config_string(config: &EngineConfig) -> String {
    let chunk_directory = config
        .raster
        .chunk_directory
        .as_ref()
        .map(|p| path_to_string(p))
        .unwrap_or_default();

    format!(
        r#"[geometry]
; Coordinate comparison epsilon; coordinates closer than this are equal
epsilon = {}
; Vertices per quarter circle when approximating buffer arcs (1-64)
quadrant_segments = {}
; Simplification retries with a halved tolerance before returning the input
simplify_attempts = {}

[raster]
; Tile edge length in cells (16-4096)
tile_size = {}
; Memory a single raster pass may hold in tiles (e.g., 256MB, 1GB)
memory_budget = {}
; Histogram buckets used when a request does not specify them
histogram_buckets = {}
; Directory for persistent raster chunks (empty = keep tiles in memory)
chunk_directory = {}

[cache]
; Reuse results of identical operations on unchanged inputs
enabled = {}
; Maximum number of stored results
capacity = {}

[workers]
; Requests executing at once; further requests wait in a queue
max_concurrent = {}
; Rebuild spatial indexes in the background after each edit
index_prebuild = {}

[logging]
; Directory for the log file
directory = {}
; Log file name
file = {}
"#,
        config.geometry.epsilon,
        config.geometry.quadrant_segments,
        config.geometry.simplify_attempts,
        config.raster.tile_size,
        format_size(config.raster.memory_budget),
        config.raster.histogram_buckets,
        chunk_directory,
        config.cache.enabled,
        config.cache.capacity,
        config.workers.max_concurrent,
        config.workers.index_prebuild,
        path_to_string(&config.logging.directory),
        config.logging.file,
    )
}

/// Render a path, collapsing the home directory to `~`.
fn path_to_string(path: &Path) -> String {
    if let Some(home) = dirs::home_dir() {
        if let Ok(rest) = path.strip_prefix(&home) {
            return format!("~/{}", rest.display());
        }
    }
    path.display().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineConfig, GeometrySettings};

    #[test]
    fn test_every_section_written() {
        let text = to_config_string(&EngineConfig::default());
        for section in ["[geometry]", "[raster]", "[cache]", "[workers]", "[logging]"] {
            assert!(text.contains(section), "missing {section}");
        }
        assert!(text.contains("memory_budget = 256MB"));
        assert!(text.contains("chunk_directory = \n"));
    }

    #[test]
    fn test_written_text_parses_back() {
        let config = EngineConfig::default()
            .with_geometry(GeometrySettings::default().with_epsilon(1e-7).with_quadrant_segments(4));
        let text = to_config_string(&config);
        let parsed = EngineConfig::from_ini_str(&text).unwrap();
        assert_eq!(parsed.geometry, config.geometry);
        assert_eq!(parsed.raster, config.raster);
    }
}
