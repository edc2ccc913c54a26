//! INI parsing logic for converting `Ini` → `EngineConfig`.
//!
//! This is the single place where INI key names are mapped to struct
//! fields. Out-of-range numbers are clamped with a warning; values that do
//! not parse at all are errors.

use std::path::PathBuf;
use std::str::FromStr;

use ini::{Ini, Properties};

use super::defaults::*;
use super::file::ConfigFileError;
use super::settings::EngineConfig;
use super::size::parse_size;

fn invalid(section: &str, key: &str, value: &str, reason: &str) -> ConfigFileError {
    ConfigFileError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_value<T: FromStr>(
    props: &Properties,
    section: &str,
    key: &str,
    reason: &str,
) -> Result<Option<T>, ConfigFileError> {
    props
        .get(key)
        .map(|v| v.trim().parse().map_err(|_| invalid(section, key, v, reason)))
        .transpose()
}

fn parse_bool(props: &Properties, section: &str, key: &str) -> Result<Option<bool>, ConfigFileError> {
    props
        .get(key)
        .map(|v| match v.trim().to_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Ok(true),
            "false" | "no" | "off" | "0" => Ok(false),
            _ => Err(invalid(section, key, v, "must be true or false")),
        })
        .transpose()
}

fn parse_size_value(
    props: &Properties,
    section: &str,
    key: &str,
) -> Result<Option<usize>, ConfigFileError> {
    props
        .get(key)
        .map(|v| {
            parse_size(v).map_err(|_| {
                invalid(section, key, v, "expected format like '256MB', '1GB', or '1024KB'")
            })
        })
        .transpose()
}

/// Expand a leading `~` to the home directory.
pub(super) fn expand_tilde(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(rest),
        None => PathBuf::from(path),
    }
}

/// Parse an `Ini` object into an `EngineConfig`.
///
/// Starts from `EngineConfig::default()` and overlays any values found.
pub(super) fn parse_ini(ini: &Ini) -> Result<EngineConfig, ConfigFileError> {
    let mut config = EngineConfig::default();

    // [geometry] section
    if let Some(section) = ini.section(Some("geometry")) {
        if let Some(v) = parse_value::<f64>(section, "geometry", "epsilon", "must be a positive number")? {
            if !(v.is_finite() && v > 0.0) {
                return Err(invalid("geometry", "epsilon", &v.to_string(), "must be a positive number"));
            }
            config.geometry.epsilon = clamp_setting("epsilon", v, MIN_EPSILON, MAX_EPSILON);
        }
        if let Some(v) = parse_value::<u32>(
            section,
            "geometry",
            "quadrant_segments",
            "must be a positive integer",
        )? {
            config.geometry.quadrant_segments = clamp_setting(
                "quadrant_segments",
                v,
                MIN_QUADRANT_SEGMENTS,
                MAX_QUADRANT_SEGMENTS,
            );
        }
        if let Some(v) = parse_value::<u32>(
            section,
            "geometry",
            "simplify_attempts",
            "must be a positive integer",
        )? {
            config.geometry.simplify_attempts =
                clamp_setting("simplify_attempts", v, 1, MAX_SIMPLIFY_ATTEMPTS);
        }
    }

    // [raster] section
    if let Some(section) = ini.section(Some("raster")) {
        if let Some(v) = parse_value::<usize>(section, "raster", "tile_size", "must be a positive integer")? {
            config.raster.tile_size = clamp_setting("tile_size", v, MIN_TILE_SIZE, MAX_TILE_SIZE);
        }
        if let Some(v) = parse_size_value(section, "raster", "memory_budget")? {
            config.raster.memory_budget =
                clamp_setting("memory_budget", v, MIN_MEMORY_BUDGET, usize::MAX);
        }
        if let Some(v) = parse_value::<usize>(
            section,
            "raster",
            "histogram_buckets",
            "must be a positive integer",
        )? {
            config.raster.histogram_buckets =
                clamp_setting("histogram_buckets", v, 1, MAX_HISTOGRAM_BUCKETS);
        }
        if let Some(v) = section.get("chunk_directory") {
            let v = v.trim();
            config.raster.chunk_directory = (!v.is_empty()).then(|| expand_tilde(v));
        }
    }

    // [cache] section
    if let Some(section) = ini.section(Some("cache")) {
        if let Some(v) = parse_bool(section, "cache", "enabled")? {
            config.cache.enabled = v;
        }
        if let Some(v) = parse_value::<usize>(section, "cache", "capacity", "must be a non-negative integer")? {
            config.cache.capacity = clamp_setting("capacity", v, 0, MAX_CACHE_CAPACITY);
        }
    }

    // [workers] section
    if let Some(section) = ini.section(Some("workers")) {
        if let Some(v) = parse_value::<usize>(
            section,
            "workers",
            "max_concurrent",
            "must be a positive integer",
        )? {
            config.workers.max_concurrent =
                clamp_setting("max_concurrent", v, 1, MAX_CONCURRENT_LIMIT);
        }
        if let Some(v) = parse_bool(section, "workers", "index_prebuild")? {
            config.workers.index_prebuild = v;
        }
    }

    // [logging] section
    if let Some(section) = ini.section(Some("logging")) {
        if let Some(v) = section.get("directory") {
            let v = v.trim();
            if !v.is_empty() {
                config.logging.directory = expand_tilde(v);
            }
        }
        if let Some(v) = section.get("file") {
            let v = v.trim();
            if !v.is_empty() {
                config.logging.file = v.to_string();
            }
        }
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<EngineConfig, ConfigFileError> {
        parse_ini(&Ini::load_from_str(text).unwrap())
    }

    #[test]
    fn test_empty_ini_gives_defaults() {
        assert_eq!(parse("").unwrap(), EngineConfig::default());
    }

    #[test]
    fn test_all_sections() {
        let config = parse(
            r#"
[geometry]
epsilon = 1e-6
quadrant_segments = 16
simplify_attempts = 3

[raster]
tile_size = 512
memory_budget = 64MB
histogram_buckets = 32
chunk_directory = /tmp/chunks

[cache]
enabled = false
capacity = 10

[workers]
max_concurrent = 3
index_prebuild = no

[logging]
file = engine.log
"#,
        )
        .unwrap();
        assert_eq!(config.geometry.epsilon, 1e-6);
        assert_eq!(config.geometry.quadrant_segments, 16);
        assert_eq!(config.geometry.simplify_attempts, 3);
        assert_eq!(config.raster.tile_size, 512);
        assert_eq!(config.raster.memory_budget, 64 * 1024 * 1024);
        assert_eq!(config.raster.histogram_buckets, 32);
        assert_eq!(config.raster.chunk_directory, Some(PathBuf::from("/tmp/chunks")));
        assert!(!config.cache.enabled);
        assert_eq!(config.cache.capacity, 10);
        assert_eq!(config.workers.max_concurrent, 3);
        assert!(!config.workers.index_prebuild);
        assert_eq!(config.logging.file, "engine.log");
    }

    #[test]
    fn test_out_of_range_values_clamped() {
        let config = parse("[raster]\ntile_size = 4\n[workers]\nmax_concurrent = 0\n").unwrap();
        assert_eq!(config.raster.tile_size, MIN_TILE_SIZE);
        assert_eq!(config.workers.max_concurrent, 1);
    }

    #[test]
    fn test_invalid_value_reports_location() {
        let err = parse("[raster]\nmemory_budget = lots\n").unwrap_err();
        match err {
            ConfigFileError::InvalidValue {
                section, key, value, ..
            } => {
                assert_eq!(section, "raster");
                assert_eq!(key, "memory_budget");
                assert_eq!(value, "lots");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_invalid_bool() {
        assert!(matches!(
            parse("[cache]\nenabled = maybe\n"),
            Err(ConfigFileError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_negative_epsilon_rejected() {
        assert!(parse("[geometry]\nepsilon = -1\n").is_err());
    }

    #[test]
    fn test_expand_tilde() {
        assert_eq!(expand_tilde("/abs/path"), PathBuf::from("/abs/path"));
        assert!(expand_tilde("~/x").ends_with("x"));
    }
}
