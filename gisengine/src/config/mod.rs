//! Engine configuration.
//!
//! Configuration lives in `~/.gisengine/config.ini` and is grouped into one
//! struct per concern:
//!
//! - [`GeometrySettings`]: epsilon, buffer segments, simplify retries
//! - [`RasterSettings`]: tile size, memory budget, chunk directory
//! - [`CacheSettings`]: result cache switch and capacity
//! - [`WorkerSettings`]: request concurrency and index prebuild
//! - [`LoggingSettings`]: log directory and file
//!
//! Missing keys fall back to the `DEFAULT_*` constants; out-of-range numbers
//! are clamped with a warning.
//!
//! # Example
//!
//! ```
//! use gisengine::config::EngineConfig;
//!
//! let config = EngineConfig::from_ini_str("[raster]\ntile_size = 512\n").unwrap();
//! assert_eq!(config.raster.tile_size, 512);
//! assert!(config.cache.enabled);
//! ```

mod defaults;
mod file;
mod parser;
mod settings;
mod size;
mod writer;

pub use defaults::*;
pub use file::{config_directory, config_file_path, ConfigFileError};
pub use settings::{
    CacheSettings, EngineConfig, GeometrySettings, LoggingSettings, RasterSettings, WorkerSettings,
};
pub use size::{format_size, parse_size, SizeParseError};
