//! CLI error handling with user-friendly messages.
//!
//! Centralizes error handling for the CLI, providing consistent formatting
//! and appropriate exit codes.

use std::fmt;
use std::path::PathBuf;
use std::process;

use gisengine::config::ConfigFileError;
use gisengine::EngineError;

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(String),
    /// Configuration file could not be loaded
    Config(ConfigFileError),
    /// Failed to start the async runtime
    Runtime(std::io::Error),
    /// Failed to read an input file
    FileRead { path: PathBuf, error: std::io::Error },
    /// Engine rejected the request
    Engine(EngineError),
}

impl CliError {
    /// Process exit code for this error.
    ///
    /// - 1: runtime or I/O failure
    /// - 2: configuration problem
    /// - 3: input could not be parsed or is not a usable geometry
    /// - 4: CRS could not be resolved or operands do not match
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Config(_) | CliError::Engine(EngineError::Config(_)) => 2,
            CliError::Engine(EngineError::Codec(_))
            | CliError::Engine(EngineError::Validation { .. })
            | CliError::Engine(EngineError::InvalidInput(_)) => 3,
            CliError::Engine(EngineError::UnsupportedCrs(_))
            | CliError::Engine(EngineError::DimensionMismatch(_)) => 4,
            _ => 1,
        }
    }

    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        match self {
            CliError::Engine(EngineError::UnsupportedCrs(_)) => {
                eprintln!();
                eprintln!("Built-in CRS identifiers:");
                eprintln!("  EPSG:4326  WGS84 longitude/latitude");
                eprintln!("  EPSG:3857  Web Mercator");
                eprintln!("  EPSG:326zz / EPSG:327zz  UTM zone zz (north/south)");
            }
            CliError::Engine(EngineError::Codec(_)) => {
                eprintln!();
                eprintln!("Input must be WKT, EWKT, hex-encoded WKB, or a GeoJSON geometry/Feature.");
            }
            CliError::Config(_) => {
                eprintln!();
                eprintln!("Check the file passed with --config (default: ~/.gisengine/config.ini).");
                eprintln!("Run 'gisengine config init --config <path>' to write a fresh default file.");
            }
            _ => {}
        }

        process::exit(self.exit_code())
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {}", msg),
            CliError::Config(e) => write!(f, "Configuration error: {}", e),
            CliError::Runtime(e) => write!(f, "Failed to start runtime: {}", e),
            CliError::FileRead { path, error } => {
                write!(f, "Failed to read file '{}': {}", path.display(), error)
            }
            CliError::Engine(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Config(e) => Some(e),
            CliError::Runtime(e) => Some(e),
            CliError::FileRead { error, .. } => Some(error),
            CliError::Engine(e) => Some(e),
            CliError::LoggingInit(_) => None,
        }
    }
}

impl From<EngineError> for CliError {
    fn from(e: EngineError) -> Self {
        CliError::Engine(e)
    }
}

impl From<ConfigFileError> for CliError {
    fn from(e: ConfigFileError) -> Self {
        CliError::Config(e)
    }
}

impl From<gisengine::codec::CodecError> for CliError {
    fn from(e: gisengine::codec::CodecError) -> Self {
        CliError::Engine(EngineError::Codec(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gisengine::codec::CodecError;

    #[test]
    fn test_exit_codes() {
        let config = CliError::Config(ConfigFileError::WriteError("disk full".into()));
        assert_eq!(config.exit_code(), 2);

        let codec: CliError = CodecError::GeoJson("missing type".into()).into();
        assert_eq!(codec.exit_code(), 3);

        let crs: CliError = EngineError::UnsupportedCrs("EPSG:9999".into()).into();
        assert_eq!(crs.exit_code(), 4);

        let io = CliError::Runtime(std::io::Error::other("no threads"));
        assert_eq!(io.exit_code(), 1);
    }

    #[test]
    fn test_display_file_read() {
        let err = CliError::FileRead {
            path: PathBuf::from("/tmp/missing.wkt"),
            error: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        let text = err.to_string();
        assert!(text.contains("/tmp/missing.wkt"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
