//! CLI runner for common setup and operations.
//!
//! Encapsulates config loading, logging initialization, and engine creation
//! so command handlers only deal with their own request.

use std::future::Future;
use std::path::{Path, PathBuf};

use tokio::runtime::Runtime;
use tracing::info;

use gisengine::config::EngineConfig;
use gisengine::logging::{default_log_level, init_logging, LoggingGuard};
use gisengine::service::SpatialEngine;

use crate::error::CliError;

/// Runner that manages CLI lifecycle and common operations.
pub struct CliRunner {
    /// Logging guard - keeps logging active while runner exists
    #[allow(dead_code)]
    logging_guard: Option<LoggingGuard>,
    runtime: Runtime,
    engine: SpatialEngine,
}

/// Options shared by every command.
#[derive(Debug, Clone, Default)]
pub struct RunnerOptions {
    /// Config file to load instead of `~/.gisengine/config.ini`
    pub config_path: Option<PathBuf>,
    /// Log directory overriding the configured one
    pub log_dir: Option<PathBuf>,
    /// Enable debug-level logging regardless of RUST_LOG
    pub debug: bool,
    /// Skip logging setup entirely
    pub quiet: bool,
}

impl CliRunner {
    /// Load config, initialize logging, and create the engine.
    pub fn new(options: &RunnerOptions) -> Result<Self, CliError> {
        let config = load_config(options.config_path.as_deref())?;

        let logging_guard = if options.quiet {
            None
        } else {
            let log_dir = options
                .log_dir
                .clone()
                .unwrap_or_else(|| config.logging.directory.clone());
            let level = if options.debug {
                "debug"
            } else {
                default_log_level()
            };
            let guard = init_logging(&log_dir, &config.logging.file, level)
                .map_err(|e| CliError::LoggingInit(e.to_string()))?;
            Some(guard)
        };

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .thread_name("gisengine-cli")
            .build()
            .map_err(CliError::Runtime)?;

        let engine = SpatialEngine::new(config)?;

        Ok(Self {
            logging_guard,
            runtime,
            engine,
        })
    }

    pub fn engine(&self) -> &SpatialEngine {
        &self.engine
    }

    /// Log startup information for a command.
    pub fn log_startup(&self, command: &str) {
        info!("gisengine v{}", gisengine::VERSION);
        info!(
            command,
            workers = self.engine.config().workers.max_concurrent,
            "gisengine CLI command"
        );
    }

    /// Drive an engine request to completion.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }
}

/// Load the config from `path`, or from the default location.
fn load_config(path: Option<&Path>) -> Result<EngineConfig, CliError> {
    match path {
        Some(path) => Ok(EngineConfig::load_from(path)?),
        None => Ok(EngineConfig::load()?),
    }
}
