//! Configuration management CLI commands.
//!
//! Provides `config path`, `config show`, and `config init` for inspecting
//! the engine configuration from the command line.

use std::path::Path;

use clap::Subcommand;
use gisengine::config::{config_file_path, EngineConfig};

use crate::error::CliError;

/// Config subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Show the configuration file path
    Path,

    /// Print the effective configuration as INI
    Show,

    /// Write a default configuration file if none exists
    Init,
}

/// Run a config subcommand.
///
/// `config_path` overrides the default `~/.gisengine/config.ini`.
pub fn run(command: ConfigCommands, config_path: Option<&Path>) -> Result<(), CliError> {
    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(config_file_path);

    match command {
        ConfigCommands::Path => {
            println!("{}", path.display());
            Ok(())
        }
        ConfigCommands::Show => {
            let config = EngineConfig::load_from(&path)?;
            print!("{}", config.to_ini_string());
            Ok(())
        }
        ConfigCommands::Init => {
            if path.exists() {
                println!("Config file already exists: {}", path.display());
            } else {
                EngineConfig::default().save_to(&path)?;
                println!("Created config file: {}", path.display());
            }
            Ok(())
        }
    }
}
