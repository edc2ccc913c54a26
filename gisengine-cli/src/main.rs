//! gisengine CLI - Command-line interface
//!
//! This binary provides a command-line interface to the gisengine library.

mod commands;
mod error;
mod runner;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use commands::config::ConfigCommands;
use commands::geometry::{BufferArgs, RepairArgs, ReprojectArgs, SimplifyArgs, ValidateArgs};
use error::CliError;
use runner::{CliRunner, RunnerOptions};

#[derive(Parser)]
#[command(name = "gisengine")]
#[command(version, about = "Validate, repair and transform geometries", long_about = None)]
struct Cli {
    /// Config file (default: ~/.gisengine/config.ini)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory for the log file (overrides the config file)
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Disable logging
    #[arg(long, short, global = true, conflicts_with = "debug")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a geometry against the validity rules
    Validate(ValidateArgs),
    /// Repair an invalid geometry
    Repair(RepairArgs),
    /// Grow or shrink a geometry by a distance
    Buffer(BufferArgs),
    /// Simplify a geometry without making it invalid
    Simplify(SimplifyArgs),
    /// Transform a geometry into another CRS
    Reproject(ReprojectArgs),
    /// Inspect or create the configuration file
    #[command(subcommand)]
    Config(ConfigCommands),
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Validate(_) => "validate",
            Commands::Repair(_) => "repair",
            Commands::Buffer(_) => "buffer",
            Commands::Simplify(_) => "simplify",
            Commands::Reproject(_) => "reproject",
            Commands::Config(_) => "config",
        }
    }
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        e.exit();
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    if let Commands::Config(command) = cli.command {
        return commands::config::run(command, cli.config.as_deref());
    }

    let options = RunnerOptions {
        config_path: cli.config,
        log_dir: cli.log_dir,
        debug: cli.debug,
        quiet: cli.quiet,
    };
    let runner = CliRunner::new(&options)?;
    runner.log_startup(cli.command.name());

    match cli.command {
        Commands::Validate(args) => commands::geometry::run_validate(&runner, args),
        Commands::Repair(args) => commands::geometry::run_repair(&runner, args),
        Commands::Buffer(args) => commands::geometry::run_buffer(&runner, args),
        Commands::Simplify(args) => commands::geometry::run_simplify(&runner, args),
        Commands::Reproject(args) => commands::geometry::run_reproject(&runner, args),
        Commands::Config(command) => commands::config::run(command, options.config_path.as_deref()),
    }
}
