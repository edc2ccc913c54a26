//! Geometry CLI commands.
//!
//! Each command reads one geometry, runs it through the engine, and prints
//! the result to stdout.

use clap::Args;
use serde_json::json;
use tracing::info;

use gisengine::codec::CodecError;
use gisengine::crs::CrsId;

use super::common::{
    feature_json, pretty, render_geometry, render_output, GeometryInput, OutputFormat,
};
use crate::error::CliError;
use crate::runner::CliRunner;

/// Arguments for `validate`.
#[derive(Debug, Args)]
pub struct ValidateArgs {
    #[command(flatten)]
    pub input: GeometryInput,
}

/// Arguments for `repair`.
#[derive(Debug, Args)]
pub struct RepairArgs {
    #[command(flatten)]
    pub input: GeometryInput,

    /// Output encoding
    #[arg(long, value_enum, default_value_t)]
    pub format: OutputFormat,
}

/// Arguments for `buffer`.
#[derive(Debug, Args)]
pub struct BufferArgs {
    #[command(flatten)]
    pub input: GeometryInput,

    /// Buffer distance in CRS units (negative erodes polygons)
    #[arg(long, allow_hyphen_values = true)]
    pub distance: f64,

    /// Output encoding
    #[arg(long, value_enum, default_value_t)]
    pub format: OutputFormat,
}

/// Arguments for `simplify`.
#[derive(Debug, Args)]
pub struct SimplifyArgs {
    #[command(flatten)]
    pub input: GeometryInput,

    /// Maximum deviation in CRS units
    #[arg(long)]
    pub tolerance: f64,

    /// Output encoding
    #[arg(long, value_enum, default_value_t)]
    pub format: OutputFormat,
}

/// Arguments for `reproject`.
#[derive(Debug, Args)]
pub struct ReprojectArgs {
    #[command(flatten)]
    pub input: GeometryInput,

    /// Target CRS (e.g. EPSG:3857)
    #[arg(long)]
    pub to: String,

    /// Output encoding
    #[arg(long, value_enum, default_value_t)]
    pub format: OutputFormat,
}

/// Print a validity report.
pub fn run_validate(runner: &CliRunner, args: ValidateArgs) -> Result<(), CliError> {
    let geometry = args.input.load()?;
    let report = runner.block_on(runner.engine().validate(geometry))?;
    info!(valid = report.valid, issues = report.issues.len(), "Validated geometry");

    let value = serde_json::to_value(&report).map_err(CodecError::from)?;
    println!("{}", pretty(&value)?);
    Ok(())
}

/// Print the repaired geometry.
pub fn run_repair(runner: &CliRunner, args: RepairArgs) -> Result<(), CliError> {
    let geometry = args.input.load()?;
    let outcome = runner.block_on(runner.engine().repair(geometry))?;
    info!(changed = outcome.changed, issues = outcome.issues.len(), "Repaired geometry");

    let text = match args.format {
        OutputFormat::Geojson => {
            let mut value = feature_json(&outcome.geometry, None, &[])?;
            value["properties"]["changed"] = json!(outcome.changed);
            value["properties"]["issues"] =
                serde_json::to_value(&outcome.issues).map_err(CodecError::from)?;
            pretty(&value)?
        }
        OutputFormat::Wkt => render_geometry(&outcome.geometry, args.format)?,
    };
    println!("{}", text);
    Ok(())
}

/// Print the buffered geometry.
pub fn run_buffer(runner: &CliRunner, args: BufferArgs) -> Result<(), CliError> {
    let geometry = args.input.load()?;
    let output = runner.block_on(runner.engine().buffer(geometry, args.distance))?;
    println!("{}", render_output(&output, args.format)?);
    Ok(())
}

/// Print the simplified geometry.
pub fn run_simplify(runner: &CliRunner, args: SimplifyArgs) -> Result<(), CliError> {
    let geometry = args.input.load()?;
    let output = runner.block_on(runner.engine().simplify(geometry, args.tolerance))?;
    for warning in &output.warnings {
        tracing::warn!(%warning, "Simplification adjusted");
    }
    println!("{}", render_output(&output, args.format)?);
    Ok(())
}

/// Print the reprojected geometry.
pub fn run_reproject(runner: &CliRunner, args: ReprojectArgs) -> Result<(), CliError> {
    let geometry = args.input.load()?;
    let target = CrsId::parse(&args.to);
    let projected = runner.block_on(runner.engine().reproject(geometry, target))?;
    println!("{}", render_geometry(&projected, args.format)?);
    Ok(())
}
