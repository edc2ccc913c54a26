//! Common types and utilities shared across CLI commands.

use std::fs;
use std::path::{Path, PathBuf};

use clap::{Args, ValueEnum};
use serde_json::{json, Value};

use gisengine::codec::{
    parse_geometry, read_wkt, shape_to_geojson, to_ewkt, CodecError, GeometryFormat,
};
use gisengine::crs::CrsId;
use gisengine::geometry::Geometry;
use gisengine::ops::{OpOutput, OpWarning, ResultMetadata};

use crate::error::CliError;

/// Geometry input shared by every geometry command.
#[derive(Debug, Clone, Args)]
pub struct GeometryInput {
    /// File holding WKT, EWKT, hex WKB, or GeoJSON ("-" reads stdin)
    pub input: PathBuf,

    /// CRS of the input when the input does not declare one
    #[arg(long, default_value = "EPSG:4326")]
    pub crs: String,
}

impl GeometryInput {
    /// Read and decode the input geometry.
    pub fn load(&self) -> Result<Geometry, CliError> {
        let text = read_input(&self.input)?;
        decode_geometry(&text, CrsId::parse(&self.crs))
    }
}

/// Output encoding for geometry results.
#[derive(Debug, Clone, Copy, Default, ValueEnum, PartialEq, Eq)]
pub enum OutputFormat {
    /// GeoJSON Feature with operation metadata in its properties
    #[default]
    Geojson,
    /// EWKT (WKT with an SRID prefix for EPSG CRSs)
    Wkt,
}

/// Read a file, or stdin for "-".
pub fn read_input(path: &Path) -> Result<String, CliError> {
    let result = if path.as_os_str() == "-" {
        std::io::read_to_string(std::io::stdin())
    } else {
        fs::read_to_string(path)
    };
    result.map_err(|error| CliError::FileRead {
        path: path.to_path_buf(),
        error,
    })
}

/// Decode geometry text in any supported format.
///
/// An EWKT SRID overrides `default_crs`.
pub fn decode_geometry(text: &str, default_crs: CrsId) -> Result<Geometry, CliError> {
    let text = text.trim();
    match GeometryFormat::detect(text) {
        GeometryFormat::Wkt => Ok(read_wkt(text, default_crs)?),
        format => {
            let shape = parse_geometry(text, format)?;
            Ok(Geometry::new(shape, default_crs))
        }
    }
}

/// GeoJSON Feature for a result geometry.
pub fn feature_json(
    geometry: &Geometry,
    metadata: Option<&ResultMetadata>,
    warnings: &[OpWarning],
) -> Result<Value, CliError> {
    let mut properties = json!({ "crs": geometry.crs.as_str() });
    if let Some(metadata) = metadata {
        properties["metadata"] = serde_json::to_value(metadata).map_err(CodecError::from)?;
    }
    if !warnings.is_empty() {
        properties["warnings"] = serde_json::to_value(warnings).map_err(CodecError::from)?;
    }
    Ok(json!({
        "type": "Feature",
        "geometry": shape_to_geojson(&geometry.shape),
        "properties": properties,
    }))
}

/// Render an operation result in the requested format.
pub fn render_output(output: &OpOutput<Geometry>, format: OutputFormat) -> Result<String, CliError> {
    match format {
        OutputFormat::Geojson => {
            let value = feature_json(&output.value, Some(&output.metadata), &output.warnings)?;
            pretty(&value)
        }
        OutputFormat::Wkt => Ok(to_ewkt(&output.value)),
    }
}

/// Render a bare geometry in the requested format.
pub fn render_geometry(geometry: &Geometry, format: OutputFormat) -> Result<String, CliError> {
    match format {
        OutputFormat::Geojson => pretty(&feature_json(geometry, None, &[])?),
        OutputFormat::Wkt => Ok(to_ewkt(geometry)),
    }
}

pub fn pretty(value: &Value) -> Result<String, CliError> {
    Ok(serde_json::to_string_pretty(value).map_err(CodecError::from)?)
}
