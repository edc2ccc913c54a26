//! Geometry codecs: WKT, WKB (binary and hex) and GeoJSON.
//!
//! All three formats round-trip coordinates exactly. Parsing entry points
//! return raw shapes; validation is left to the caller so that an edit
//! policy can decide between rejecting and repairing.

mod geojson;
mod wkb;
mod wkt;

use thiserror::Error;

pub use geojson::{
    attribute_from_json, attribute_to_json, feature_to_geojson, features_to_geojson,
    parse_geojson_geometry, read_feature_collection, shape_from_geojson, shape_to_geojson,
    ImportedCollection, ImportedFeature,
};
pub use wkb::{decode_hex, parse_wkb, parse_wkb_hex, to_wkb, to_wkb_hex};
pub use wkt::{parse_wkt, read_wkt, to_ewkt, to_wkt};

use crate::geometry::Shape;

/// Errors from encoding or decoding geometries.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("WKT syntax error at offset {offset}: {message}")]
    Wkt { offset: usize, message: String },

    #[error("invalid WKB: {0}")]
    Wkb(String),

    #[error("invalid hex: {0}")]
    Hex(String),

    #[error("invalid GeoJSON: {0}")]
    GeoJson(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported geometry type: {0}")]
    UnsupportedType(String),
}

/// Geometry text/binary formats accepted by [`parse_geometry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryFormat {
    Wkt,
    WkbHex,
    GeoJson,
}

impl GeometryFormat {
    /// Guess the format of a geometry string.
    pub fn detect(text: &str) -> Self {
        let trimmed = text.trim_start();
        if trimmed.starts_with('{') {
            GeometryFormat::GeoJson
        } else if !trimmed.is_empty() && trimmed.bytes().all(|b| b.is_ascii_hexdigit()) {
            GeometryFormat::WkbHex
        } else {
            GeometryFormat::Wkt
        }
    }
}

/// Parse a geometry string in the given format.
pub fn parse_geometry(text: &str, format: GeometryFormat) -> Result<Shape, CodecError> {
    match format {
        GeometryFormat::Wkt => parse_wkt(text),
        GeometryFormat::WkbHex => parse_wkb_hex(text),
        GeometryFormat::GeoJson => parse_geojson_geometry(text),
    }
}
