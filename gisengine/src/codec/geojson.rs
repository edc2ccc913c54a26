//! GeoJSON geometry, feature and feature-collection codec.
//!
//! Built on `serde_json::Value` rather than typed structs so that foreign
//! members and odd-but-legal documents (numeric or string ids, legacy `crs`
//! members) pass through without a bespoke schema.

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};
use tracing::debug;

use super::CodecError;
use crate::crs::CrsId;
use crate::error::{EngineError, Result};
use crate::feature::{AttributeValue, Attributes, Feature};
use crate::geometry::{bounding_box, Coord, Polygon, Shape};

// =============================================================================
// Geometry
// =============================================================================

fn coord_json(c: &Coord) -> Value {
    json!([c.x, c.y])
}

fn seq_json(seq: &[Coord]) -> Value {
    Value::Array(seq.iter().map(coord_json).collect())
}

fn polygon_json(poly: &Polygon) -> Value {
    if poly.is_empty() {
        return Value::Array(Vec::new());
    }
    Value::Array(poly.rings().map(|r| seq_json(r)).collect())
}

/// GeoJSON geometry object for a shape.
pub fn shape_to_geojson(shape: &Shape) -> Value {
    let coordinates = match shape {
        Shape::Point(None) => Value::Array(Vec::new()),
        Shape::Point(Some(c)) => coord_json(c),
        Shape::LineString(ls) | Shape::MultiPoint(ls) => seq_json(ls),
        Shape::Polygon(poly) => polygon_json(poly),
        Shape::MultiLineString(lines) => {
            Value::Array(lines.iter().map(|l| seq_json(l)).collect())
        }
        Shape::MultiPolygon(polys) => Value::Array(polys.iter().map(polygon_json).collect()),
    };
    json!({
        "type": shape.geometry_type().geojson_name(),
        "coordinates": coordinates,
    })
}

fn invalid(message: impl Into<String>) -> CodecError {
    CodecError::GeoJson(message.into())
}

fn as_array<'v>(value: &'v Value, what: &str) -> std::result::Result<&'v Vec<Value>, CodecError> {
    value
        .as_array()
        .ok_or_else(|| invalid(format!("{what} must be an array")))
}

fn parse_coord(value: &Value) -> std::result::Result<Coord, CodecError> {
    let arr = as_array(value, "position")?;
    if arr.len() < 2 {
        return Err(invalid("position needs at least two numbers"));
    }
    let x = arr[0].as_f64().ok_or_else(|| invalid("position ordinate is not a number"))?;
    let y = arr[1].as_f64().ok_or_else(|| invalid("position ordinate is not a number"))?;
    Ok(Coord { x, y })
}

fn parse_seq(value: &Value) -> std::result::Result<Vec<Coord>, CodecError> {
    as_array(value, "coordinates")?.iter().map(parse_coord).collect()
}

fn parse_polygon(value: &Value) -> std::result::Result<Polygon, CodecError> {
    let mut rings = as_array(value, "polygon")?
        .iter()
        .map(parse_seq)
        .collect::<std::result::Result<Vec<_>, _>>()?;
    if rings.is_empty() {
        return Ok(Polygon::default());
    }
    let exterior = rings.remove(0);
    Ok(Polygon::new(exterior, rings))
}

/// Decode a GeoJSON geometry object.
pub fn shape_from_geojson(value: &Value) -> std::result::Result<Shape, CodecError> {
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid("geometry without 'type'"))?;
    if kind == "GeometryCollection" {
        return Err(CodecError::UnsupportedType(kind.to_string()));
    }
    let coords = value
        .get("coordinates")
        .ok_or_else(|| invalid(format!("{kind} without 'coordinates'")))?;
    Ok(match kind {
        "Point" => {
            if as_array(coords, "coordinates")?.is_empty() {
                Shape::Point(None)
            } else {
                Shape::Point(Some(parse_coord(coords)?))
            }
        }
        "LineString" => Shape::LineString(parse_seq(coords)?),
        "Polygon" => Shape::Polygon(parse_polygon(coords)?),
        "MultiPoint" => Shape::MultiPoint(parse_seq(coords)?),
        "MultiLineString" => Shape::MultiLineString(
            as_array(coords, "coordinates")?
                .iter()
                .map(parse_seq)
                .collect::<std::result::Result<_, _>>()?,
        ),
        "MultiPolygon" => Shape::MultiPolygon(
            as_array(coords, "coordinates")?
                .iter()
                .map(parse_polygon)
                .collect::<std::result::Result<_, _>>()?,
        ),
        other => return Err(CodecError::UnsupportedType(other.to_string())),
    })
}

/// Parse a GeoJSON geometry document.
pub fn parse_geojson_geometry(text: &str) -> std::result::Result<Shape, CodecError> {
    let value: Value = serde_json::from_str(text)?;
    // Accept a bare geometry or a Feature wrapping one
    match value.get("type").and_then(Value::as_str) {
        Some("Feature") => shape_from_geojson(
            value
                .get("geometry")
                .ok_or_else(|| invalid("Feature without 'geometry'"))?,
        ),
        _ => shape_from_geojson(&value),
    }
}

// =============================================================================
// Attributes
// =============================================================================

/// Convert a JSON property value.
///
/// Nested arrays and objects have no attribute type of their own and are kept
/// as their compact JSON text.
pub fn attribute_from_json(value: &Value) -> AttributeValue {
    match value {
        Value::Null => AttributeValue::Null,
        Value::Bool(b) => AttributeValue::Boolean(*b),
        Value::Number(n) => n
            .as_f64()
            .map(AttributeValue::Number)
            .unwrap_or(AttributeValue::Null),
        Value::String(s) => AttributeValue::String(s.clone()),
        nested => AttributeValue::String(nested.to_string()),
    }
}

/// JSON form of an attribute value.
pub fn attribute_to_json(value: &AttributeValue) -> Value {
    match value {
        AttributeValue::Null => Value::Null,
        AttributeValue::Boolean(b) => Value::Bool(*b),
        AttributeValue::Number(n) => json!(n),
        AttributeValue::String(s) => Value::String(s.clone()),
    }
}

fn properties_json(attributes: &Attributes) -> Value {
    Value::Object(
        attributes
            .iter()
            .map(|(k, v)| (k.clone(), attribute_to_json(v)))
            .collect::<Map<_, _>>(),
    )
}

// =============================================================================
// Features
// =============================================================================

/// GeoJSON Feature object for a dataset feature.
pub fn feature_to_geojson(feature: &Feature) -> Value {
    json!({
        "type": "Feature",
        "id": feature.id.get(),
        "geometry": shape_to_geojson(&feature.geometry.shape),
        "properties": properties_json(&feature.attributes),
    })
}

/// FeatureCollection document for a list of features.
pub fn features_to_geojson<'a>(features: impl IntoIterator<Item = &'a Feature>) -> Value {
    json!({
        "type": "FeatureCollection",
        "features": features.into_iter().map(feature_to_geojson).collect::<Vec<_>>(),
    })
}

/// One decoded feature, not yet part of a dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportedFeature {
    /// Numeric id from the document, when present
    pub source_id: Option<u64>,
    pub shape: Shape,
    pub attributes: Attributes,
}

/// Decoded feature collection with its resolved CRS.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportedCollection {
    pub crs: CrsId,
    pub features: Vec<ImportedFeature>,
}

fn parse_feature(value: &Value) -> std::result::Result<ImportedFeature, CodecError> {
    let geometry = value
        .get("geometry")
        .filter(|g| !g.is_null())
        .ok_or_else(|| invalid("feature without geometry"))?;
    let shape = shape_from_geojson(geometry)?;
    let source_id = match value.get("id") {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    };
    let attributes: Attributes = match value.get("properties") {
        Some(Value::Object(props)) => props
            .iter()
            .map(|(k, v)| (k.clone(), attribute_from_json(v)))
            .collect(),
        _ => BTreeMap::new(),
    };
    Ok(ImportedFeature {
        source_id,
        shape,
        attributes,
    })
}

fn declared_crs(doc: &Value) -> Option<CrsId> {
    let crs = doc.get("crs")?;
    crs.pointer("/properties/name")
        .or_else(|| crs.pointer("/properties/code"))
        .and_then(|v| match v {
            Value::String(s) => Some(CrsId::parse(s)),
            Value::Number(n) => n.as_u64().map(|c| CrsId::epsg(c as u32)),
            _ => None,
        })
}

fn looks_geographic(features: &[ImportedFeature]) -> bool {
    features
        .iter()
        .filter_map(|f| bounding_box(&f.shape))
        .all(|b| b.min_x >= -180.0 && b.max_x <= 180.0 && b.min_y >= -90.0 && b.max_y <= 90.0)
}

/// Import a FeatureCollection (or a single Feature).
///
/// CRS resolution order: `declared` by the caller, the document's legacy
/// `crs` member, then auto-detection: coordinates that all fit the lon/lat
/// range are taken as EPSG:4326.
///
/// # Errors
///
/// `Codec` for malformed documents, `UnsupportedCrs` when no CRS can be
/// determined.
pub fn read_feature_collection(text: &str, declared: Option<CrsId>) -> Result<ImportedCollection> {
    let doc: Value = serde_json::from_str(text).map_err(CodecError::from)?;
    let features = match doc.get("type").and_then(Value::as_str) {
        Some("FeatureCollection") => doc
            .get("features")
            .and_then(Value::as_array)
            .ok_or_else(|| invalid("FeatureCollection without 'features'"))?
            .iter()
            .map(parse_feature)
            .collect::<std::result::Result<Vec<_>, _>>()?,
        Some("Feature") => vec![parse_feature(&doc)?],
        other => {
            return Err(invalid(format!(
                "expected FeatureCollection or Feature, found {}",
                other.unwrap_or("untyped value")
            ))
            .into())
        }
    };

    let crs = match declared.or_else(|| declared_crs(&doc)) {
        Some(crs) => crs,
        None if looks_geographic(&features) => CrsId::wgs84(),
        None => {
            return Err(EngineError::UnsupportedCrs(
                "no CRS declared and coordinates exceed the lon/lat range".to_string(),
            ))
        }
    };
    debug!(features = features.len(), crs = %crs, "Imported GeoJSON feature collection");
    Ok(ImportedCollection { crs, features })
}
