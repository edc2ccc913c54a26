//! Conversions between engine shapes and `geo` types.
//!
//! `geo` closes polygon rings on construction, so only shapes that already
//! passed validation (or repair) should be converted for overlay work.
//! Polygons coming back from `geo` are re-oriented: exterior
//! counter-clockwise, holes clockwise.

use super::predicates::signed_area;
use super::types::{Coord, Polygon, Shape};

fn to_line_string(coords: &[Coord]) -> geo::LineString<f64> {
    geo::LineString::new(coords.to_vec())
}

/// Convert an engine polygon.
pub fn to_geo_polygon(poly: &Polygon) -> geo::Polygon<f64> {
    geo::Polygon::new(
        to_line_string(&poly.exterior),
        poly.interiors.iter().map(|r| to_line_string(r)).collect(),
    )
}

/// Convert a slice of engine polygons.
pub fn to_geo_multi_polygon(polys: &[Polygon]) -> geo::MultiPolygon<f64> {
    geo::MultiPolygon::new(
        polys
            .iter()
            .filter(|p| !p.is_empty())
            .map(to_geo_polygon)
            .collect(),
    )
}

/// Convert line parts.
pub fn to_geo_multi_line_string(lines: &[Vec<Coord>]) -> geo::MultiLineString<f64> {
    geo::MultiLineString::new(lines.iter().map(|l| to_line_string(l)).collect())
}

fn oriented(ring: &geo::LineString<f64>, ccw: bool) -> Vec<Coord> {
    let mut coords: Vec<Coord> = ring.0.clone();
    let area = signed_area(&coords);
    if (area > 0.0) != ccw && area != 0.0 {
        coords.reverse();
    }
    coords
}

/// Convert a `geo` polygon, normalising orientation.
pub fn from_geo_polygon(poly: &geo::Polygon<f64>) -> Polygon {
    Polygon::new(
        oriented(poly.exterior(), true),
        poly.interiors().iter().map(|r| oriented(r, false)).collect(),
    )
}

/// Convert a `geo` multi-polygon, dropping empty parts.
pub fn from_geo_multi_polygon(mp: &geo::MultiPolygon<f64>) -> Vec<Polygon> {
    mp.0.iter()
        .filter(|p| p.exterior().0.len() >= 4)
        .map(from_geo_polygon)
        .collect()
}

/// Convert a `geo` multi-line-string, dropping degenerate parts.
pub fn from_geo_multi_line_string(mls: &geo::MultiLineString<f64>) -> Vec<Vec<Coord>> {
    mls.0
        .iter()
        .filter(|l| l.0.len() >= 2)
        .map(|l| l.0.clone())
        .collect()
}

/// Convert any engine shape into a `geo::Geometry`.
pub fn to_geo_geometry(shape: &Shape) -> geo::Geometry<f64> {
    match shape {
        Shape::Point(Some(p)) => geo::Geometry::Point(geo::Point(*p)),
        Shape::Point(None) => geo::Geometry::MultiPoint(geo::MultiPoint::new(Vec::new())),
        Shape::LineString(ls) => geo::Geometry::LineString(to_line_string(ls)),
        Shape::Polygon(poly) if poly.is_empty() => {
            geo::Geometry::MultiPolygon(geo::MultiPolygon::new(Vec::new()))
        }
        Shape::Polygon(poly) => geo::Geometry::Polygon(to_geo_polygon(poly)),
        Shape::MultiPoint(pts) => geo::Geometry::MultiPoint(geo::MultiPoint::new(
            pts.iter().map(|c| geo::Point(*c)).collect(),
        )),
        Shape::MultiLineString(lines) => {
            geo::Geometry::MultiLineString(to_geo_multi_line_string(lines))
        }
        Shape::MultiPolygon(polys) => geo::Geometry::MultiPolygon(to_geo_multi_polygon(polys)),
    }
}
