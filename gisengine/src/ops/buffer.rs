//! Buffer by Minkowski cover.
//!
//! The cover of a boundary is the union of a rectangle around every segment
//! and a polygonal disc around every vertex. Dilation adds the cover of the
//! boundary to the shape, erosion subtracts it.

use std::f64::consts::PI;

use geo::BooleanOps;
use serde_json::json;
use tracing::debug;

use super::{prepare, OpOutput, ResultMetadata};
use crate::error::{EngineError, Result};
use crate::geometry::{
    from_geo_multi_polygon, polygon_area, to_geo_multi_polygon, Coord, Geometry, Polygon, Shape,
    Tolerance,
};
use crate::validation::cascaded_union;

/// Disc vertices per quarter turn.
pub const DEFAULT_QUADRANT_SEGMENTS: u32 = 8;

fn disc(center: Coord, radius: f64, vertices: usize) -> geo::Polygon<f64> {
    let mut ring: Vec<Coord> = (0..vertices)
        .map(|k| {
            let angle = 2.0 * PI * k as f64 / vertices as f64;
            Coord {
                x: center.x + radius * angle.cos(),
                y: center.y + radius * angle.sin(),
            }
        })
        .collect();
    ring.push(ring[0]);
    geo::Polygon::new(geo::LineString::new(ring), Vec::new())
}

fn segment_band(a: Coord, b: Coord, radius: f64) -> Option<geo::Polygon<f64>> {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let len = (dx * dx + dy * dy).sqrt();
    if len == 0.0 {
        return None;
    }
    let nx = -dy / len * radius;
    let ny = dx / len * radius;
    let ring = vec![
        Coord { x: a.x - nx, y: a.y - ny },
        Coord { x: b.x - nx, y: b.y - ny },
        Coord { x: b.x + nx, y: b.y + ny },
        Coord { x: a.x + nx, y: a.y + ny },
        Coord { x: a.x - nx, y: a.y - ny },
    ];
    Some(geo::Polygon::new(geo::LineString::new(ring), Vec::new()))
}

/// Union of discs around `points` and bands around the segments of `paths`.
fn cover(points: &[Coord], paths: &[&[Coord]], radius: f64, vertices: usize) -> geo::MultiPolygon<f64> {
    let mut parts: Vec<geo::MultiPolygon<f64>> = points
        .iter()
        .map(|&p| geo::MultiPolygon::new(vec![disc(p, radius, vertices)]))
        .collect();
    for path in paths {
        for w in path.windows(2) {
            if let Some(band) = segment_band(w[0], w[1], radius) {
                parts.push(geo::MultiPolygon::new(vec![band]));
            }
        }
        parts.extend(
            path.iter()
                .map(|&p| geo::MultiPolygon::new(vec![disc(p, radius, vertices)])),
        );
    }
    cascaded_union(parts)
}

/// Buffer a geometry by `distance` in its CRS units.
///
/// Positive distances dilate, negative ones erode. The result is always
/// areal. Total erosion, or eroding a line or point, gives an empty
/// polygon rather than an error.
///
/// # Errors
///
/// `InvalidInput` for a non-finite distance.
pub fn buffer(
    geometry: &Geometry,
    distance: f64,
    segments_per_quadrant: u32,
    tol: Tolerance,
) -> Result<OpOutput<Geometry>> {
    if !distance.is_finite() {
        return Err(EngineError::InvalidInput(format!(
            "buffer distance {distance} is not finite"
        )));
    }
    let segments = segments_per_quadrant.max(1);
    let metadata = ResultMetadata::new(
        "buffer",
        geometry.crs.clone(),
        json!({ "distance": distance, "segments_per_quadrant": segments }),
    );
    let mut warnings = Vec::new();
    let input = prepare(geometry, 0, tol, &mut warnings);
    let vertices = 4 * segments as usize;
    let radius = distance.abs();

    let polygons = input.shape.polygons();
    let result: Vec<Polygon> = match input.shape.dimension() {
        _ if input.is_empty() => Vec::new(),
        2 if distance == 0.0 => polygons,
        2 => {
            let boundary: Vec<&[Coord]> = polygons
                .iter()
                .flat_map(|p| p.rings())
                .map(|r| r.as_slice())
                .collect();
            let shape = to_geo_multi_polygon(&polygons);
            let band = cover(&[], &boundary, radius, vertices);
            let out = if distance > 0.0 {
                shape.union(&band)
            } else {
                shape.difference(&band)
            };
            from_geo_multi_polygon(&out)
        }
        _ if distance <= 0.0 => Vec::new(),
        1 => {
            let lines = input.shape.lines();
            let paths: Vec<&[Coord]> = lines.iter().map(|l| l.as_slice()).collect();
            from_geo_multi_polygon(&cover(&[], &paths, radius, vertices))
        }
        _ => from_geo_multi_polygon(&cover(&input.shape.points(), &[], radius, vertices)),
    };

    // Overlay can leave slivers below the tolerance behind
    let result: Vec<Polygon> = result
        .into_iter()
        .filter(|p| polygon_area(p) > tol.0)
        .collect();
    debug!(
        kind = %geometry.geometry_type(),
        distance,
        parts = result.len(),
        "Buffered geometry"
    );
    let shape = if result.is_empty() {
        Shape::Polygon(Polygon::default())
    } else {
        Shape::MultiPolygon(result).normalized()
    };
    Ok(OpOutput::new(input.with_shape(shape), metadata).with_warnings(warnings))
}
