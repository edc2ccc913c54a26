//! Douglas-Peucker simplification with validity retries.

use serde_json::json;
use tracing::{debug, warn};

use super::{prepare, OpOutput, OpWarning, ResultMetadata};
use crate::error::{EngineError, Result};
use crate::geometry::{
    point_segment_distance, signed_area, Coord, Geometry, Polygon, Shape, Tolerance,
};
use crate::validation::validate_shape;

/// Attempts before falling back to the input; each halves the tolerance.
pub const DEFAULT_SIMPLIFY_ATTEMPTS: u32 = 5;

/// Douglas-Peucker over an open or closed path; endpoints are always kept.
fn douglas_peucker(points: &[Coord], tolerance: f64) -> Vec<Coord> {
    if points.len() < 3 {
        return points.to_vec();
    }
    let mut keep = vec![false; points.len()];
    keep[0] = true;
    keep[points.len() - 1] = true;
    let mut stack = vec![(0usize, points.len() - 1)];
    while let Some((first, last)) = stack.pop() {
        let mut farthest = (0.0, first);
        for i in first + 1..last {
            let d = point_segment_distance(points[i], points[first], points[last]);
            if d > farthest.0 {
                farthest = (d, i);
            }
        }
        if farthest.0 > tolerance {
            keep[farthest.1] = true;
            stack.push((first, farthest.1));
            stack.push((farthest.1, last));
        }
    }
    points
        .iter()
        .zip(keep)
        .filter_map(|(p, k)| k.then_some(*p))
        .collect()
}

/// Simplified ring, or `None` when it collapses or flips orientation.
fn simplify_ring(ring: &[Coord], tolerance: f64) -> Option<Vec<Coord>> {
    let out = douglas_peucker(ring, tolerance);
    if out.len() < 4 {
        return None;
    }
    let (before, after) = (signed_area(ring), signed_area(&out));
    if after == 0.0 || before.signum() != after.signum() {
        return None;
    }
    Some(out)
}

fn simplify_polygon(poly: &Polygon, tolerance: f64) -> Option<Polygon> {
    Some(Polygon::new(
        simplify_ring(&poly.exterior, tolerance)?,
        poly.interiors
            .iter()
            .map(|h| simplify_ring(h, tolerance))
            .collect::<Option<_>>()?,
    ))
}

fn simplify_shape(shape: &Shape, tolerance: f64) -> Option<Shape> {
    Some(match shape {
        Shape::Point(_) | Shape::MultiPoint(_) => shape.clone(),
        Shape::LineString(ls) => Shape::LineString(douglas_peucker(ls, tolerance)),
        Shape::MultiLineString(lines) => Shape::MultiLineString(
            lines.iter().map(|l| douglas_peucker(l, tolerance)).collect(),
        ),
        Shape::Polygon(poly) => Shape::Polygon(simplify_polygon(poly, tolerance)?),
        Shape::MultiPolygon(polys) => Shape::MultiPolygon(
            polys
                .iter()
                .map(|p| simplify_polygon(p, tolerance))
                .collect::<Option<_>>()?,
        ),
    })
}

/// Simplify with Douglas-Peucker at `tolerance`.
///
/// A result that is invalid, flips a ring's orientation or collapses a ring
/// is retried at half the tolerance, up to `max_attempts` times; after that
/// the (repaired) input is returned. Warnings record the effective
/// tolerance or the fallback.
///
/// # Errors
///
/// `InvalidInput` for a negative or non-finite tolerance.
pub fn simplify(
    geometry: &Geometry,
    tolerance: f64,
    max_attempts: u32,
    tol: Tolerance,
) -> Result<OpOutput<Geometry>> {
    if !tolerance.is_finite() || tolerance < 0.0 {
        return Err(EngineError::InvalidInput(format!(
            "simplify tolerance {tolerance} must be finite and non-negative"
        )));
    }
    let metadata = ResultMetadata::new(
        "simplify",
        geometry.crs.clone(),
        json!({ "tolerance": tolerance, "max_attempts": max_attempts }),
    );
    let mut warnings = Vec::new();
    let input = prepare(geometry, 0, tol, &mut warnings);
    if input.is_empty() {
        return Ok(OpOutput::new(input, metadata).with_warnings(warnings));
    }

    let mut effective = tolerance;
    for attempt in 0..max_attempts.max(1) {
        let candidate = simplify_shape(&input.shape, effective)
            .filter(|s| validate_shape(s, tol).valid);
        if let Some(shape) = candidate {
            if attempt > 0 {
                warnings.push(OpWarning::SimplifyTolerance {
                    requested: tolerance,
                    effective,
                });
            }
            debug!(
                requested = tolerance,
                effective,
                before = input.shape.num_coords(),
                after = shape.num_coords(),
                "Simplified geometry"
            );
            return Ok(OpOutput::new(input.with_shape(shape), metadata).with_warnings(warnings));
        }
        effective /= 2.0;
    }

    warn!(
        tolerance,
        attempts = max_attempts,
        "Simplification kept failing validation, returning input"
    );
    warnings.push(OpWarning::SimplifyFallback {
        requested: tolerance,
    });
    Ok(OpOutput::new(input, metadata).with_warnings(warnings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crs::CrsId;
    use crate::geometry::area;

    fn polygon(coords: &[(f64, f64)]) -> Geometry {
        Geometry::polygon_from_tuples(coords, CrsId::web_mercator())
    }

    fn unit_square() -> Geometry {
        polygon(&[(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0), (0.0, 0.0)])
    }

    #[test]
    fn test_removes_near_collinear_vertex() {
        let g = polygon(&[(0.0, 0.0), (1.0, 0.001), (2.0, 0.0), (2.0, 2.0), (0.0, 2.0), (0.0, 0.0)]);
        let out = simplify(&g, 0.01, DEFAULT_SIMPLIFY_ATTEMPTS, Tolerance::default()).unwrap();
        assert_eq!(out.value.shape.num_coords(), 5);
        assert!((area(&out.value.shape) - 4.0).abs() < 1e-12);
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn test_collapse_retries_with_half_tolerance() {
        let out = simplify(&unit_square(), 10.0, 5, Tolerance::default()).unwrap();
        assert_eq!(out.value, unit_square());
        assert_eq!(
            out.warnings,
            vec![OpWarning::SimplifyTolerance {
                requested: 10.0,
                effective: 0.625
            }]
        );
    }

    #[test]
    fn test_falls_back_to_input() {
        let out = simplify(&unit_square(), 10.0, 2, Tolerance::default()).unwrap();
        assert_eq!(out.value, unit_square());
        assert_eq!(out.warnings, vec![OpWarning::SimplifyFallback { requested: 10.0 }]);
    }

    #[test]
    fn test_line_simplification() {
        let line = Geometry::new(
            Shape::LineString(vec![
                Coord { x: 0.0, y: 0.0 },
                Coord { x: 1.0, y: 0.1 },
                Coord { x: 2.0, y: -0.1 },
                Coord { x: 3.0, y: 5.0 },
                Coord { x: 4.0, y: 6.0 },
            ]),
            CrsId::web_mercator(),
        );
        let out = simplify(&line, 0.5, 3, Tolerance::default()).unwrap();
        assert_eq!(
            out.value.shape,
            Shape::LineString(vec![
                Coord { x: 0.0, y: 0.0 },
                Coord { x: 2.0, y: -0.1 },
                Coord { x: 3.0, y: 5.0 },
                Coord { x: 4.0, y: 6.0 },
            ])
        );
    }

    #[test]
    fn test_negative_tolerance_rejected() {
        assert!(matches!(
            simplify(&unit_square(), -1.0, 3, Tolerance::default()),
            Err(EngineError::InvalidInput(_))
        ));
    }
}
