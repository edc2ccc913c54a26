//! Set operations: clip, union, intersection, merge.
//!
//! Areal overlays go through `geo::BooleanOps`. Lineal and mixed cases use
//! the planar arrangement from the validation engine: both inputs are noded
//! together and each noded edge is classified by its midpoint.

use std::collections::HashSet;

use geo::BooleanOps;
use serde_json::json;
use tracing::debug;

use super::{prepare, require_same_crs, OpOutput, OpWarning, ResultMetadata};
use crate::error::{EngineError, Result};
use crate::geometry::{
    canonicalize, coords_eq, from_geo_multi_polygon, point_in_polygons, point_on_segment,
    polygon_area, to_geo_multi_polygon, Coord, Geometry, GeometryType, Location, Polygon, Shape,
    Tolerance,
};
use crate::validation::{cascaded_union, Arrangement};

type Segment = (Coord, Coord);

fn segments_of(paths: &[Vec<Coord>]) -> Vec<Segment> {
    paths
        .iter()
        .flat_map(|p| p.windows(2).map(|w| (w[0], w[1])))
        .collect()
}

fn rings_of(polys: &[Polygon]) -> Vec<Vec<Coord>> {
    polys.iter().flat_map(|p| p.rings().cloned()).collect()
}

fn midpoint(a: Coord, b: Coord) -> Coord {
    Coord {
        x: (a.x + b.x) / 2.0,
        y: (a.y + b.y) / 2.0,
    }
}

fn on_any(segments: &[Segment], p: Coord, tol: Tolerance) -> bool {
    segments
        .iter()
        .any(|&(a, b)| point_on_segment(p, a, b, tol))
}

/// Pieces of `lines` kept by `keep(midpoint)`, plus the vertices where the
/// lines meet `other` without a kept edge through them.
fn classify_linework(
    lines: &[Vec<Coord>],
    other: &[Segment],
    tol: Tolerance,
    keep: impl Fn(Coord) -> bool,
) -> (Vec<Vec<Coord>>, Vec<Coord>) {
    let own = segments_of(lines);
    let mut all = own.clone();
    all.extend_from_slice(other);
    let arrangement = Arrangement::new(&all, tol);

    let kept: Vec<(usize, usize)> = arrangement
        .edges
        .iter()
        .copied()
        .filter(|&e| {
            let (p, q) = arrangement.segment(e);
            let m = midpoint(p, q);
            on_any(&own, m, tol) && keep(m)
        })
        .collect();
    let covered: HashSet<usize> = kept.iter().flat_map(|&(a, b)| [a, b]).collect();
    let touches = arrangement
        .vertices
        .iter()
        .enumerate()
        .filter(|(i, v)| {
            !covered.contains(i) && on_any(&own, **v, tol) && on_any(other, **v, tol)
        })
        .map(|(_, v)| *v)
        .collect();
    (arrangement.chains(&kept), touches)
}

fn dedup_points(points: Vec<Coord>, tol: Tolerance) -> Vec<Coord> {
    let mut out: Vec<Coord> = Vec::with_capacity(points.len());
    for p in points {
        if !out.iter().any(|q| coords_eq(*q, p, tol)) {
            out.push(p);
        }
    }
    out
}

fn non_sliver(polys: Vec<Polygon>, tol: Tolerance) -> Vec<Polygon> {
    polys
        .into_iter()
        .filter(|p| polygon_area(p) > tol.0)
        .collect()
}

/// Lines first, then points: the highest-dimensional non-empty result.
fn lines_or_points(lines: Vec<Vec<Coord>>, points: Vec<Coord>, tol: Tolerance) -> Shape {
    if !lines.is_empty() {
        Shape::MultiLineString(lines)
    } else {
        Shape::MultiPoint(dedup_points(points, tol))
    }
}

fn finish(shape: Shape, empty: GeometryType, keep_multi: bool) -> Shape {
    if shape.is_empty() {
        return Shape::empty(empty);
    }
    let shape = canonicalize(&shape);
    if keep_multi {
        shape
    } else {
        canonicalize(&shape.normalized())
    }
}

// =============================================================================
// Clip
// =============================================================================

/// Restrict a geometry to an areal mask.
///
/// The result keeps the input's dimension: parts on the mask boundary count
/// as inside for lines and points. A disjoint input gives an empty geometry
/// of the input type.
///
/// # Errors
///
/// `DimensionMismatch` when the mask is not areal or the CRSs differ.
pub fn clip(geometry: &Geometry, mask: &Geometry, tol: Tolerance) -> Result<OpOutput<Geometry>> {
    require_same_crs([geometry, mask].into_iter())?;
    if mask.shape.dimension() != 2 {
        return Err(EngineError::DimensionMismatch(format!(
            "clip mask must be areal, got {}",
            mask.geometry_type()
        )));
    }
    let metadata = ResultMetadata::new(
        "clip",
        geometry.crs.clone(),
        json!({ "mask_type": mask.geometry_type().geojson_name() }),
    );
    let mut warnings = Vec::new();
    let input = prepare(geometry, 0, tol, &mut warnings);
    let mask = prepare(mask, 1, tol, &mut warnings);
    let mask_polys = mask.shape.polygons();

    let kind = input.geometry_type();
    let shape = match input.shape.dimension() {
        _ if input.is_empty() || mask.is_empty() => Shape::empty(kind),
        2 => {
            let out = to_geo_multi_polygon(&input.shape.polygons())
                .intersection(&to_geo_multi_polygon(&mask_polys));
            Shape::MultiPolygon(non_sliver(from_geo_multi_polygon(&out), tol))
        }
        1 => {
            let boundary = segments_of(&rings_of(&mask_polys));
            let (lines, _) = classify_linework(&input.shape.lines(), &boundary, tol, |m| {
                point_in_polygons(m, &mask_polys, tol) != Location::Outside
            });
            Shape::MultiLineString(lines)
        }
        _ => Shape::MultiPoint(
            input
                .shape
                .points()
                .into_iter()
                .filter(|p| point_in_polygons(*p, &mask_polys, tol) != Location::Outside)
                .collect(),
        ),
    };
    let shape = finish(shape, kind, kind == kind.multi());
    debug!(kind = %kind, empty = shape.is_empty(), "Clipped geometry");
    Ok(OpOutput::new(input.with_shape(shape), metadata).with_warnings(warnings))
}

// =============================================================================
// Union
// =============================================================================

/// Union of any number of geometries of one dimension.
///
/// Overlaps are dissolved and the output is canonical, so the result does
/// not depend on input order. Empty members are ignored.
///
/// # Errors
///
/// `InvalidInput` for an empty list, `DimensionMismatch` for mixed
/// dimensions or CRSs.
pub fn union(geometries: &[Geometry], tol: Tolerance) -> Result<OpOutput<Geometry>> {
    let Some(first) = geometries.first() else {
        return Err(EngineError::InvalidInput(
            "union needs at least one geometry".to_string(),
        ));
    };
    require_same_crs(geometries.iter())?;
    let mut warnings = Vec::new();
    let inputs: Vec<Geometry> = geometries
        .iter()
        .enumerate()
        .map(|(i, g)| prepare(g, i, tol, &mut warnings))
        .filter(|g| !g.is_empty())
        .collect();
    let dimension = inputs
        .first()
        .map_or(first.shape.dimension(), |g| g.shape.dimension());
    if let Some(other) = inputs.iter().find(|g| g.shape.dimension() != dimension) {
        return Err(EngineError::DimensionMismatch(format!(
            "cannot union dimension {dimension} with {}",
            other.geometry_type()
        )));
    }
    let metadata = ResultMetadata::new(
        "union",
        first.crs.clone(),
        json!({ "count": geometries.len() }),
    );

    let shape = match dimension {
        2 => {
            let parts = inputs
                .iter()
                .map(|g| to_geo_multi_polygon(&g.shape.polygons()))
                .collect();
            Shape::MultiPolygon(non_sliver(from_geo_multi_polygon(&cascaded_union(parts)), tol))
        }
        1 => {
            let lines: Vec<Vec<Coord>> = inputs.iter().flat_map(|g| g.shape.lines()).collect();
            let arrangement = Arrangement::new(&segments_of(&lines), tol);
            Shape::MultiLineString(arrangement.chains(&arrangement.edges))
        }
        _ => Shape::MultiPoint(dedup_points(
            inputs.iter().flat_map(|g| g.shape.points()).collect(),
            tol,
        )),
    };
    let shape = finish(shape, GeometryType::multi_for_dimension(dimension), false);
    debug!(inputs = geometries.len(), kind = %shape.geometry_type(), "Union");
    Ok(OpOutput::new(first.with_shape(shape), metadata).with_warnings(warnings))
}

// =============================================================================
// Intersection
// =============================================================================

/// Set intersection of two geometries.
///
/// Touching polygons give a lower-dimensional result: shared edges become
/// lines, shared vertices points. Intersections of lines give the
/// overlapping pieces when there are any, otherwise the crossing points.
/// An empty result is an empty multi geometry of the lower operand
/// dimension.
///
/// # Errors
///
/// `DimensionMismatch` when the CRSs differ.
pub fn intersection(a: &Geometry, b: &Geometry, tol: Tolerance) -> Result<OpOutput<Geometry>> {
    require_same_crs([a, b].into_iter())?;
    let metadata = ResultMetadata::new("intersection", a.crs.clone(), json!({}));
    let mut warnings = Vec::new();
    let a = prepare(a, 0, tol, &mut warnings);
    let b = prepare(b, 1, tol, &mut warnings);
    let (low, high) = if a.shape.dimension() <= b.shape.dimension() {
        (&a, &b)
    } else {
        (&b, &a)
    };
    let empty = GeometryType::multi_for_dimension(low.shape.dimension());

    let shape = if a.is_empty() || b.is_empty() {
        Shape::empty(empty)
    } else {
        intersect_shapes(&low.shape, &high.shape, tol)
    };
    let shape = finish(shape, empty, false);
    debug!(
        a = %a.geometry_type(),
        b = %b.geometry_type(),
        result = %shape.geometry_type(),
        "Intersection"
    );
    Ok(OpOutput::new(a.with_shape(shape), metadata).with_warnings(warnings))
}

/// `low` has dimension at most that of `high`.
fn intersect_shapes(low: &Shape, high: &Shape, tol: Tolerance) -> Shape {
    match (low.dimension(), high.dimension()) {
        (2, _) => {
            let (pa, pb) = (low.polygons(), high.polygons());
            let out = to_geo_multi_polygon(&pa).intersection(&to_geo_multi_polygon(&pb));
            let areal = non_sliver(from_geo_multi_polygon(&out), tol);
            if !areal.is_empty() {
                return Shape::MultiPolygon(areal);
            }
            let other = segments_of(&rings_of(&pb));
            let (lines, points) = classify_linework(&rings_of(&pa), &other, tol, |m| {
                on_any(&other, m, tol)
            });
            lines_or_points(lines, points, tol)
        }
        (1, 2) => {
            let polys = high.polygons();
            let boundary = segments_of(&rings_of(&polys));
            let (lines, points) = classify_linework(&low.lines(), &boundary, tol, |m| {
                point_in_polygons(m, &polys, tol) != Location::Outside
            });
            lines_or_points(lines, points, tol)
        }
        (1, _) => {
            let other = segments_of(&high.lines());
            let (lines, points) =
                classify_linework(&low.lines(), &other, tol, |m| on_any(&other, m, tol));
            lines_or_points(lines, points, tol)
        }
        (_, 2) => {
            let polys = high.polygons();
            Shape::MultiPoint(dedup_points(
                low.points()
                    .into_iter()
                    .filter(|p| point_in_polygons(*p, &polys, tol) != Location::Outside)
                    .collect(),
                tol,
            ))
        }
        (_, 1) => {
            let segments = segments_of(&high.lines());
            Shape::MultiPoint(dedup_points(
                low.points()
                    .into_iter()
                    .filter(|p| on_any(&segments, *p, tol))
                    .collect(),
                tol,
            ))
        }
        _ => {
            let others = high.points();
            Shape::MultiPoint(dedup_points(
                low.points()
                    .into_iter()
                    .filter(|p| others.iter().any(|q| coords_eq(*p, *q, tol)))
                    .collect(),
                tol,
            ))
        }
    }
}

// =============================================================================
// Merge
// =============================================================================

/// Combine two geometries of one dimension into a multi geometry.
///
/// Areal operands are dissolved; points and lines are concatenated.
///
/// # Errors
///
/// `DimensionMismatch` for different dimensions or CRSs.
pub fn merge(a: &Geometry, b: &Geometry, tol: Tolerance) -> Result<OpOutput<Geometry>> {
    require_same_crs([a, b].into_iter())?;
    if a.shape.dimension() != b.shape.dimension() {
        return Err(EngineError::DimensionMismatch(format!(
            "cannot merge {} with {}",
            a.geometry_type(),
            b.geometry_type()
        )));
    }
    let metadata = ResultMetadata::new("merge", a.crs.clone(), json!({}));
    let mut warnings: Vec<OpWarning> = Vec::new();
    let a = prepare(a, 0, tol, &mut warnings);
    let b = prepare(b, 1, tol, &mut warnings);
    let shape = match a.shape.dimension() {
        2 => {
            let merged = cascaded_union(vec![
                to_geo_multi_polygon(&a.shape.polygons()),
                to_geo_multi_polygon(&b.shape.polygons()),
            ]);
            Shape::MultiPolygon(non_sliver(from_geo_multi_polygon(&merged), tol))
        }
        1 => Shape::MultiLineString(a.shape.lines().into_iter().chain(b.shape.lines()).collect()),
        _ => Shape::MultiPoint(a.shape.points().into_iter().chain(b.shape.points()).collect()),
    };
    let kind = a.geometry_type().multi();
    Ok(OpOutput::new(a.with_shape(finish(shape, kind, true)), metadata).with_warnings(warnings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crs::CrsId;
    use crate::geometry::{area, geometric_eq, length};
    use crate::validation::validate;

    fn c(x: f64, y: f64) -> Coord {
        Coord { x, y }
    }

    fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> Geometry {
        Geometry::new(Shape::Polygon(Polygon::rect(x0, y0, x1, y1)), CrsId::web_mercator())
    }

    fn line(coords: &[(f64, f64)]) -> Geometry {
        Geometry::new(
            Shape::LineString(coords.iter().map(|&(x, y)| c(x, y)).collect()),
            CrsId::web_mercator(),
        )
    }

    fn tol() -> Tolerance {
        Tolerance::default()
    }

    // =========================================================================
    // Union
    // =========================================================================

    #[test]
    fn test_union_of_overlapping_squares() {
        let out = union(&[rect(0.0, 0.0, 1.0, 1.0), rect(0.5, 0.5, 1.5, 1.5)], tol()).unwrap();
        assert_eq!(out.value.geometry_type(), GeometryType::Polygon);
        assert!((area(&out.value.shape) - 1.75).abs() < 1e-9);
        assert!(validate(&out.value).valid);
    }

    #[test]
    fn test_union_commutative_and_idempotent() {
        let a = rect(0.0, 0.0, 2.0, 1.0);
        let b = rect(1.0, 0.0, 3.0, 2.0);
        let ab = union(&[a.clone(), b.clone()], tol()).unwrap().value;
        let ba = union(&[b, a], tol()).unwrap().value;
        assert!(geometric_eq(&ab.shape, &ba.shape, tol()));
        let again = union(&[ab.clone(), ab.clone()], tol()).unwrap().value;
        assert!(geometric_eq(&again.shape, &ab.shape, tol()));
    }

    #[test]
    fn test_union_mixed_dimensions() {
        let err = union(&[rect(0.0, 0.0, 1.0, 1.0), line(&[(0.0, 0.0), (1.0, 1.0)])], tol())
            .unwrap_err();
        assert!(matches!(err, EngineError::DimensionMismatch(_)));
        assert!(matches!(union(&[], tol()), Err(EngineError::InvalidInput(_))));
    }

    #[test]
    fn test_union_lines_dissolves_overlap() {
        let out = union(
            &[line(&[(0.0, 0.0), (2.0, 0.0)]), line(&[(1.0, 0.0), (3.0, 0.0)])],
            tol(),
        )
        .unwrap();
        assert!((length(&out.value.shape) - 3.0).abs() < 1e-9);
    }

    // =========================================================================
    // Intersection
    // =========================================================================

    #[test]
    fn test_intersection_overlap_area() {
        let out = intersection(&rect(0.0, 0.0, 2.0, 2.0), &rect(1.0, 1.0, 3.0, 3.0), tol()).unwrap();
        assert!((area(&out.value.shape) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_touching_polygons_share_edge() {
        let out = intersection(&rect(0.0, 0.0, 1.0, 1.0), &rect(1.0, 0.0, 2.0, 1.0), tol()).unwrap();
        assert_eq!(out.value.geometry_type(), GeometryType::LineString);
        assert!((length(&out.value.shape) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_touching_polygons_share_vertex() {
        let out = intersection(&rect(0.0, 0.0, 1.0, 1.0), &rect(1.0, 1.0, 2.0, 2.0), tol()).unwrap();
        assert_eq!(out.value.shape, Shape::Point(Some(c(1.0, 1.0))));
    }

    #[test]
    fn test_disjoint_intersection_is_empty() {
        let out = intersection(&rect(0.0, 0.0, 1.0, 1.0), &line(&[(5.0, 5.0), (6.0, 6.0)]), tol())
            .unwrap();
        assert!(out.value.is_empty());
        assert_eq!(out.value.geometry_type(), GeometryType::MultiLineString);
    }

    #[test]
    fn test_crossing_lines_give_point() {
        let out = intersection(
            &line(&[(0.0, 0.0), (2.0, 2.0)]),
            &line(&[(0.0, 2.0), (2.0, 0.0)]),
            tol(),
        )
        .unwrap();
        assert_eq!(out.value.shape, Shape::Point(Some(c(1.0, 1.0))));
    }

    #[test]
    fn test_line_through_polygon() {
        let out = intersection(&line(&[(-1.0, 0.5), (3.0, 0.5)]), &rect(0.0, 0.0, 2.0, 1.0), tol())
            .unwrap();
        assert_eq!(out.value.shape, Shape::LineString(vec![c(0.0, 0.5), c(2.0, 0.5)]));
    }

    #[test]
    fn test_intersection_crs_mismatch() {
        let other = Geometry::point(0.0, 0.0, CrsId::wgs84());
        assert!(matches!(
            intersection(&rect(0.0, 0.0, 1.0, 1.0), &other, tol()),
            Err(EngineError::DimensionMismatch(_))
        ));
    }

    // =========================================================================
    // Clip and merge
    // =========================================================================

    #[test]
    fn test_clip_keeps_dimension() {
        let mask = rect(0.0, 0.0, 2.0, 2.0);
        let out = clip(&line(&[(1.0, -1.0), (1.0, 3.0)]), &mask, tol()).unwrap();
        assert_eq!(out.value.shape, Shape::LineString(vec![c(1.0, 0.0), c(1.0, 2.0)]));

        let out = clip(&rect(1.0, 1.0, 3.0, 3.0), &mask, tol()).unwrap();
        assert_eq!(out.value.geometry_type(), GeometryType::Polygon);
        assert!((area(&out.value.shape) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_clip_disjoint_is_empty_of_input_type() {
        let out = clip(&rect(5.0, 5.0, 6.0, 6.0), &rect(0.0, 0.0, 1.0, 1.0), tol()).unwrap();
        assert!(out.value.is_empty());
        assert_eq!(out.value.geometry_type(), GeometryType::Polygon);
    }

    #[test]
    fn test_clip_requires_areal_mask() {
        let err = clip(&rect(0.0, 0.0, 1.0, 1.0), &line(&[(0.0, 0.0), (1.0, 1.0)]), tol())
            .unwrap_err();
        assert!(matches!(err, EngineError::DimensionMismatch(_)));
    }

    #[test]
    fn test_merge() {
        let out = merge(&rect(0.0, 0.0, 2.0, 2.0), &rect(1.0, 1.0, 3.0, 3.0), tol()).unwrap();
        assert_eq!(out.value.geometry_type(), GeometryType::MultiPolygon);
        assert!((area(&out.value.shape) - 7.0).abs() < 1e-9);

        let pts = merge(
            &Geometry::point(0.0, 0.0, CrsId::web_mercator()),
            &Geometry::point(1.0, 1.0, CrsId::web_mercator()),
            tol(),
        )
        .unwrap();
        assert_eq!(pts.value.shape, Shape::MultiPoint(vec![c(0.0, 0.0), c(1.0, 1.0)]));

        assert!(matches!(
            merge(&rect(0.0, 0.0, 1.0, 1.0), &line(&[(0.0, 0.0), (1.0, 1.0)]), tol()),
            Err(EngineError::DimensionMismatch(_))
        ));
    }
}
