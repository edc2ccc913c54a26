//! Geometry repair.
//!
//! Steps, each idempotent, applied in order: drop non-finite and duplicate
//! consecutive points, close rings, fix ring orientation, then rebuild
//! polygons whose rings still cross or overlap.

use tracing::debug;

use super::noding::{cascaded_union, rebuild_polygon};
use super::{members_overlap, polygon_self_intersects, validate_shape, IssueKind};
use crate::geometry::{
    coords_eq, from_geo_multi_polygon, is_non_finite, ring_orientation, signed_area,
    to_geo_polygon, Coord, Geometry, Orientation, Polygon, Ring, Shape, Tolerance,
};

/// Result of [`repair`].
#[derive(Debug, Clone, PartialEq)]
pub struct RepairOutcome {
    /// Valid geometry, or an empty geometry of the input type
    pub geometry: Geometry,
    /// Issues found in the input
    pub issues: Vec<IssueKind>,
    /// False when the input was already valid and is returned as is
    pub changed: bool,
}

/// Repair with the default tolerance.
pub fn repair(geometry: &Geometry) -> RepairOutcome {
    repair_with(geometry, Tolerance::default())
}

/// Repair a geometry. Never fails.
///
/// A Polygon whose self-intersection splits it comes back as a
/// MultiPolygon. Inputs below the minimum point count come back empty.
pub fn repair_with(geometry: &Geometry, tol: Tolerance) -> RepairOutcome {
    let report = validate_shape(&geometry.shape, tol);
    if report.valid {
        return RepairOutcome {
            geometry: geometry.clone(),
            issues: Vec::new(),
            changed: false,
        };
    }
    let shape = repair_shape(&geometry.shape, tol);
    debug!(
        kind = %geometry.geometry_type(),
        issues = ?report.issues,
        result = %shape.geometry_type(),
        "Repaired geometry"
    );
    RepairOutcome {
        geometry: geometry.with_shape(shape),
        issues: report.issues,
        changed: true,
    }
}

fn repair_shape(shape: &Shape, tol: Tolerance) -> Shape {
    match shape {
        Shape::Point(p) => Shape::Point(p.filter(|c| !is_non_finite(*c))),
        Shape::MultiPoint(pts) => {
            Shape::MultiPoint(pts.iter().copied().filter(|c| !is_non_finite(*c)).collect())
        }
        Shape::LineString(ls) => Shape::LineString(clean_line(ls, tol).unwrap_or_default()),
        Shape::MultiLineString(lines) => {
            Shape::MultiLineString(lines.iter().filter_map(|l| clean_line(l, tol)).collect())
        }
        Shape::Polygon(poly) => {
            let mut parts = repair_polygon(poly, tol);
            match parts.len() {
                0 => Shape::Polygon(Polygon::default()),
                1 => Shape::Polygon(parts.remove(0)),
                _ => Shape::MultiPolygon(parts),
            }
        }
        Shape::MultiPolygon(polys) => {
            let mut parts: Vec<Polygon> = polys.iter().flat_map(|p| repair_polygon(p, tol)).collect();
            if parts.len() > 1 && members_overlap(&parts, tol) {
                let merged = cascaded_union(
                    parts
                        .iter()
                        .map(|p| geo::MultiPolygon::new(vec![to_geo_polygon(p)]))
                        .collect(),
                );
                parts = from_geo_multi_polygon(&merged)
                    .into_iter()
                    .filter_map(|p| tidy(&p, tol))
                    .collect();
            }
            Shape::MultiPolygon(parts)
        }
    }
}

/// Drop non-finite and consecutive duplicate points.
fn clean_sequence(seq: &[Coord], tol: Tolerance) -> Vec<Coord> {
    let mut out: Vec<Coord> = Vec::with_capacity(seq.len());
    for &c in seq {
        if is_non_finite(c) {
            continue;
        }
        if out.last().map_or(true, |last| !coords_eq(*last, c, tol)) {
            out.push(c);
        }
    }
    out
}

fn clean_line(line: &[Coord], tol: Tolerance) -> Option<Vec<Coord>> {
    let cleaned = clean_sequence(line, tol);
    (cleaned.len() >= 2).then_some(cleaned)
}

/// Cleaned and closed ring, or `None` below three distinct points.
fn clean_ring(ring: &[Coord], tol: Tolerance) -> Option<Ring> {
    let mut cleaned = clean_sequence(ring, tol);
    while cleaned.len() > 1 && coords_eq(cleaned[0], cleaned[cleaned.len() - 1], tol) {
        cleaned.pop();
    }
    if cleaned.len() < 3 {
        return None;
    }
    cleaned.push(cleaned[0]);
    Some(cleaned)
}

fn orient(ring: &mut Ring, counter_clockwise: bool) {
    let area = signed_area(ring);
    if area != 0.0 && (area > 0.0) != counter_clockwise {
        ring.reverse();
    }
}

fn is_degenerate(ring: &[Coord]) -> bool {
    ring_orientation(ring, Tolerance(0.0)) == Orientation::Degenerate
}

/// Clean rings produced by overlay and drop sub-tolerance areas.
fn tidy(poly: &Polygon, tol: Tolerance) -> Option<Polygon> {
    let mut exterior = clean_ring(&poly.exterior, tol)?;
    if signed_area(&exterior).abs() <= tol.0 {
        return None;
    }
    orient(&mut exterior, true);
    let interiors = poly
        .interiors
        .iter()
        .filter_map(|h| clean_ring(h, tol))
        .filter(|h| signed_area(h).abs() > tol.0)
        .map(|mut h| {
            orient(&mut h, false);
            h
        })
        .collect();
    Some(Polygon::new(exterior, interiors))
}

fn repair_polygon(poly: &Polygon, tol: Tolerance) -> Vec<Polygon> {
    let Some(mut exterior) = clean_ring(&poly.exterior, tol) else {
        return Vec::new();
    };
    let mut interiors: Vec<Ring> = poly
        .interiors
        .iter()
        .filter_map(|h| clean_ring(h, tol))
        .collect();
    orient(&mut exterior, true);
    for hole in &mut interiors {
        orient(hole, false);
    }
    let cleaned = Polygon::new(exterior, interiors);

    let degenerate = cleaned.rings().any(|r| is_degenerate(r));
    if !degenerate && !polygon_self_intersects(&cleaned, tol) {
        return vec![cleaned];
    }
    rebuild_polygon(&cleaned, tol)
        .iter()
        .filter_map(|p| tidy(p, tol))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crs::CrsId;
    use crate::geometry::{area, GeometryType};
    use crate::validation::validate;

    fn c(x: f64, y: f64) -> Coord {
        Coord { x, y }
    }

    fn polygon(coords: &[(f64, f64)]) -> Geometry {
        Geometry::polygon_from_tuples(coords, CrsId::wgs84())
    }

    #[test]
    fn test_valid_input_unchanged() {
        let square = polygon(&[(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0), (0.0, 0.0)]);
        let outcome = repair(&square);
        assert!(!outcome.changed);
        assert_eq!(outcome.geometry, square);
    }

    #[test]
    fn test_closes_and_orients_ring() {
        let cw_open = polygon(&[(0.0, 0.0), (0.0, 1.0), (1.0, 1.0), (1.0, 0.0)]);
        let outcome = repair(&cw_open);
        assert!(outcome.issues.contains(&IssueKind::UnclosedRing));
        assert!(outcome.issues.contains(&IssueKind::WrongOrientation));
        assert!(validate(&outcome.geometry).valid);
        assert_eq!(area(&outcome.geometry.shape), 1.0);
    }

    #[test]
    fn test_bowtie_becomes_multipolygon() {
        let bowtie = polygon(&[(0.0, 0.0), (2.0, 2.0), (2.0, 0.0), (0.0, 2.0), (0.0, 0.0)]);
        let outcome = repair(&bowtie);
        assert!(validate(&outcome.geometry).valid, "{:?}", outcome.geometry);
        assert!((area(&outcome.geometry.shape) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_spike_removed() {
        let spiky = polygon(&[
            (0.0, 0.0),
            (2.0, 0.0),
            (2.0, 2.0),
            (3.0, 2.0),
            (2.0, 2.0),
            (0.0, 2.0),
            (0.0, 0.0),
        ]);
        let outcome = repair(&spiky);
        assert!(validate(&outcome.geometry).valid, "{:?}", outcome.geometry);
        assert!((area(&outcome.geometry.shape) - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_degenerate_ring_repairs_to_empty() {
        let sliver = polygon(&[(0.0, 0.0), (1.0, 0.0), (0.0, 0.0)]);
        let outcome = repair(&sliver);
        assert!(outcome.geometry.is_empty());
        assert_eq!(outcome.geometry.geometry_type(), GeometryType::Polygon);
        assert_eq!(validate(&outcome.geometry).issues, vec![IssueKind::EmptyGeometry]);
    }

    #[test]
    fn test_line_duplicates_and_nan_dropped() {
        let line = Geometry::new(
            Shape::LineString(vec![c(0.0, 0.0), c(0.0, 0.0), c(f64::NAN, 1.0), c(1.0, 1.0)]),
            CrsId::wgs84(),
        );
        let outcome = repair(&line);
        assert_eq!(outcome.geometry.shape, Shape::LineString(vec![c(0.0, 0.0), c(1.0, 1.0)]));
    }

    #[test]
    fn test_overlapping_members_merged() {
        let mp = Geometry::new(
            Shape::MultiPolygon(vec![
                Polygon::rect(0.0, 0.0, 2.0, 2.0),
                Polygon::rect(1.0, 1.0, 3.0, 3.0),
            ]),
            CrsId::wgs84(),
        );
        let outcome = repair(&mp);
        assert!(validate(&outcome.geometry).valid);
        assert!((area(&outcome.geometry.shape) - 7.0).abs() < 1e-9);
    }

    #[test]
    fn test_repair_is_idempotent() {
        let bowtie = polygon(&[(0.0, 0.0), (2.0, 2.0), (2.0, 0.0), (0.0, 2.0), (0.0, 0.0)]);
        let once = repair(&bowtie).geometry;
        let twice = repair(&once);
        assert!(!twice.changed);
        assert_eq!(twice.geometry, once);
    }
}
