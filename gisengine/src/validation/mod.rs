//! Validation and repair engine.
//!
//! [`validate`] classifies every way a geometry breaks the validity rules;
//! [`repair`] turns any input into a valid geometry of the same dimension
//! (or an empty one when too few points survive cleaning).
//!
//! Validity rules:
//!
//! - every ordinate is finite
//! - no consecutive duplicate points, no sub-tolerance segments
//! - points hold 1 coordinate, lines 2 distinct ones, rings 3 distinct ones
//! - rings are closed; exteriors counter-clockwise, holes clockwise
//! - rings neither cross nor overlap themselves or each other; holes lie
//!   inside their exterior; multi-polygon members do not overlap
//!
//! Rings touching at a single vertex are accepted.

mod noding;
mod policy;
mod repair;

use serde::{Deserialize, Serialize};

use crate::geometry::{
    bounding_box, coords_eq, interior_point, is_non_finite, point_in_polygon, point_in_ring,
    ring_orientation, segment_intersection, Coord, Geometry, Location, Orientation, Polygon,
    SegmentIntersection, Shape, Tolerance,
};

pub use noding::cascaded_union;
pub use policy::EditPolicy;
pub use repair::{repair, repair_with, RepairOutcome};

pub(crate) use noding::{candidate_pairs, Arrangement};

/// Kind of validity problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IssueKind {
    SelfIntersection,
    UnclosedRing,
    WrongOrientation,
    DuplicateConsecutivePoints,
    ZeroLengthSegment,
    EmptyGeometry,
    NaNCoordinate,
}

/// Outcome of [`validate`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    /// Distinct issue kinds in order of detection
    pub issues: Vec<IssueKind>,
}

impl ValidationReport {
    /// Report contains the given issue kind.
    pub fn has(&self, kind: IssueKind) -> bool {
        self.issues.contains(&kind)
    }

    fn push(&mut self, kind: IssueKind) {
        if !self.issues.contains(&kind) {
            self.issues.push(kind);
        }
    }
}

/// Validate a geometry with the default tolerance.
pub fn validate(geometry: &Geometry) -> ValidationReport {
    validate_shape(&geometry.shape, Tolerance::default())
}

/// Validate a shape with an explicit tolerance.
pub fn validate_shape(shape: &Shape, tol: Tolerance) -> ValidationReport {
    let mut report = ValidationReport::default();

    if shape.coords().into_iter().any(is_non_finite) {
        report.push(IssueKind::NaNCoordinate);
    }
    if shape.is_empty() {
        report.push(IssueKind::EmptyGeometry);
    } else {
        match shape {
            Shape::Point(_) | Shape::MultiPoint(_) => {}
            Shape::LineString(ls) => check_line(ls, tol, &mut report),
            Shape::MultiLineString(lines) => {
                for line in lines {
                    check_line(line, tol, &mut report);
                }
            }
            Shape::Polygon(poly) => check_polygon(poly, tol, &mut report),
            Shape::MultiPolygon(polys) => {
                for poly in polys {
                    check_polygon(poly, tol, &mut report);
                }
                if members_overlap(polys, tol) {
                    report.push(IssueKind::SelfIntersection);
                }
            }
        }
    }

    report.valid = report.issues.is_empty();
    report
}

/// Number of points left after dropping non-finite and consecutive duplicates.
fn distinct_count(seq: &[Coord], tol: Tolerance, cyclic: bool) -> usize {
    let mut kept: Vec<Coord> = Vec::with_capacity(seq.len());
    for &c in seq.iter().filter(|c| !is_non_finite(**c)) {
        if kept.last().map_or(true, |last| !coords_eq(*last, c, tol)) {
            kept.push(c);
        }
    }
    if cyclic {
        while kept.len() > 1 && coords_eq(kept[0], kept[kept.len() - 1], tol) {
            kept.pop();
        }
    }
    kept.len()
}

fn check_sequence(seq: &[Coord], tol: Tolerance, report: &mut ValidationReport) {
    for w in seq.windows(2) {
        if w[0] == w[1] {
            report.push(IssueKind::DuplicateConsecutivePoints);
        } else if coords_eq(w[0], w[1], tol) {
            report.push(IssueKind::ZeroLengthSegment);
        }
    }
}

fn check_line(line: &[Coord], tol: Tolerance, report: &mut ValidationReport) {
    check_sequence(line, tol, report);
    if distinct_count(line, tol, false) < 2 {
        report.push(IssueKind::EmptyGeometry);
    }
}

fn check_ring(ring: &[Coord], exterior: bool, tol: Tolerance, report: &mut ValidationReport) {
    check_sequence(ring, tol, report);
    if ring.first() != ring.last() {
        report.push(IssueKind::UnclosedRing);
    }
    if distinct_count(ring, tol, true) < 3 {
        report.push(IssueKind::EmptyGeometry);
        return;
    }
    let expected = if exterior {
        Orientation::CounterClockwise
    } else {
        Orientation::Clockwise
    };
    match ring_orientation(ring, Tolerance(0.0)) {
        Orientation::Degenerate => report.push(IssueKind::SelfIntersection),
        found if found != expected => report.push(IssueKind::WrongOrientation),
        _ => {}
    }
}

fn check_polygon(poly: &Polygon, tol: Tolerance, report: &mut ValidationReport) {
    if poly.is_empty() {
        report.push(IssueKind::EmptyGeometry);
        return;
    }
    for (i, ring) in poly.rings().enumerate() {
        check_ring(ring, i == 0, tol, report);
    }
    if polygon_self_intersects(poly, tol) {
        report.push(IssueKind::SelfIntersection);
    }
}

/// A segment of a ring, tagged with its ring and position.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RingSegment {
    pub ring: usize,
    pub index: usize,
    pub a: Coord,
    pub b: Coord,
}

/// Segments of a set of rings, closing unclosed rings and skipping
/// sub-tolerance segments.
pub(crate) fn ring_segments(rings: &[&[Coord]], tol: Tolerance) -> (Vec<RingSegment>, Vec<usize>) {
    let mut segments = Vec::new();
    let mut counts = Vec::with_capacity(rings.len());
    for (r, ring) in rings.iter().enumerate() {
        let mut pts: Vec<Coord> = ring.iter().copied().filter(|c| !is_non_finite(*c)).collect();
        if pts.len() > 1 && pts.first() != pts.last() {
            pts.push(pts[0]);
        }
        let mut index = 0;
        for w in pts.windows(2) {
            if coords_eq(w[0], w[1], tol) {
                continue;
            }
            segments.push(RingSegment {
                ring: r,
                index,
                a: w[0],
                b: w[1],
            });
            index += 1;
        }
        counts.push(index);
    }
    (segments, counts)
}

fn adjacent(s: &RingSegment, t: &RingSegment, counts: &[usize]) -> bool {
    if s.ring != t.ring {
        return false;
    }
    let n = counts[s.ring];
    let (i, j) = (s.index.min(t.index), s.index.max(t.index));
    j - i == 1 || (i == 0 && j + 1 == n)
}

/// Rings cross or overlap each other or themselves.
///
/// Shared vertices and vertex-on-edge touches are not reported.
pub(crate) fn rings_cross(rings: &[&[Coord]], tol: Tolerance) -> bool {
    let (segments, counts) = ring_segments(rings, tol);
    let boxes: Vec<_> = segments.iter().map(|s| (s.a, s.b)).collect();
    for (i, j) in candidate_pairs(&boxes) {
        let (s, t) = (&segments[i], &segments[j]);
        match segment_intersection(s.a, s.b, t.a, t.b, tol) {
            SegmentIntersection::None => {}
            SegmentIntersection::Overlap(p, q) => {
                if !coords_eq(p, q, tol) {
                    return true;
                }
            }
            SegmentIntersection::Point(p) => {
                if adjacent(s, t, &counts) {
                    continue;
                }
                let on_s = coords_eq(p, s.a, tol) || coords_eq(p, s.b, tol);
                let on_t = coords_eq(p, t.a, tol) || coords_eq(p, t.b, tol);
                if !on_s && !on_t {
                    return true;
                }
            }
        }
    }
    false
}

/// Polygon rings cross, a hole escapes the exterior, or holes nest.
pub(crate) fn polygon_self_intersects(poly: &Polygon, tol: Tolerance) -> bool {
    let rings: Vec<&[Coord]> = poly.rings().map(|r| r.as_slice()).collect();
    if rings_cross(&rings, tol) {
        return true;
    }
    for (i, hole) in poly.interiors.iter().enumerate() {
        if hole
            .iter()
            .any(|c| point_in_ring(*c, &poly.exterior, tol) == Location::Outside)
        {
            return true;
        }
        let Some(p) = interior_point(hole) else {
            continue;
        };
        if poly
            .interiors
            .iter()
            .enumerate()
            .any(|(j, other)| j != i && point_in_ring(p, other, tol) == Location::Inside)
        {
            return true;
        }
    }
    false
}

/// Members of a multi-polygon share interior area.
pub(crate) fn members_overlap(polys: &[Polygon], tol: Tolerance) -> bool {
    let boxes: Vec<_> = polys.iter().map(|p| bounding_box(&Shape::Polygon(p.clone()))).collect();
    for i in 0..polys.len() {
        for j in i + 1..polys.len() {
            let (Some(bi), Some(bj)) = (boxes[i], boxes[j]) else {
                continue;
            };
            if !bi.intersects(&bj) {
                continue;
            }
            let rings: Vec<&[Coord]> = polys[i]
                .rings()
                .chain(polys[j].rings())
                .map(|r| r.as_slice())
                .collect();
            if rings_cross(&rings, tol) {
                return true;
            }
            let inside = |a: &Polygon, b: &Polygon| {
                interior_point(&a.exterior)
                    .is_some_and(|p| point_in_polygon(p, b, tol) == Location::Inside)
            };
            if inside(&polys[i], &polys[j]) || inside(&polys[j], &polys[i]) {
                return true;
            }
        }
    }
    false
}
