//! Low-level geometric predicates.
//!
//! All functions are pure and take an explicit [`Tolerance`] so that rounding
//! noise from the operation engine is absorbed consistently.

use super::types::{Coord, Polygon};

/// Default comparison epsilon in projected-unit space.
pub const DEFAULT_EPSILON: f64 = 1e-9;

/// Caller-configurable comparison tolerance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tolerance(pub f64);

impl Tolerance {
    /// Tolerance value.
    #[inline]
    pub fn eps(self) -> f64 {
        self.0
    }
}

impl Default for Tolerance {
    fn default() -> Self {
        Self(DEFAULT_EPSILON)
    }
}

/// Coordinate equality within tolerance (per axis).
#[inline]
pub fn coords_eq(a: Coord, b: Coord, tol: Tolerance) -> bool {
    (a.x - b.x).abs() <= tol.0 && (a.y - b.y).abs() <= tol.0
}

/// Returns true when any ordinate is NaN or infinite.
#[inline]
pub fn is_non_finite(c: Coord) -> bool {
    !c.x.is_finite() || !c.y.is_finite()
}

/// Twice the signed area of triangle (a, b, c); positive when counter-clockwise.
#[inline]
pub fn cross(a: Coord, b: Coord, c: Coord) -> f64 {
    (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)
}

/// Signed area of a ring (shoelace). Positive for counter-clockwise rings.
///
/// Unclosed rings are treated as if closed.
pub fn signed_area(ring: &[Coord]) -> f64 {
    if ring.len() < 3 {
        return 0.0;
    }
    let mut sum = 0.0;
    for i in 0..ring.len() {
        let a = ring[i];
        let b = ring[(i + 1) % ring.len()];
        sum += a.x * b.y - b.x * a.y;
    }
    sum / 2.0
}

/// Winding direction of a ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    CounterClockwise,
    Clockwise,
    /// Zero (or sub-tolerance) area
    Degenerate,
}

/// Ring orientation from the sign of its signed area.
pub fn ring_orientation(ring: &[Coord], tol: Tolerance) -> Orientation {
    let area = signed_area(ring);
    if area > tol.0 {
        Orientation::CounterClockwise
    } else if area < -tol.0 {
        Orientation::Clockwise
    } else {
        Orientation::Degenerate
    }
}

/// Position of a point relative to an areal geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    Inside,
    Boundary,
    Outside,
}

/// Returns true when `p` lies on segment `a`-`b` within tolerance.
pub fn point_on_segment(p: Coord, a: Coord, b: Coord, tol: Tolerance) -> bool {
    point_segment_distance(p, a, b) <= tol.0
}

/// Euclidean distance from `p` to segment `a`-`b`.
pub fn point_segment_distance(p: Coord, a: Coord, b: Coord) -> f64 {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let len2 = dx * dx + dy * dy;
    if len2 == 0.0 {
        return ((p.x - a.x).powi(2) + (p.y - a.y).powi(2)).sqrt();
    }
    let t = (((p.x - a.x) * dx + (p.y - a.y) * dy) / len2).clamp(0.0, 1.0);
    let proj = Coord {
        x: a.x + t * dx,
        y: a.y + t * dy,
    };
    ((p.x - proj.x).powi(2) + (p.y - proj.y).powi(2)).sqrt()
}

/// Locate a point against a single ring using the crossing-number rule.
pub fn point_in_ring(p: Coord, ring: &[Coord], tol: Tolerance) -> Location {
    let n = ring.len();
    if n < 3 {
        return Location::Outside;
    }
    let mut inside = false;
    for i in 0..n {
        let a = ring[i];
        let b = ring[(i + 1) % n];
        if point_on_segment(p, a, b, tol) {
            return Location::Boundary;
        }
        if (a.y > p.y) != (b.y > p.y) {
            let x_at = a.x + (p.y - a.y) * (b.x - a.x) / (b.y - a.y);
            if p.x < x_at {
                inside = !inside;
            }
        }
    }
    if inside {
        Location::Inside
    } else {
        Location::Outside
    }
}

/// Locate a point against a polygon with holes.
pub fn point_in_polygon(p: Coord, poly: &Polygon, tol: Tolerance) -> Location {
    match point_in_ring(p, &poly.exterior, tol) {
        Location::Outside => Location::Outside,
        Location::Boundary => Location::Boundary,
        Location::Inside => {
            for hole in &poly.interiors {
                match point_in_ring(p, hole, tol) {
                    Location::Inside => return Location::Outside,
                    Location::Boundary => return Location::Boundary,
                    Location::Outside => {}
                }
            }
            Location::Inside
        }
    }
}

/// Locate a point against a set of polygons.
pub fn point_in_polygons(p: Coord, polys: &[Polygon], tol: Tolerance) -> Location {
    let mut on_boundary = false;
    for poly in polys {
        match point_in_polygon(p, poly, tol) {
            Location::Inside => return Location::Inside,
            Location::Boundary => on_boundary = true,
            Location::Outside => {}
        }
    }
    if on_boundary {
        Location::Boundary
    } else {
        Location::Outside
    }
}

/// Result of intersecting two segments.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SegmentIntersection {
    None,
    /// Single shared point
    Point(Coord),
    /// Collinear overlap between two points
    Overlap(Coord, Coord),
}

/// Intersect segment `a1`-`a2` with `b1`-`b2`.
pub fn segment_intersection(
    a1: Coord,
    a2: Coord,
    b1: Coord,
    b2: Coord,
    tol: Tolerance,
) -> SegmentIntersection {
    let r = Coord {
        x: a2.x - a1.x,
        y: a2.y - a1.y,
    };
    let s = Coord {
        x: b2.x - b1.x,
        y: b2.y - b1.y,
    };
    let denom = r.x * s.y - r.y * s.x;
    let qp = Coord {
        x: b1.x - a1.x,
        y: b1.y - a1.y,
    };
    let r_len = (r.x * r.x + r.y * r.y).sqrt();
    let s_len = (s.x * s.x + s.y * s.y).sqrt();
    let scale = (r_len * s_len).max(f64::MIN_POSITIVE);

    if denom.abs() <= tol.0 * scale {
        // Parallel: collinear only if b1 lies on the line through a
        let dist = if r_len > 0.0 {
            (qp.x * r.y - qp.y * r.x).abs() / r_len
        } else {
            (qp.x * qp.x + qp.y * qp.y).sqrt()
        };
        if dist > tol.0 {
            return SegmentIntersection::None;
        }
        if r_len == 0.0 {
            return if point_on_segment(a1, b1, b2, tol) {
                SegmentIntersection::Point(a1)
            } else {
                SegmentIntersection::None
            };
        }
        let rr = r.x * r.x + r.y * r.y;
        let t_of = |p: Coord| ((p.x - a1.x) * r.x + (p.y - a1.y) * r.y) / rr;
        let (mut t0, mut t1) = (t_of(b1), t_of(b2));
        if t0 > t1 {
            std::mem::swap(&mut t0, &mut t1);
        }
        let lo = t0.max(0.0);
        let hi = t1.min(1.0);
        let eps_t = tol.0 / r_len;
        if lo > hi + eps_t {
            return SegmentIntersection::None;
        }
        let at = |t: f64| Coord {
            x: a1.x + t * r.x,
            y: a1.y + t * r.y,
        };
        if (hi - lo) * r_len <= tol.0 {
            return SegmentIntersection::Point(at(lo.min(1.0)));
        }
        return SegmentIntersection::Overlap(at(lo), at(hi));
    }

    let t = (qp.x * s.y - qp.y * s.x) / denom;
    let u = (qp.x * r.y - qp.y * r.x) / denom;
    let eps_t = if r_len > 0.0 { tol.0 / r_len } else { 0.0 };
    let eps_u = if s_len > 0.0 { tol.0 / s_len } else { 0.0 };
    if t < -eps_t || t > 1.0 + eps_t || u < -eps_u || u > 1.0 + eps_u {
        return SegmentIntersection::None;
    }
    let t = t.clamp(0.0, 1.0);
    SegmentIntersection::Point(Coord {
        x: a1.x + t * r.x,
        y: a1.y + t * r.y,
    })
}

/// Returns true when the segments intersect in any way.
pub fn segments_intersect(a1: Coord, a2: Coord, b1: Coord, b2: Coord, tol: Tolerance) -> bool {
    !matches!(
        segment_intersection(a1, a2, b1, b2, tol),
        SegmentIntersection::None
    )
}

/// A point strictly inside a simple ring.
///
/// Casts a horizontal scan line between two distinct vertex ordinates near
/// the middle of the ring and returns the midpoint of the widest interior
/// span. Returns `None` for rings without area.
pub fn interior_point(ring: &[Coord]) -> Option<Coord> {
    if ring.len() < 3 {
        return None;
    }
    let mut ys: Vec<f64> = ring.iter().map(|c| c.y).filter(|y| y.is_finite()).collect();
    ys.sort_by(f64::total_cmp);
    ys.dedup();
    if ys.len() < 2 {
        return None;
    }
    let min_y = ys[0];
    let max_y = ys[ys.len() - 1];
    let mid = (min_y + max_y) / 2.0;

    // Try the gap nearest the middle first, then widen outwards.
    let mut gaps: Vec<(f64, f64)> = ys.windows(2).map(|w| (w[0], w[1])).collect();
    gaps.sort_by(|a, b| {
        let da = ((a.0 + a.1) / 2.0 - mid).abs();
        let db = ((b.0 + b.1) / 2.0 - mid).abs();
        da.total_cmp(&db)
    });

    for (lo, hi) in gaps {
        let y = (lo + hi) / 2.0;
        let mut xs = Vec::new();
        let n = ring.len();
        for i in 0..n {
            let a = ring[i];
            let b = ring[(i + 1) % n];
            if (a.y > y) != (b.y > y) {
                xs.push(a.x + (y - a.y) * (b.x - a.x) / (b.y - a.y));
            }
        }
        xs.sort_by(f64::total_cmp);
        let best = xs
            .chunks_exact(2)
            .map(|pair| (pair[0], pair[1]))
            .filter(|(x0, x1)| x1 > x0)
            .max_by(|a, b| (a.1 - a.0).total_cmp(&(b.1 - b.0)));
        if let Some((x0, x1)) = best {
            return Some(Coord {
                x: (x0 + x1) / 2.0,
                y,
            });
        }
    }
    None
}
