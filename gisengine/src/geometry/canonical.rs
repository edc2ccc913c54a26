//! Canonical ordering and geometric equality.

use std::cmp::Ordering;

use geo::BooleanOps;

use super::convert::to_geo_multi_polygon;
use super::measure::area;
use super::predicates::{coords_eq, Tolerance};
use super::types::{Coord, Polygon, Shape};

fn cmp_coord(a: &Coord, b: &Coord) -> Ordering {
    a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y))
}

fn canonical_ring(ring: &[Coord]) -> Vec<Coord> {
    if ring.len() < 2 {
        return ring.to_vec();
    }
    let closed = ring.first() == ring.last();
    let body = if closed { &ring[..ring.len() - 1] } else { ring };
    let start = body
        .iter()
        .enumerate()
        .min_by(|a, b| cmp_coord(a.1, b.1))
        .map(|(i, _)| i)
        .unwrap_or(0);
    let mut out: Vec<Coord> = body[start..].iter().chain(&body[..start]).copied().collect();
    if closed {
        out.push(out[0]);
    }
    out
}

fn canonical_polygon(poly: &Polygon) -> Polygon {
    let mut interiors: Vec<Vec<Coord>> = poly.interiors.iter().map(|r| canonical_ring(r)).collect();
    interiors.sort_by(|a, b| cmp_first(a, b));
    Polygon::new(canonical_ring(&poly.exterior), interiors)
}

fn cmp_first(a: &[Coord], b: &[Coord]) -> Ordering {
    match (a.first(), b.first()) {
        (Some(x), Some(y)) => cmp_coord(x, y).then(a.len().cmp(&b.len())),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Canonical form: rings start at their smallest vertex, parts are sorted.
///
/// Two shapes describing the same point set through the same vertices end up
/// structurally identical, which makes set-operation output independent of
/// input order.
pub fn canonicalize(shape: &Shape) -> Shape {
    match shape {
        Shape::Polygon(p) => Shape::Polygon(canonical_polygon(p)),
        Shape::MultiPolygon(ps) => {
            let mut polys: Vec<Polygon> = ps.iter().map(canonical_polygon).collect();
            polys.sort_by(|a, b| cmp_first(&a.exterior, &b.exterior));
            Shape::MultiPolygon(polys)
        }
        Shape::MultiPoint(pts) => {
            let mut pts = pts.clone();
            pts.sort_by(cmp_coord);
            Shape::MultiPoint(pts)
        }
        Shape::MultiLineString(lines) => {
            let mut lines = lines.clone();
            lines.sort_by(|a, b| cmp_first(a, b));
            Shape::MultiLineString(lines)
        }
        other => other.clone(),
    }
}

/// Geometric equality up to `tol`.
///
/// Areal shapes compare by the area of their symmetric difference; other
/// shapes compare vertex-wise after canonicalisation.
pub fn geometric_eq(a: &Shape, b: &Shape, tol: Tolerance) -> bool {
    if a.is_empty() || b.is_empty() {
        return a.is_empty() && b.is_empty();
    }
    if a.dimension() != b.dimension() {
        return false;
    }
    if a.dimension() == 2 {
        let ma = to_geo_multi_polygon(&a.polygons());
        let mb = to_geo_multi_polygon(&b.polygons());
        let diff = ma.xor(&mb);
        let parts = super::convert::from_geo_multi_polygon(&diff);
        return area(&Shape::MultiPolygon(parts)) <= tol.0.max(1e-12) * (1.0 + area(a));
    }
    let ca = canonicalize(&a.clone().normalized()).coords();
    let cb = canonicalize(&b.clone().normalized()).coords();
    ca.len() == cb.len() && ca.iter().zip(&cb).all(|(x, y)| coords_eq(*x, *y, tol))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(x: f64, y: f64) -> Coord {
        Coord { x, y }
    }

    #[test]
    fn test_canonical_ring_rotation() {
        let ring = vec![c(1.0, 1.0), c(0.0, 1.0), c(0.0, 0.0), c(1.0, 0.0), c(1.0, 1.0)];
        let out = canonical_ring(&ring);
        assert_eq!(out[0], c(0.0, 0.0));
        assert_eq!(out.first(), out.last());
        assert_eq!(out.len(), 5);
    }

    #[test]
    fn test_canonicalize_sorts_parts() {
        let a = Polygon::rect(5.0, 5.0, 6.0, 6.0);
        let b = Polygon::rect(0.0, 0.0, 1.0, 1.0);
        let s1 = canonicalize(&Shape::MultiPolygon(vec![a.clone(), b.clone()]));
        let s2 = canonicalize(&Shape::MultiPolygon(vec![b, a]));
        assert_eq!(s1, s2);
    }

    #[test]
    fn test_geometric_eq_ignores_start_vertex() {
        let a = Shape::Polygon(Polygon::rect(0.0, 0.0, 1.0, 1.0));
        let b = Shape::Polygon(Polygon::new(
            vec![c(1.0, 1.0), c(0.0, 1.0), c(0.0, 0.0), c(1.0, 0.0), c(1.0, 1.0)],
            vec![],
        ));
        assert!(geometric_eq(&a, &b, Tolerance::default()));
    }

    #[test]
    fn test_geometric_eq_detects_difference() {
        let a = Shape::Polygon(Polygon::rect(0.0, 0.0, 1.0, 1.0));
        let b = Shape::Polygon(Polygon::rect(0.0, 0.0, 1.0, 2.0));
        assert!(!geometric_eq(&a, &b, Tolerance::default()));
    }
}
