//! Exact relational predicates.
//!
//! Bounding boxes reject disjoint pairs cheaply; the remaining pairs are
//! decided with a DE-9IM matrix from `geo::Relate`.

use geo::Relate;

use super::convert::to_geo_geometry;
use super::measure::bounding_box;
use super::types::Shape;

/// Spatial predicate used by joins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpatialPredicate {
    Intersects,
    /// Left contains right
    Contains,
    /// Left lies within right
    Within,
}

fn boxes_meet(a: &Shape, b: &Shape) -> bool {
    match (bounding_box(a), bounding_box(b)) {
        (Some(ba), Some(bb)) => ba.intersects(&bb),
        _ => false,
    }
}

/// Shapes share at least one point.
pub fn intersects(a: &Shape, b: &Shape) -> bool {
    if !boxes_meet(a, b) {
        return false;
    }
    to_geo_geometry(a)
        .relate(&to_geo_geometry(b))
        .is_intersects()
}

/// `a` contains `b`: no point of `b` outside `a` and interiors meet.
pub fn contains(a: &Shape, b: &Shape) -> bool {
    if !boxes_meet(a, b) {
        return false;
    }
    to_geo_geometry(a).relate(&to_geo_geometry(b)).is_contains()
}

/// `a` lies within `b`.
pub fn within(a: &Shape, b: &Shape) -> bool {
    contains(b, a)
}

/// Evaluate a predicate for `(left, right)`.
pub fn evaluate(predicate: SpatialPredicate, left: &Shape, right: &Shape) -> bool {
    match predicate {
        SpatialPredicate::Intersects => intersects(left, right),
        SpatialPredicate::Contains => contains(left, right),
        SpatialPredicate::Within => within(left, right),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Coord, Polygon};

    fn pt(x: f64, y: f64) -> Shape {
        Shape::Point(Some(Coord { x, y }))
    }

    #[test]
    fn test_point_in_square_intersects_and_within() {
        let square = Shape::Polygon(Polygon::rect(-1.0, -1.0, 1.0, 1.0));
        assert!(intersects(&pt(0.0, 0.0), &square));
        assert!(within(&pt(0.0, 0.0), &square));
        assert!(contains(&square, &pt(0.0, 0.0)));
    }

    #[test]
    fn test_disjoint_shapes() {
        let square = Shape::Polygon(Polygon::rect(0.0, 0.0, 1.0, 1.0));
        assert!(!intersects(&pt(5.0, 5.0), &square));
        assert!(!evaluate(SpatialPredicate::Within, &pt(5.0, 5.0), &square));
    }

    #[test]
    fn test_touching_squares_intersect_but_do_not_contain() {
        let a = Shape::Polygon(Polygon::rect(0.0, 0.0, 1.0, 1.0));
        let b = Shape::Polygon(Polygon::rect(1.0, 0.0, 2.0, 1.0));
        assert!(intersects(&a, &b));
        assert!(!contains(&a, &b));
    }

    #[test]
    fn test_empty_never_intersects() {
        let square = Shape::Polygon(Polygon::rect(0.0, 0.0, 1.0, 1.0));
        assert!(!intersects(&Shape::Point(None), &square));
    }
}
