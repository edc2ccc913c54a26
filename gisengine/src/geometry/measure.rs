//! Bounding boxes, measures and point distances.

use serde::{Deserialize, Serialize};

use super::predicates::{
    point_in_polygon, point_segment_distance, signed_area, Location, Tolerance,
};
use super::types::{Coord, Polygon, Shape};

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    /// Create a box from corner ordinates (normalised so min <= max).
    pub fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self {
            min_x: x0.min(x1),
            min_y: y0.min(y1),
            max_x: x0.max(x1),
            max_y: y0.max(y1),
        }
    }

    /// Box around a single coordinate.
    pub fn from_coord(c: Coord) -> Self {
        Self::new(c.x, c.y, c.x, c.y)
    }

    /// Grow to include a coordinate.
    pub fn expand(&mut self, c: Coord) {
        self.min_x = self.min_x.min(c.x);
        self.min_y = self.min_y.min(c.y);
        self.max_x = self.max_x.max(c.x);
        self.max_y = self.max_y.max(c.y);
    }

    /// Smallest box covering both.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }

    /// Boxes share at least one point (closed intervals).
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_x <= other.max_x
            && other.min_x <= self.max_x
            && self.min_y <= other.max_y
            && other.min_y <= self.max_y
    }

    /// Coordinate lies inside or on the box.
    pub fn contains_coord(&self, c: Coord) -> bool {
        c.x >= self.min_x && c.x <= self.max_x && c.y >= self.min_y && c.y <= self.max_y
    }

    /// Box grown by `margin` on all sides.
    pub fn buffered(&self, margin: f64) -> BoundingBox {
        BoundingBox {
            min_x: self.min_x - margin,
            min_y: self.min_y - margin,
            max_x: self.max_x + margin,
            max_y: self.max_y + margin,
        }
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Distance from a coordinate to the box (0 inside).
    pub fn distance_to(&self, c: Coord) -> f64 {
        let dx = (self.min_x - c.x).max(0.0).max(c.x - self.max_x);
        let dy = (self.min_y - c.y).max(0.0).max(c.y - self.max_y);
        (dx * dx + dy * dy).sqrt()
    }

    /// Closed polygon covering the box.
    pub fn to_polygon(&self) -> Polygon {
        Polygon::rect(self.min_x, self.min_y, self.max_x, self.max_y)
    }
}

/// Bounding box of all finite coordinates, `None` when there are none.
pub fn bounding_box(shape: &Shape) -> Option<BoundingBox> {
    let mut iter = shape
        .coords()
        .into_iter()
        .filter(|c| c.x.is_finite() && c.y.is_finite());
    let first = iter.next()?;
    let mut bbox = BoundingBox::from_coord(first);
    for c in iter {
        bbox.expand(c);
    }
    Some(bbox)
}

/// Unsigned area of a polygon: exterior minus holes.
pub fn polygon_area(poly: &Polygon) -> f64 {
    let outer = signed_area(&poly.exterior).abs();
    let holes: f64 = poly.interiors.iter().map(|r| signed_area(r).abs()).sum();
    (outer - holes).max(0.0)
}

/// Area of a shape; zero for points and lines.
pub fn area(shape: &Shape) -> f64 {
    shape.polygons().iter().map(polygon_area).sum()
}

fn path_length(path: &[Coord]) -> f64 {
    path.windows(2)
        .map(|w| ((w[1].x - w[0].x).powi(2) + (w[1].y - w[0].y).powi(2)).sqrt())
        .sum()
}

/// Length of lines, or perimeter of polygons (all rings). Zero for points.
pub fn length(shape: &Shape) -> f64 {
    match shape.dimension() {
        1 => shape.lines().iter().map(|l| path_length(l)).sum(),
        2 => shape
            .polygons()
            .iter()
            .flat_map(|p| p.rings().map(|r| path_length(r)).collect::<Vec<_>>())
            .sum(),
        _ => 0.0,
    }
}

fn ring_centroid(ring: &[Coord]) -> Option<(Coord, f64)> {
    let a = signed_area(ring);
    if a == 0.0 {
        return None;
    }
    let n = ring.len();
    let (mut cx, mut cy) = (0.0, 0.0);
    for i in 0..n {
        let p = ring[i];
        let q = ring[(i + 1) % n];
        let f = p.x * q.y - q.x * p.y;
        cx += (p.x + q.x) * f;
        cy += (p.y + q.y) * f;
    }
    Some((
        Coord {
            x: cx / (6.0 * a),
            y: cy / (6.0 * a),
        },
        a.abs(),
    ))
}

/// Centroid, weighted by area, length or count depending on dimension.
///
/// Falls back to a lower-dimension centroid when the shape is degenerate
/// (zero-area polygon, zero-length line).
pub fn centroid(shape: &Shape) -> Option<Coord> {
    if shape.dimension() == 2 {
        let (mut sx, mut sy, mut total) = (0.0, 0.0, 0.0);
        for poly in shape.polygons() {
            for (i, ring) in poly.rings().enumerate() {
                if let Some((c, a)) = ring_centroid(ring) {
                    let w = if i == 0 { a } else { -a };
                    sx += c.x * w;
                    sy += c.y * w;
                    total += w;
                }
            }
        }
        if total > 0.0 {
            return Some(Coord {
                x: sx / total,
                y: sy / total,
            });
        }
    }
    if shape.dimension() >= 1 {
        let (mut sx, mut sy, mut total) = (0.0, 0.0, 0.0);
        let paths: Vec<Vec<Coord>> = match shape.dimension() {
            1 => shape.lines(),
            _ => shape
                .polygons()
                .iter()
                .flat_map(|p| p.rings().cloned().collect::<Vec<_>>())
                .collect(),
        };
        for path in &paths {
            for w in path.windows(2) {
                let len = ((w[1].x - w[0].x).powi(2) + (w[1].y - w[0].y).powi(2)).sqrt();
                sx += (w[0].x + w[1].x) / 2.0 * len;
                sy += (w[0].y + w[1].y) / 2.0 * len;
                total += len;
            }
        }
        if total > 0.0 {
            return Some(Coord {
                x: sx / total,
                y: sy / total,
            });
        }
    }
    let coords = shape.coords();
    if coords.is_empty() {
        return None;
    }
    let n = coords.len() as f64;
    Some(Coord {
        x: coords.iter().map(|c| c.x).sum::<f64>() / n,
        y: coords.iter().map(|c| c.y).sum::<f64>() / n,
    })
}

/// True distance from a coordinate to a shape.
///
/// Zero when the point lies inside or on an areal shape. `None` for empty
/// shapes.
pub fn distance_to_coord(shape: &Shape, p: Coord) -> Option<f64> {
    if shape.is_empty() {
        return None;
    }
    let polys = shape.polygons();
    if polys
        .iter()
        .any(|poly| point_in_polygon(p, poly, Tolerance(0.0)) != Location::Outside)
    {
        return Some(0.0);
    }

    let mut best = f64::INFINITY;
    let mut visit_path = |path: &[Coord]| {
        if path.len() == 1 {
            best = best.min(((p.x - path[0].x).powi(2) + (p.y - path[0].y).powi(2)).sqrt());
        }
        for w in path.windows(2) {
            best = best.min(point_segment_distance(p, w[0], w[1]));
        }
    };
    match shape.dimension() {
        0 => {
            for c in shape.points() {
                visit_path(&[c]);
            }
        }
        1 => {
            for line in shape.lines() {
                visit_path(&line);
            }
        }
        _ => {
            for poly in &polys {
                for ring in poly.rings() {
                    visit_path(ring);
                }
            }
        }
    }
    best.is_finite().then_some(best)
}
