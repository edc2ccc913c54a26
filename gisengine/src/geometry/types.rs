//! Geometry value types.
//!
//! Rings are stored exactly as supplied so that unclosed or mis-oriented
//! input stays observable to the validation engine. Conversions into `geo`
//! types (which close rings implicitly) live in [`super::convert`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::crs::CrsId;

/// A 2D coordinate.
pub type Coord = geo::Coord<f64>;

/// An ordered ring of coordinates. Closed when first == last.
pub type Ring = Vec<Coord>;

/// Polygon made of one exterior ring and zero or more interior rings.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Polygon {
    /// Outer boundary (counter-clockwise once valid)
    pub exterior: Ring,
    /// Holes (clockwise once valid)
    pub interiors: Vec<Ring>,
}

impl Polygon {
    /// Create a polygon from an exterior ring and holes.
    pub fn new(exterior: Ring, interiors: Vec<Ring>) -> Self {
        Self {
            exterior,
            interiors,
        }
    }

    /// Axis-aligned rectangle polygon, counter-clockwise and closed.
    pub fn rect(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self::new(
            vec![
                Coord { x: min_x, y: min_y },
                Coord { x: max_x, y: min_y },
                Coord { x: max_x, y: max_y },
                Coord { x: min_x, y: max_y },
                Coord { x: min_x, y: min_y },
            ],
            Vec::new(),
        )
    }

    /// Iterate over all rings, exterior first.
    pub fn rings(&self) -> impl Iterator<Item = &Ring> {
        std::iter::once(&self.exterior).chain(self.interiors.iter())
    }

    /// Returns true when the exterior ring has no coordinates.
    pub fn is_empty(&self) -> bool {
        self.exterior.is_empty()
    }
}

/// Closed set of geometry kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GeometryType {
    Point,
    LineString,
    Polygon,
    MultiPoint,
    MultiLineString,
    MultiPolygon,
}

impl GeometryType {
    /// Topological dimension: 0 for points, 1 for lines, 2 for polygons.
    pub fn dimension(self) -> u8 {
        match self {
            GeometryType::Point | GeometryType::MultiPoint => 0,
            GeometryType::LineString | GeometryType::MultiLineString => 1,
            GeometryType::Polygon | GeometryType::MultiPolygon => 2,
        }
    }

    /// Multi-part counterpart of this type.
    pub fn multi(self) -> Self {
        match self {
            GeometryType::Point | GeometryType::MultiPoint => GeometryType::MultiPoint,
            GeometryType::LineString | GeometryType::MultiLineString => {
                GeometryType::MultiLineString
            }
            GeometryType::Polygon | GeometryType::MultiPolygon => GeometryType::MultiPolygon,
        }
    }

    /// Multi-part type for a given dimension.
    pub fn multi_for_dimension(dimension: u8) -> Self {
        match dimension {
            0 => GeometryType::MultiPoint,
            1 => GeometryType::MultiLineString,
            _ => GeometryType::MultiPolygon,
        }
    }

    /// Upper-case WKT keyword.
    pub fn wkt_name(self) -> &'static str {
        match self {
            GeometryType::Point => "POINT",
            GeometryType::LineString => "LINESTRING",
            GeometryType::Polygon => "POLYGON",
            GeometryType::MultiPoint => "MULTIPOINT",
            GeometryType::MultiLineString => "MULTILINESTRING",
            GeometryType::MultiPolygon => "MULTIPOLYGON",
        }
    }

    /// GeoJSON `type` member.
    pub fn geojson_name(self) -> &'static str {
        match self {
            GeometryType::Point => "Point",
            GeometryType::LineString => "LineString",
            GeometryType::Polygon => "Polygon",
            GeometryType::MultiPoint => "MultiPoint",
            GeometryType::MultiLineString => "MultiLineString",
            GeometryType::MultiPolygon => "MultiPolygon",
        }
    }
}

impl fmt::Display for GeometryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.geojson_name())
    }
}

/// Coordinate content of a geometry, without CRS.
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    /// `None` is the empty point
    Point(Option<Coord>),
    LineString(Vec<Coord>),
    Polygon(Polygon),
    MultiPoint(Vec<Coord>),
    MultiLineString(Vec<Vec<Coord>>),
    MultiPolygon(Vec<Polygon>),
}

impl Shape {
    /// Empty value of the given type.
    pub fn empty(kind: GeometryType) -> Self {
        match kind {
            GeometryType::Point => Shape::Point(None),
            GeometryType::LineString => Shape::LineString(Vec::new()),
            GeometryType::Polygon => Shape::Polygon(Polygon::default()),
            GeometryType::MultiPoint => Shape::MultiPoint(Vec::new()),
            GeometryType::MultiLineString => Shape::MultiLineString(Vec::new()),
            GeometryType::MultiPolygon => Shape::MultiPolygon(Vec::new()),
        }
    }

    /// Geometry kind of this shape.
    pub fn geometry_type(&self) -> GeometryType {
        match self {
            Shape::Point(_) => GeometryType::Point,
            Shape::LineString(_) => GeometryType::LineString,
            Shape::Polygon(_) => GeometryType::Polygon,
            Shape::MultiPoint(_) => GeometryType::MultiPoint,
            Shape::MultiLineString(_) => GeometryType::MultiLineString,
            Shape::MultiPolygon(_) => GeometryType::MultiPolygon,
        }
    }

    /// Topological dimension of the shape's type.
    pub fn dimension(&self) -> u8 {
        self.geometry_type().dimension()
    }

    /// Returns true when the shape holds no coordinates.
    pub fn is_empty(&self) -> bool {
        match self {
            Shape::Point(p) => p.is_none(),
            Shape::LineString(ls) => ls.is_empty(),
            Shape::Polygon(poly) => poly.is_empty(),
            Shape::MultiPoint(pts) => pts.is_empty(),
            Shape::MultiLineString(lines) => lines.iter().all(|l| l.is_empty()),
            Shape::MultiPolygon(polys) => polys.iter().all(|p| p.is_empty()),
        }
    }

    /// All coordinates in storage order.
    pub fn coords(&self) -> Vec<Coord> {
        match self {
            Shape::Point(p) => p.iter().copied().collect(),
            Shape::LineString(ls) => ls.clone(),
            Shape::MultiPoint(pts) => pts.clone(),
            Shape::Polygon(poly) => poly.rings().flatten().copied().collect(),
            Shape::MultiLineString(lines) => lines.iter().flatten().copied().collect(),
            Shape::MultiPolygon(polys) => polys
                .iter()
                .flat_map(|p| p.rings())
                .flatten()
                .copied()
                .collect(),
        }
    }

    /// Number of stored coordinates.
    pub fn num_coords(&self) -> usize {
        match self {
            Shape::Point(p) => usize::from(p.is_some()),
            Shape::LineString(ls) | Shape::MultiPoint(ls) => ls.len(),
            Shape::Polygon(poly) => poly.rings().map(Vec::len).sum(),
            Shape::MultiLineString(lines) => lines.iter().map(Vec::len).sum(),
            Shape::MultiPolygon(polys) => polys
                .iter()
                .flat_map(|p| p.rings())
                .map(Vec::len)
                .sum(),
        }
    }

    /// Apply a coordinate transformation, keeping structure.
    pub fn try_map_coords<E>(
        &self,
        f: &mut impl FnMut(Coord) -> Result<Coord, E>,
    ) -> Result<Shape, E> {
        fn map_seq<E>(
            seq: &[Coord],
            f: &mut impl FnMut(Coord) -> Result<Coord, E>,
        ) -> Result<Vec<Coord>, E> {
            seq.iter().map(|c| f(*c)).collect()
        }
        fn map_poly<E>(
            poly: &Polygon,
            f: &mut impl FnMut(Coord) -> Result<Coord, E>,
        ) -> Result<Polygon, E> {
            Ok(Polygon {
                exterior: map_seq(&poly.exterior, f)?,
                interiors: poly
                    .interiors
                    .iter()
                    .map(|r| map_seq(r, f))
                    .collect::<Result<_, E>>()?,
            })
        }

        Ok(match self {
            Shape::Point(p) => Shape::Point(p.map(&mut *f).transpose()?),
            Shape::LineString(ls) => Shape::LineString(map_seq(ls, f)?),
            Shape::MultiPoint(pts) => Shape::MultiPoint(map_seq(pts, f)?),
            Shape::Polygon(poly) => Shape::Polygon(map_poly(poly, f)?),
            Shape::MultiLineString(lines) => Shape::MultiLineString(
                lines
                    .iter()
                    .map(|l| map_seq(l, f))
                    .collect::<Result<_, E>>()?,
            ),
            Shape::MultiPolygon(polys) => Shape::MultiPolygon(
                polys
                    .iter()
                    .map(|p| map_poly(p, f))
                    .collect::<Result<_, E>>()?,
            ),
        })
    }

    /// Polygon parts of an areal shape (empty for other dimensions).
    pub fn polygons(&self) -> Vec<Polygon> {
        match self {
            Shape::Polygon(p) if !p.is_empty() => vec![p.clone()],
            Shape::MultiPolygon(ps) => ps.iter().filter(|p| !p.is_empty()).cloned().collect(),
            _ => Vec::new(),
        }
    }

    /// Line parts of a lineal shape (empty for other dimensions).
    pub fn lines(&self) -> Vec<Vec<Coord>> {
        match self {
            Shape::LineString(ls) if !ls.is_empty() => vec![ls.clone()],
            Shape::MultiLineString(lines) => {
                lines.iter().filter(|l| !l.is_empty()).cloned().collect()
            }
            _ => Vec::new(),
        }
    }

    /// Point parts of a puntal shape (empty for other dimensions).
    pub fn points(&self) -> Vec<Coord> {
        match self {
            Shape::Point(Some(p)) => vec![*p],
            Shape::MultiPoint(pts) => pts.clone(),
            _ => Vec::new(),
        }
    }

    /// Build the multi-part shape of a dimension from its parts.
    pub fn from_polygons(mut polys: Vec<Polygon>) -> Shape {
        polys.retain(|p| !p.is_empty());
        Shape::MultiPolygon(polys)
    }

    /// Collapse single-part multi geometries to their single counterpart.
    pub fn normalized(self) -> Shape {
        match self {
            Shape::MultiPoint(mut pts) if pts.len() == 1 => Shape::Point(pts.pop()),
            Shape::MultiLineString(mut lines) if lines.len() == 1 => {
                Shape::LineString(lines.pop().unwrap_or_default())
            }
            Shape::MultiPolygon(mut polys) if polys.len() == 1 => {
                Shape::Polygon(polys.pop().unwrap_or_default())
            }
            other => other,
        }
    }
}

/// A shape tagged with its coordinate reference system.
#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    /// Coordinates
    pub shape: Shape,
    /// Coordinate reference system
    pub crs: CrsId,
}

impl Geometry {
    /// Create a geometry.
    pub fn new(shape: Shape, crs: CrsId) -> Self {
        Self { shape, crs }
    }

    /// Empty geometry of the given type.
    pub fn empty(kind: GeometryType, crs: CrsId) -> Self {
        Self::new(Shape::empty(kind), crs)
    }

    /// Point geometry.
    pub fn point(x: f64, y: f64, crs: CrsId) -> Self {
        Self::new(Shape::Point(Some(Coord { x, y })), crs)
    }

    /// Polygon geometry from a single exterior ring of `(x, y)` pairs.
    pub fn polygon_from_tuples(exterior: &[(f64, f64)], crs: CrsId) -> Self {
        let ring = exterior.iter().map(|&(x, y)| Coord { x, y }).collect();
        Self::new(Shape::Polygon(Polygon::new(ring, Vec::new())), crs)
    }

    /// Geometry kind.
    pub fn geometry_type(&self) -> GeometryType {
        self.shape.geometry_type()
    }

    /// Returns true when the geometry holds no coordinates.
    pub fn is_empty(&self) -> bool {
        self.shape.is_empty()
    }

    /// Same CRS, new shape.
    pub fn with_shape(&self, shape: Shape) -> Geometry {
        Geometry::new(shape, self.crs.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(x: f64, y: f64) -> Coord {
        Coord { x, y }
    }

    #[test]
    fn test_empty_shapes_report_empty() {
        for kind in [
            GeometryType::Point,
            GeometryType::LineString,
            GeometryType::Polygon,
            GeometryType::MultiPoint,
            GeometryType::MultiLineString,
            GeometryType::MultiPolygon,
        ] {
            let shape = Shape::empty(kind);
            assert!(shape.is_empty(), "{kind} should be empty");
            assert_eq!(shape.geometry_type(), kind);
        }
    }

    #[test]
    fn test_dimension_and_multi() {
        assert_eq!(GeometryType::Point.dimension(), 0);
        assert_eq!(GeometryType::MultiLineString.dimension(), 1);
        assert_eq!(GeometryType::Polygon.multi(), GeometryType::MultiPolygon);
        assert_eq!(
            GeometryType::multi_for_dimension(1),
            GeometryType::MultiLineString
        );
    }

    #[test]
    fn test_rect_is_closed() {
        let rect = Polygon::rect(0.0, 0.0, 2.0, 1.0);
        assert_eq!(rect.exterior.first(), rect.exterior.last());
        assert_eq!(rect.exterior.len(), 5);
    }

    #[test]
    fn test_num_coords_counts_all_rings() {
        let poly = Polygon::new(
            Polygon::rect(0.0, 0.0, 10.0, 10.0).exterior,
            vec![Polygon::rect(1.0, 1.0, 2.0, 2.0).exterior],
        );
        assert_eq!(Shape::Polygon(poly).num_coords(), 10);
    }

    #[test]
    fn test_normalized_unwraps_single_parts() {
        let shape = Shape::MultiPoint(vec![c(1.0, 2.0)]).normalized();
        assert_eq!(shape, Shape::Point(Some(c(1.0, 2.0))));

        let shape = Shape::MultiPoint(vec![c(1.0, 2.0), c(3.0, 4.0)]).normalized();
        assert_eq!(shape.geometry_type(), GeometryType::MultiPoint);
    }

    #[test]
    fn test_try_map_coords_preserves_structure() {
        let shape = Shape::Polygon(Polygon::rect(0.0, 0.0, 1.0, 1.0));
        let shifted = shape
            .try_map_coords::<()>(&mut |c| Ok(Coord { x: c.x + 1.0, y: c.y }))
            .unwrap();
        match shifted {
            Shape::Polygon(p) => {
                assert_eq!(p.exterior[0], c(1.0, 0.0));
                assert_eq!(p.exterior.len(), 5);
            }
            other => panic!("unexpected shape {other:?}"),
        }
    }
}
