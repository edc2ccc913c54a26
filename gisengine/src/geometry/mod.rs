//! Geometry kernel.
//!
//! Canonical in-memory geometry representation plus the low-level predicates
//! every other engine component builds on: point-in-polygon, segment
//! intersection, bounding boxes, area/length/centroid, ring orientation and
//! epsilon-tolerant coordinate equality.
//!
//! All functions here are deterministic and pure; there is no global state.
//!
//! # Example
//!
//! ```
//! use gisengine::crs::CrsId;
//! use gisengine::geometry::{area, Geometry};
//!
//! let square = Geometry::polygon_from_tuples(
//!     &[(0.0, 0.0), (4.0, 0.0), (4.0, 4.0), (0.0, 4.0), (0.0, 0.0)],
//!     CrsId::wgs84(),
//! );
//! assert_eq!(area(&square.shape), 16.0);
//! ```

mod canonical;
mod convert;
mod measure;
mod predicates;
mod relate;
mod types;

pub use canonical::{canonicalize, geometric_eq};
pub use convert::{
    from_geo_multi_line_string, from_geo_multi_polygon, from_geo_polygon, to_geo_geometry,
    to_geo_multi_line_string, to_geo_multi_polygon, to_geo_polygon,
};
pub use measure::{
    area, bounding_box, centroid, distance_to_coord, length, polygon_area, BoundingBox,
};
pub use predicates::{
    coords_eq, cross, interior_point, is_non_finite, point_in_polygon, point_in_polygons,
    point_in_ring, point_on_segment, point_segment_distance, ring_orientation,
    segment_intersection, segments_intersect, signed_area, Location, Orientation,
    SegmentIntersection, Tolerance, DEFAULT_EPSILON,
};
pub use relate::{contains, evaluate, intersects, within, SpatialPredicate};
pub use types::{Coord, Geometry, GeometryType, Polygon, Ring, Shape};
