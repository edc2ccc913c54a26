//! Coordinate reference systems.
//!
//! [`CrsId`] names a CRS, [`CrsRegistry`] resolves names to definitions and
//! [`CrsTransformer`] moves coordinates between two resolved definitions.
//! Raster reprojection lives in [`crate::raster`] and uses the same
//! transformer per cell.

mod id;
mod registry;
mod transform;

pub use id::{CrsId, EPSG_WEB_MERCATOR, EPSG_WGS84};
pub use registry::{builtin_definition, CrsDefinition, CrsRegistry, Projection, Units, WGS84_PROJ4};
pub use transform::{
    lonlat_to_mercator, mercator_to_lonlat, reproject, utm_zone_for, CrsTransformer,
    EARTH_RADIUS, MAX_MERCATOR_LAT,
};
