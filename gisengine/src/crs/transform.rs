//! Coordinate transformation between registered CRSs.
//!
//! Every transform pivots through WGS84 lon/lat degrees. WGS84 itself and
//! spherical Web Mercator are handled with inline math; everything else goes
//! through `proj4rs`, which works in radians for geographic systems.

use std::f64::consts::PI;
use std::fmt;

use proj4rs::proj::Proj;
use tracing::trace;

use super::id::CrsId;
use super::registry::{CrsDefinition, CrsRegistry, Projection, WGS84_PROJ4};
use crate::error::{EngineError, Result};
use crate::geometry::{Coord, Geometry};

/// Earth radius used by spherical Web Mercator, in metres.
pub const EARTH_RADIUS: f64 = 6_378_137.0;

/// Latitude limit of Web Mercator, in degrees.
pub const MAX_MERCATOR_LAT: f64 = 85.051_128_78;

/// Project WGS84 lon/lat degrees to Web Mercator metres.
#[inline]
pub fn lonlat_to_mercator(lon: f64, lat: f64) -> Result<(f64, f64)> {
    if !(-MAX_MERCATOR_LAT..=MAX_MERCATOR_LAT).contains(&lat) {
        return Err(EngineError::InvalidInput(format!(
            "latitude {lat} outside Web Mercator range"
        )));
    }
    let x = lon.to_radians() * EARTH_RADIUS;
    let lat_rad = lat * PI / 180.0;
    let y = lat_rad.tan().asinh() * EARTH_RADIUS;
    Ok((x, y))
}

/// Inverse of [`lonlat_to_mercator`].
#[inline]
pub fn mercator_to_lonlat(x: f64, y: f64) -> (f64, f64) {
    let lon = (x / EARTH_RADIUS).to_degrees();
    let lat = (y / EARTH_RADIUS).sinh().atan().to_degrees();
    (lon, lat)
}

/// UTM zone CRS (WGS84 datum) containing a lon/lat position.
pub fn utm_zone_for(lon: f64, lat: f64) -> CrsId {
    let zone = (((lon + 180.0) / 6.0).floor() as i64).clamp(0, 59) as u32 + 1;
    if lat >= 0.0 {
        CrsId::epsg(32600 + zone)
    } else {
        CrsId::epsg(32700 + zone)
    }
}

enum Side {
    Wgs84,
    WebMercator,
    Proj { proj: Proj, geographic: bool },
}

impl Side {
    fn new(def: &CrsDefinition) -> Result<Self> {
        Ok(match &def.projection {
            Projection::Wgs84 => Side::Wgs84,
            Projection::WebMercator => Side::WebMercator,
            Projection::Proj4(s) => Side::Proj {
                proj: Proj::from_proj_string(s).map_err(|e| {
                    EngineError::UnsupportedCrs(format!("{}: {e:?}", def.id))
                })?,
                geographic: def.is_geographic(),
            },
        })
    }
}

/// Reusable transformer between two CRSs.
pub struct CrsTransformer {
    source: CrsId,
    target: CrsId,
    from: Side,
    to: Side,
    pivot: Option<Proj>,
}

impl fmt::Debug for CrsTransformer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrsTransformer")
            .field("source", &self.source)
            .field("target", &self.target)
            .field("identity", &self.is_identity())
            .finish_non_exhaustive()
    }
}

impl CrsTransformer {
    /// Build a transformer, resolving both identifiers.
    ///
    /// # Errors
    ///
    /// `UnsupportedCrs` when either identifier cannot be resolved or its
    /// definition is rejected by `proj4rs`.
    pub fn new(registry: &CrsRegistry, source: &CrsId, target: &CrsId) -> Result<Self> {
        let src_def = registry.resolve(source)?;
        let dst_def = registry.resolve(target)?;
        let identity = source == target;
        let from = if identity { Side::Wgs84 } else { Side::new(&src_def)? };
        let to = if identity { Side::Wgs84 } else { Side::new(&dst_def)? };
        let needs_pivot = matches!(from, Side::Proj { .. }) || matches!(to, Side::Proj { .. });
        let pivot = if needs_pivot {
            Some(Proj::from_proj_string(WGS84_PROJ4).map_err(|e| {
                EngineError::UnsupportedCrs(format!("WGS84 pivot: {e:?}"))
            })?)
        } else {
            None
        };
        trace!(source = %source, target = %target, identity, "Created CRS transformer");
        Ok(Self {
            source: source.clone(),
            target: target.clone(),
            from,
            to,
            pivot,
        })
    }

    /// Source and target are the same CRS.
    pub fn is_identity(&self) -> bool {
        self.source == self.target
    }

    pub fn source(&self) -> &CrsId {
        &self.source
    }

    pub fn target(&self) -> &CrsId {
        &self.target
    }

    fn run_proj(&self, src: &Proj, dst: &Proj, x: f64, y: f64) -> Result<(f64, f64)> {
        let mut point = (x, y, 0.0);
        proj4rs::transform::transform(src, dst, &mut point).map_err(|e| {
            EngineError::InvalidInput(format!(
                "transform {} -> {} failed at ({x}, {y}): {e:?}",
                self.source, self.target
            ))
        })?;
        Ok((point.0, point.1))
    }

    fn to_lonlat(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        match (&self.from, &self.pivot) {
            (Side::Wgs84, _) => Ok((x, y)),
            (Side::WebMercator, _) => Ok(mercator_to_lonlat(x, y)),
            (Side::Proj { proj, geographic }, Some(pivot)) => {
                let (x, y) = if *geographic {
                    (x.to_radians(), y.to_radians())
                } else {
                    (x, y)
                };
                let (lon, lat) = self.run_proj(proj, pivot, x, y)?;
                Ok((lon.to_degrees(), lat.to_degrees()))
            }
            (Side::Proj { .. }, None) => Err(EngineError::UnsupportedCrs(self.source.to_string())),
        }
    }

    fn from_lonlat(&self, lon: f64, lat: f64) -> Result<(f64, f64)> {
        match (&self.to, &self.pivot) {
            (Side::Wgs84, _) => Ok((lon, lat)),
            (Side::WebMercator, _) => lonlat_to_mercator(lon, lat),
            (Side::Proj { proj, geographic }, Some(pivot)) => {
                let (x, y) = self.run_proj(pivot, proj, lon.to_radians(), lat.to_radians())?;
                if *geographic {
                    Ok((x.to_degrees(), y.to_degrees()))
                } else {
                    Ok((x, y))
                }
            }
            (Side::Proj { .. }, None) => Err(EngineError::UnsupportedCrs(self.target.to_string())),
        }
    }

    /// Transform one coordinate.
    ///
    /// # Errors
    ///
    /// `InvalidInput` when the position lies outside the target's domain or
    /// the result is not finite.
    pub fn transform(&self, c: Coord) -> Result<Coord> {
        if self.is_identity() {
            return Ok(c);
        }
        let (lon, lat) = self.to_lonlat(c.x, c.y)?;
        let (x, y) = self.from_lonlat(lon, lat)?;
        if !x.is_finite() || !y.is_finite() {
            return Err(EngineError::InvalidInput(format!(
                "({}, {}) has no finite image in {}",
                c.x, c.y, self.target
            )));
        }
        Ok(Coord { x, y })
    }

    /// Transform every coordinate of a geometry, keeping its structure.
    pub fn transform_geometry(&self, geometry: &Geometry) -> Result<Geometry> {
        if self.is_identity() {
            return Ok(Geometry::new(geometry.shape.clone(), self.target.clone()));
        }
        let shape = geometry.shape.try_map_coords(&mut |c| self.transform(c))?;
        Ok(Geometry::new(shape, self.target.clone()))
    }
}

/// Reproject a geometry into `target`.
///
/// # Errors
///
/// `UnsupportedCrs` when either side is unknown to the registry.
pub fn reproject(registry: &CrsRegistry, geometry: &Geometry, target: &CrsId) -> Result<Geometry> {
    let transformer = CrsTransformer::new(registry, &geometry.crs, target)?;
    transformer.transform_geometry(geometry)
}
