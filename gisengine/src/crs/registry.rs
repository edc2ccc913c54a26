//! Resolution of CRS identifiers to definitions.

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::id::{CrsId, EPSG_WEB_MERCATOR, EPSG_WGS84};
use crate::error::{EngineError, Result};

/// Linear unit of a CRS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Units {
    Degrees,
    Metres,
}

impl Units {
    pub fn as_str(self) -> &'static str {
        match self {
            Units::Degrees => "degrees",
            Units::Metres => "metres",
        }
    }
}

/// How coordinates of a CRS relate to WGS84 lon/lat.
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    /// WGS84 lon/lat itself
    Wgs84,
    /// Spherical Web Mercator, handled analytically
    WebMercator,
    /// Any other definition expressed as a PROJ.4 string
    Proj4(String),
}

/// Resolved CRS definition.
#[derive(Debug, Clone, PartialEq)]
pub struct CrsDefinition {
    pub id: CrsId,
    pub name: String,
    pub projection: Projection,
    pub units: Units,
}

impl CrsDefinition {
    /// Geographic CRSs carry degree units.
    pub fn is_geographic(&self) -> bool {
        self.units == Units::Degrees
    }
}

/// PROJ.4 string of the WGS84 lon/lat pivot used by general transforms.
pub const WGS84_PROJ4: &str = "+proj=longlat +datum=WGS84 +no_defs";

/// Built-in definition for an EPSG code.
pub fn builtin_definition(code: u32) -> Option<CrsDefinition> {
    let (name, projection, units) = match code {
        EPSG_WGS84 => ("WGS 84".to_string(), Projection::Wgs84, Units::Degrees),
        EPSG_WEB_MERCATOR => (
            "WGS 84 / Pseudo-Mercator".to_string(),
            Projection::WebMercator,
            Units::Metres,
        ),
        4258 => (
            "ETRS89".to_string(),
            Projection::Proj4("+proj=longlat +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +no_defs".into()),
            Units::Degrees,
        ),
        4269 => (
            "NAD83".to_string(),
            Projection::Proj4("+proj=longlat +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +no_defs".into()),
            Units::Degrees,
        ),
        3395 => (
            "WGS 84 / World Mercator".to_string(),
            Projection::Proj4(
                "+proj=merc +lon_0=0 +k=1 +x_0=0 +y_0=0 +datum=WGS84 +units=m +no_defs".into(),
            ),
            Units::Metres,
        ),
        32601..=32660 => {
            let zone = code - 32600;
            (
                format!("WGS 84 / UTM zone {zone}N"),
                Projection::Proj4(format!("+proj=utm +zone={zone} +datum=WGS84 +units=m +no_defs")),
                Units::Metres,
            )
        }
        32701..=32760 => {
            let zone = code - 32700;
            (
                format!("WGS 84 / UTM zone {zone}S"),
                Projection::Proj4(format!(
                    "+proj=utm +zone={zone} +south +datum=WGS84 +units=m +no_defs"
                )),
                Units::Metres,
            )
        }
        _ => return None,
    };
    Some(CrsDefinition {
        id: CrsId::epsg(code),
        name,
        projection,
        units,
    })
}

/// Registry of known CRS definitions.
///
/// Built-in EPSG codes resolve without registration; custom definitions are
/// added with [`CrsRegistry::register_proj4`]. Cheap to clone (shared state).
#[derive(Debug, Clone, Default)]
pub struct CrsRegistry {
    custom: Arc<DashMap<CrsId, CrsDefinition>>,
}

impl CrsRegistry {
    /// Registry with only the built-in definitions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a custom definition.
    pub fn register_proj4(
        &self,
        id: CrsId,
        name: impl Into<String>,
        proj4: impl Into<String>,
        units: Units,
    ) {
        let def = CrsDefinition {
            id: id.clone(),
            name: name.into(),
            projection: Projection::Proj4(proj4.into()),
            units,
        };
        debug!(crs = %id, "Registered custom CRS definition");
        self.custom.insert(id, def);
    }

    /// Resolve an identifier.
    ///
    /// # Errors
    ///
    /// `UnsupportedCrs` when the identifier is neither registered nor built in.
    pub fn resolve(&self, id: &CrsId) -> Result<CrsDefinition> {
        if let Some(def) = self.custom.get(id) {
            return Ok(def.value().clone());
        }
        id.epsg_code()
            .and_then(builtin_definition)
            .ok_or_else(|| EngineError::UnsupportedCrs(id.to_string()))
    }

    /// Returns true when [`resolve`](Self::resolve) would succeed.
    pub fn is_known(&self, id: &CrsId) -> bool {
        self.resolve(id).is_ok()
    }

    /// Units of a CRS.
    pub fn units(&self, id: &CrsId) -> Result<Units> {
        Ok(self.resolve(id)?.units)
    }
}
