//! CRS identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a coordinate reference system, e.g. `EPSG:4326`.
///
/// Common spellings (`4326`, `epsg:4326`, `urn:ogc:def:crs:EPSG::4326`,
/// `CRS84`) are normalised on parse. Anything else is kept verbatim and only
/// fails when it is resolved against a [`super::CrsRegistry`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CrsId(String);

/// WGS84 geographic (lon/lat degrees)
pub const EPSG_WGS84: u32 = 4326;
/// Spherical Web Mercator (metres)
pub const EPSG_WEB_MERCATOR: u32 = 3857;

impl CrsId {
    /// Identifier for an EPSG code.
    pub fn epsg(code: u32) -> Self {
        Self(format!("EPSG:{code}"))
    }

    /// WGS84 lon/lat.
    pub fn wgs84() -> Self {
        Self::epsg(EPSG_WGS84)
    }

    /// Spherical Web Mercator.
    pub fn web_mercator() -> Self {
        Self::epsg(EPSG_WEB_MERCATOR)
    }

    /// Parse and normalise an identifier string.
    pub fn parse(input: &str) -> Self {
        let trimmed = input.trim();
        let upper = trimmed.to_ascii_uppercase();

        if upper == "CRS84" || upper == "OGC:CRS84" || upper.ends_with("OGC:1.3:CRS84") {
            return Self::wgs84();
        }
        if let Ok(code) = upper.parse::<u32>() {
            return Self::epsg(code);
        }
        if let Some(rest) = upper.strip_prefix("EPSG:") {
            if let Ok(code) = rest.trim().parse::<u32>() {
                return Self::epsg(code);
            }
        }
        if let Some(idx) = upper.find("CRS:EPSG:") {
            // urn:ogc:def:crs:EPSG::4326 or urn:ogc:def:crs:EPSG:6.6:4326
            if let Some(code) = upper[idx..].rsplit(':').next() {
                if let Ok(code) = code.parse::<u32>() {
                    return Self::epsg(code);
                }
            }
        }
        Self(trimmed.to_string())
    }

    /// EPSG code when the identifier is of the `EPSG:n` form.
    pub fn epsg_code(&self) -> Option<u32> {
        self.0.strip_prefix("EPSG:")?.parse().ok()
    }

    /// Identifier text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CrsId {
    fn default() -> Self {
        Self::wgs84()
    }
}

impl fmt::Display for CrsId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CrsId {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_normalises_spellings() {
        for input in [
            "EPSG:4326",
            "epsg:4326",
            "4326",
            " EPSG: 4326 ",
            "urn:ogc:def:crs:EPSG::4326",
            "urn:ogc:def:crs:OGC:1.3:CRS84",
            "CRS84",
        ] {
            assert_eq!(CrsId::parse(input), CrsId::wgs84(), "input {input:?}");
        }
    }

    #[test]
    fn test_unknown_identifier_kept_verbatim() {
        let id = CrsId::parse("LOCAL:site-grid");
        assert_eq!(id.as_str(), "LOCAL:site-grid");
        assert_eq!(id.epsg_code(), None);
    }

    #[test]
    fn test_epsg_code() {
        assert_eq!(CrsId::epsg(32636).epsg_code(), Some(32636));
        assert_eq!(CrsId::web_mercator().to_string(), "EPSG:3857");
    }
}
