//! Well-known text reader and writer.
//!
//! Reads the six simple-feature types including `EMPTY` forms, both
//! `MULTIPOINT` spellings and an optional EWKT `SRID=n;` prefix. Extra
//! ordinates (Z, M) are accepted and dropped. Output uses Rust's shortest
//! round-trip float formatting, so coordinates survive a write/read cycle
//! bit for bit.

use std::fmt::Write as _;

use super::CodecError;
use crate::crs::CrsId;
use crate::geometry::{Coord, Geometry, GeometryType, Polygon, Shape};

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn error(&self, message: impl Into<String>) -> CodecError {
        CodecError::Wkt {
            offset: self.pos,
            message: message.into(),
        }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn skip_ws(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.src.len() - trimmed.len();
    }

    fn peek(&mut self) -> Option<char> {
        self.skip_ws();
        self.rest().chars().next()
    }

    fn expect(&mut self, c: char) -> Result<(), CodecError> {
        match self.peek() {
            Some(found) if found == c => {
                self.pos += c.len_utf8();
                Ok(())
            }
            Some(found) => Err(self.error(format!("expected '{c}', found '{found}'"))),
            None => Err(self.error(format!("expected '{c}', found end of input"))),
        }
    }

    fn consume(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += c.len_utf8();
            true
        } else {
            false
        }
    }

    /// Next alphabetic word, upper-cased. Does not consume on failure.
    fn word(&mut self) -> Option<String> {
        self.skip_ws();
        let len = self
            .rest()
            .find(|c: char| !c.is_ascii_alphabetic())
            .unwrap_or(self.rest().len());
        if len == 0 {
            return None;
        }
        let w = self.rest()[..len].to_ascii_uppercase();
        self.pos += len;
        Some(w)
    }

    fn peek_word(&mut self) -> Option<String> {
        let saved = self.pos;
        let w = self.word();
        self.pos = saved;
        w
    }

    fn number(&mut self) -> Result<f64, CodecError> {
        self.skip_ws();
        let len = self
            .rest()
            .find(|c: char| c.is_whitespace() || matches!(c, ',' | '(' | ')'))
            .unwrap_or(self.rest().len());
        if len == 0 {
            return Err(self.error("expected number"));
        }
        let text = &self.rest()[..len];
        let value = text
            .parse::<f64>()
            .map_err(|_| self.error(format!("invalid number '{text}'")))?;
        self.pos += len;
        Ok(value)
    }

    fn coord(&mut self) -> Result<Coord, CodecError> {
        let x = self.number()?;
        let y = self.number()?;
        // Drop Z/M ordinates
        while !matches!(self.peek(), Some(',') | Some(')') | None) {
            self.number()?;
        }
        Ok(Coord { x, y })
    }

    /// `EMPTY` keyword, if present.
    fn empty(&mut self) -> bool {
        if self.peek_word().as_deref() == Some("EMPTY") {
            self.word();
            true
        } else {
            false
        }
    }

    fn coord_seq(&mut self) -> Result<Vec<Coord>, CodecError> {
        if self.empty() {
            return Ok(Vec::new());
        }
        self.expect('(')?;
        let mut out = vec![self.coord()?];
        while self.consume(',') {
            out.push(self.coord()?);
        }
        self.expect(')')?;
        Ok(out)
    }

    fn list<T>(
        &mut self,
        mut item: impl FnMut(&mut Self) -> Result<T, CodecError>,
    ) -> Result<Vec<T>, CodecError> {
        if self.empty() {
            return Ok(Vec::new());
        }
        self.expect('(')?;
        let mut out = vec![item(self)?];
        while self.consume(',') {
            out.push(item(self)?);
        }
        self.expect(')')?;
        Ok(out)
    }

    fn polygon(&mut self) -> Result<Polygon, CodecError> {
        let mut rings = self.list(|p| p.coord_seq())?;
        if rings.is_empty() {
            return Ok(Polygon::default());
        }
        let exterior = rings.remove(0);
        Ok(Polygon::new(exterior, rings))
    }

    fn multi_point_member(&mut self) -> Result<Option<Coord>, CodecError> {
        if self.empty() {
            return Ok(None);
        }
        if self.consume('(') {
            let c = self.coord()?;
            self.expect(')')?;
            Ok(Some(c))
        } else {
            self.coord().map(Some)
        }
    }

    fn geometry_type(&mut self) -> Result<GeometryType, CodecError> {
        let tag = self.word().ok_or_else(|| self.error("expected geometry type"))?;
        let kind = match tag.as_str() {
            "POINT" => GeometryType::Point,
            "LINESTRING" => GeometryType::LineString,
            "POLYGON" => GeometryType::Polygon,
            "MULTIPOINT" => GeometryType::MultiPoint,
            "MULTILINESTRING" => GeometryType::MultiLineString,
            "MULTIPOLYGON" => GeometryType::MultiPolygon,
            other => return Err(CodecError::UnsupportedType(other.to_string())),
        };
        // Dimension qualifiers
        if matches!(self.peek_word().as_deref(), Some("Z" | "M" | "ZM")) {
            self.word();
        }
        Ok(kind)
    }

    fn shape(&mut self) -> Result<Shape, CodecError> {
        let kind = self.geometry_type()?;
        let shape = match kind {
            GeometryType::Point => {
                if self.empty() {
                    Shape::Point(None)
                } else {
                    self.expect('(')?;
                    let c = self.coord()?;
                    self.expect(')')?;
                    Shape::Point(Some(c))
                }
            }
            GeometryType::LineString => Shape::LineString(self.coord_seq()?),
            GeometryType::Polygon => Shape::Polygon(self.polygon()?),
            GeometryType::MultiPoint => Shape::MultiPoint(
                self.list(|p| p.multi_point_member())?
                    .into_iter()
                    .flatten()
                    .collect(),
            ),
            GeometryType::MultiLineString => {
                Shape::MultiLineString(self.list(|p| p.coord_seq())?)
            }
            GeometryType::MultiPolygon => Shape::MultiPolygon(self.list(|p| p.polygon())?),
        };
        Ok(shape)
    }

    fn srid(&mut self) -> Result<Option<CrsId>, CodecError> {
        self.skip_ws();
        if !self.rest().to_ascii_uppercase().starts_with("SRID=") {
            return Ok(None);
        }
        self.pos += "SRID=".len();
        let end = self
            .rest()
            .find(';')
            .ok_or_else(|| self.error("SRID prefix without ';'"))?;
        let code = self.rest()[..end].trim();
        let code: u32 = code
            .parse()
            .map_err(|_| self.error(format!("invalid SRID '{code}'")))?;
        self.pos += end + 1;
        Ok(Some(CrsId::epsg(code)))
    }
}

/// Parse WKT into a shape.
///
/// # Errors
///
/// `CodecError::Wkt` with the byte offset of the first syntax problem.
pub fn parse_wkt(text: &str) -> Result<Shape, CodecError> {
    let mut parser = Parser::new(text);
    let shape = parser.shape()?;
    if parser.peek().is_some() {
        return Err(parser.error("trailing characters"));
    }
    Ok(shape)
}

/// Parse WKT or EWKT into a geometry.
///
/// An EWKT `SRID=n;` prefix takes precedence over `default_crs`.
pub fn read_wkt(text: &str, default_crs: CrsId) -> Result<Geometry, CodecError> {
    let mut parser = Parser::new(text);
    let crs = parser.srid()?.unwrap_or(default_crs);
    let shape = parser.shape()?;
    if parser.peek().is_some() {
        return Err(parser.error("trailing characters"));
    }
    Ok(Geometry::new(shape, crs))
}

fn write_coord(out: &mut String, c: &Coord) {
    let _ = write!(out, "{} {}", c.x, c.y);
}

fn write_seq(out: &mut String, seq: &[Coord]) {
    if seq.is_empty() {
        out.push_str("EMPTY");
        return;
    }
    out.push('(');
    for (i, c) in seq.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write_coord(out, c);
    }
    out.push(')');
}

fn write_polygon(out: &mut String, poly: &Polygon) {
    if poly.is_empty() {
        out.push_str("EMPTY");
        return;
    }
    out.push('(');
    for (i, ring) in poly.rings().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write_seq(out, ring);
    }
    out.push(')');
}

fn write_parts<T>(out: &mut String, parts: &[T], mut each: impl FnMut(&mut String, &T)) {
    if parts.is_empty() {
        out.push_str("EMPTY");
        return;
    }
    out.push('(');
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        each(out, part);
    }
    out.push(')');
}

/// Format a shape as WKT.
pub fn to_wkt(shape: &Shape) -> String {
    let mut out = String::from(shape.geometry_type().wkt_name());
    out.push(' ');
    match shape {
        Shape::Point(None) => out.push_str("EMPTY"),
        Shape::Point(Some(c)) => {
            out.push('(');
            write_coord(&mut out, c);
            out.push(')');
        }
        Shape::LineString(ls) => write_seq(&mut out, ls),
        Shape::Polygon(poly) => write_polygon(&mut out, poly),
        Shape::MultiPoint(pts) => write_parts(&mut out, pts, |o, c| {
            o.push('(');
            write_coord(o, c);
            o.push(')');
        }),
        Shape::MultiLineString(lines) => write_parts(&mut out, lines, |o, l| write_seq(o, l)),
        Shape::MultiPolygon(polys) => write_parts(&mut out, polys, write_polygon),
    }
    out
}

/// Format a geometry as EWKT when its CRS has an EPSG code.
pub fn to_ewkt(geometry: &Geometry) -> String {
    match geometry.crs.epsg_code() {
        Some(code) => format!("SRID={code};{}", to_wkt(&geometry.shape)),
        None => to_wkt(&geometry.shape),
    }
}
