//! Well-known binary reader and writer.
//!
//! Writes little-endian ISO WKB; reads either byte order per geometry
//! header. An empty point is encoded as `(NaN, NaN)`, the common convention.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::CodecError;
use crate::geometry::{Coord, GeometryType, Polygon, Shape};

const WKB_BIG_ENDIAN: u8 = 0;
const WKB_LITTLE_ENDIAN: u8 = 1;

fn type_code(kind: GeometryType) -> u32 {
    match kind {
        GeometryType::Point => 1,
        GeometryType::LineString => 2,
        GeometryType::Polygon => 3,
        GeometryType::MultiPoint => 4,
        GeometryType::MultiLineString => 5,
        GeometryType::MultiPolygon => 6,
    }
}

fn type_from_code(code: u32) -> Result<GeometryType, CodecError> {
    Ok(match code {
        1 => GeometryType::Point,
        2 => GeometryType::LineString,
        3 => GeometryType::Polygon,
        4 => GeometryType::MultiPoint,
        5 => GeometryType::MultiLineString,
        6 => GeometryType::MultiPolygon,
        other => return Err(CodecError::UnsupportedType(format!("WKB type code {other}"))),
    })
}

// =============================================================================
// Writer
// =============================================================================

fn put_header(buf: &mut BytesMut, kind: GeometryType) {
    buf.put_u8(WKB_LITTLE_ENDIAN);
    buf.put_u32_le(type_code(kind));
}

fn put_coord(buf: &mut BytesMut, c: &Coord) {
    buf.put_f64_le(c.x);
    buf.put_f64_le(c.y);
}

fn put_seq(buf: &mut BytesMut, seq: &[Coord]) {
    buf.put_u32_le(seq.len() as u32);
    for c in seq {
        put_coord(buf, c);
    }
}

fn put_polygon_body(buf: &mut BytesMut, poly: &Polygon) {
    if poly.is_empty() {
        buf.put_u32_le(0);
        return;
    }
    buf.put_u32_le((1 + poly.interiors.len()) as u32);
    for ring in poly.rings() {
        put_seq(buf, ring);
    }
}

/// Encode a shape as little-endian WKB.
pub fn to_wkb(shape: &Shape) -> Bytes {
    let mut buf = BytesMut::with_capacity(9 + shape.num_coords() * 16);
    put_header(&mut buf, shape.geometry_type());
    match shape {
        Shape::Point(p) => {
            let c = p.unwrap_or(Coord {
                x: f64::NAN,
                y: f64::NAN,
            });
            put_coord(&mut buf, &c);
        }
        Shape::LineString(ls) => put_seq(&mut buf, ls),
        Shape::Polygon(poly) => put_polygon_body(&mut buf, poly),
        Shape::MultiPoint(pts) => {
            buf.put_u32_le(pts.len() as u32);
            for c in pts {
                put_header(&mut buf, GeometryType::Point);
                put_coord(&mut buf, c);
            }
        }
        Shape::MultiLineString(lines) => {
            buf.put_u32_le(lines.len() as u32);
            for line in lines {
                put_header(&mut buf, GeometryType::LineString);
                put_seq(&mut buf, line);
            }
        }
        Shape::MultiPolygon(polys) => {
            buf.put_u32_le(polys.len() as u32);
            for poly in polys {
                put_header(&mut buf, GeometryType::Polygon);
                put_polygon_body(&mut buf, poly);
            }
        }
    }
    buf.freeze()
}

/// Encode a shape as upper-case hex WKB.
pub fn to_wkb_hex(shape: &Shape) -> String {
    to_wkb(shape).iter().map(|b| format!("{b:02X}")).collect()
}

// =============================================================================
// Reader
// =============================================================================

struct Reader<'a> {
    buf: &'a [u8],
    little_endian: bool,
}

impl Reader<'_> {
    fn need(&self, n: usize) -> Result<(), CodecError> {
        if self.buf.remaining() < n {
            return Err(CodecError::Wkb(format!(
                "truncated input: need {n} bytes, {} left",
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    fn u32(&mut self) -> Result<u32, CodecError> {
        self.need(4)?;
        Ok(if self.little_endian {
            self.buf.get_u32_le()
        } else {
            self.buf.get_u32()
        })
    }

    fn f64(&mut self) -> Result<f64, CodecError> {
        self.need(8)?;
        Ok(if self.little_endian {
            self.buf.get_f64_le()
        } else {
            self.buf.get_f64()
        })
    }

    fn count(&mut self, item_size: usize) -> Result<usize, CodecError> {
        let n = self.u32()? as usize;
        // Reject counts that cannot possibly fit in the remaining input
        if n.saturating_mul(item_size) > self.buf.remaining() {
            return Err(CodecError::Wkb(format!("element count {n} exceeds input size")));
        }
        Ok(n)
    }

    fn header(&mut self) -> Result<GeometryType, CodecError> {
        self.need(1)?;
        self.little_endian = match self.buf.get_u8() {
            WKB_LITTLE_ENDIAN => true,
            WKB_BIG_ENDIAN => false,
            other => return Err(CodecError::Wkb(format!("invalid byte order marker {other}"))),
        };
        let code = self.u32()?;
        type_from_code(code)
    }

    fn coord(&mut self) -> Result<Coord, CodecError> {
        Ok(Coord {
            x: self.f64()?,
            y: self.f64()?,
        })
    }

    fn seq(&mut self) -> Result<Vec<Coord>, CodecError> {
        let n = self.count(16)?;
        (0..n).map(|_| self.coord()).collect()
    }

    fn polygon_body(&mut self) -> Result<Polygon, CodecError> {
        let n = self.count(4)?;
        let mut rings = (0..n).map(|_| self.seq()).collect::<Result<Vec<_>, _>>()?;
        if rings.is_empty() {
            return Ok(Polygon::default());
        }
        let exterior = rings.remove(0);
        Ok(Polygon::new(exterior, rings))
    }

    fn member(&mut self, expected: GeometryType) -> Result<(), CodecError> {
        let kind = self.header()?;
        if kind != expected {
            return Err(CodecError::Wkb(format!(
                "expected {expected} member, found {kind}"
            )));
        }
        Ok(())
    }

    fn shape(&mut self) -> Result<Shape, CodecError> {
        let kind = self.header()?;
        Ok(match kind {
            GeometryType::Point => {
                let c = self.coord()?;
                if c.x.is_nan() && c.y.is_nan() {
                    Shape::Point(None)
                } else {
                    Shape::Point(Some(c))
                }
            }
            GeometryType::LineString => Shape::LineString(self.seq()?),
            GeometryType::Polygon => Shape::Polygon(self.polygon_body()?),
            GeometryType::MultiPoint => {
                let n = self.count(21)?;
                let mut pts = Vec::with_capacity(n);
                for _ in 0..n {
                    self.member(GeometryType::Point)?;
                    pts.push(self.coord()?);
                }
                Shape::MultiPoint(pts)
            }
            GeometryType::MultiLineString => {
                let n = self.count(9)?;
                let mut lines = Vec::with_capacity(n);
                for _ in 0..n {
                    self.member(GeometryType::LineString)?;
                    lines.push(self.seq()?);
                }
                Shape::MultiLineString(lines)
            }
            GeometryType::MultiPolygon => {
                let n = self.count(9)?;
                let mut polys = Vec::with_capacity(n);
                for _ in 0..n {
                    self.member(GeometryType::Polygon)?;
                    polys.push(self.polygon_body()?);
                }
                Shape::MultiPolygon(polys)
            }
        })
    }
}

/// Decode WKB in either byte order.
///
/// # Errors
///
/// `CodecError::Wkb` for truncated or malformed input, including trailing
/// bytes after the geometry.
pub fn parse_wkb(data: &[u8]) -> Result<Shape, CodecError> {
    let mut reader = Reader {
        buf: data,
        little_endian: true,
    };
    let shape = reader.shape()?;
    if reader.buf.has_remaining() {
        return Err(CodecError::Wkb(format!(
            "{} trailing bytes",
            reader.buf.remaining()
        )));
    }
    Ok(shape)
}

/// Decode a hex string into bytes.
pub fn decode_hex(text: &str) -> Result<Vec<u8>, CodecError> {
    let text = text.trim();
    if text.len() % 2 != 0 {
        return Err(CodecError::Hex("odd number of digits".to_string()));
    }
    (0..text.len())
        .step_by(2)
        .map(|i| {
            text.get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| CodecError::Hex(format!("invalid digits at offset {i}")))
        })
        .collect()
}

/// Decode hex-encoded WKB (as stored by PostGIS).
pub fn parse_wkb_hex(text: &str) -> Result<Shape, CodecError> {
    parse_wkb(&decode_hex(text)?)
}
