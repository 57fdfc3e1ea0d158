//! GeoJSON and WKT geometry parsers
//!
//! Z and M ordinates are accepted and dropped.

use crate::domain::geometry::{Coord, Geometry, LineString, Polygon};
use serde_json::Value;

/// Why a geometry value could not be turned into a [`Geometry`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GeometryParseError {
    #[error("malformed geometry: {0}")]
    Malformed(String),
    #[error("geometry is empty")]
    Empty,
}

fn malformed(msg: impl Into<String>) -> GeometryParseError {
    GeometryParseError::Malformed(msg.into())
}

/// Parses a GeoJSON geometry object, a Feature (its geometry is used), or a
/// JSON string containing either
pub fn parse_geojson(value: &Value) -> Result<Geometry, GeometryParseError> {
    if let Value::String(text) = value {
        let inner: Value =
            serde_json::from_str(text).map_err(|e| malformed(format!("invalid JSON: {}", e)))?;
        return parse_geojson(&inner);
    }

    let obj = value
        .as_object()
        .ok_or_else(|| malformed("expected a GeoJSON object"))?;
    let kind = obj
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| malformed("GeoJSON object has no type"))?;

    if kind == "Feature" {
        return match obj.get("geometry") {
            None | Some(Value::Null) => Err(GeometryParseError::Empty),
            Some(geometry) => parse_geojson(geometry),
        };
    }

    let coords = obj
        .get("coordinates")
        .ok_or_else(|| malformed(format!("{} has no coordinates", kind)))?;

    match kind {
        "Point" => Ok(Geometry::Point(position(coords)?)),
        "LineString" => Ok(Geometry::LineString(positions(coords)?)),
        "Polygon" => Ok(Geometry::Polygon(rings(coords)?)),
        "MultiPoint" => Ok(Geometry::MultiPoint(positions(coords)?)),
        "MultiLineString" => Ok(Geometry::MultiLineString(rings(coords)?)),
        "MultiPolygon" => Ok(Geometry::MultiPolygon(
            array(coords)?
                .iter()
                .map(rings)
                .collect::<Result<Vec<Polygon>, _>>()?,
        )),
        other => Err(malformed(format!("unsupported geometry type '{}'", other))),
    }
}

fn array(value: &Value) -> Result<&Vec<Value>, GeometryParseError> {
    value
        .as_array()
        .ok_or_else(|| malformed("expected a coordinate array"))
}

fn position(value: &Value) -> Result<Coord, GeometryParseError> {
    let items = array(value)?;
    if items.is_empty() {
        return Err(GeometryParseError::Empty);
    }
    if items.len() < 2 {
        return Err(malformed("position needs at least two numbers"));
    }
    let num = |v: &Value| {
        v.as_f64()
            .ok_or_else(|| malformed(format!("'{}' is not a number", v)))
    };
    Ok(Coord::new(num(&items[0])?, num(&items[1])?))
}

fn positions(value: &Value) -> Result<LineString, GeometryParseError> {
    array(value)?.iter().map(position).collect()
}

fn rings(value: &Value) -> Result<Polygon, GeometryParseError> {
    array(value)?.iter().map(positions).collect()
}

/// Parses well-known text, including an optional EWKT `SRID=...;` prefix
pub fn parse_wkt(input: &str) -> Result<Geometry, GeometryParseError> {
    let mut text = input.trim();
    if text.len() >= 5 && text[..5].eq_ignore_ascii_case("SRID=") {
        let end = text
            .find(';')
            .ok_or_else(|| malformed("SRID prefix without ';'"))?;
        text = &text[end + 1..];
    }

    let mut parser = WktParser {
        input: text.as_bytes(),
        pos: 0,
    };
    let geometry = parser.geometry()?;
    parser.skip_ws();
    if parser.pos < parser.input.len() {
        return Err(malformed(format!(
            "unexpected trailing text at position {}",
            parser.pos
        )));
    }
    Ok(geometry)
}

struct WktParser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> WktParser<'a> {
    fn skip_ws(&mut self) {
        while self.pos < self.input.len() && self.input[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Option<u8> {
        self.skip_ws();
        self.input.get(self.pos).copied()
    }

    fn expect(&mut self, ch: u8) -> Result<(), GeometryParseError> {
        match self.peek() {
            Some(c) if c == ch => {
                self.pos += 1;
                Ok(())
            }
            Some(c) => Err(malformed(format!(
                "expected '{}' at position {}, found '{}'",
                ch as char, self.pos, c as char
            ))),
            None => Err(malformed(format!("expected '{}', found end of input", ch as char))),
        }
    }

    fn word(&mut self) -> String {
        self.skip_ws();
        let start = self.pos;
        while self.pos < self.input.len() && self.input[self.pos].is_ascii_alphabetic() {
            self.pos += 1;
        }
        String::from_utf8_lossy(&self.input[start..self.pos]).to_uppercase()
    }

    fn number(&mut self) -> Result<f64, GeometryParseError> {
        self.skip_ws();
        let start = self.pos;
        while self.pos < self.input.len()
            && matches!(self.input[self.pos], b'0'..=b'9' | b'+' | b'-' | b'.' | b'e' | b'E')
        {
            self.pos += 1;
        }
        let text = String::from_utf8_lossy(&self.input[start..self.pos]);
        text.parse::<f64>()
            .map_err(|_| malformed(format!("invalid number '{}' at position {}", text, start)))
    }

    /// x y [z [m]]
    fn coord(&mut self) -> Result<Coord, GeometryParseError> {
        let x = self.number()?;
        let y = self.number()?;
        while matches!(self.peek(), Some(b'0'..=b'9' | b'+' | b'-' | b'.')) {
            self.number()?;
        }
        Ok(Coord::new(x, y))
    }

    fn coord_list(&mut self) -> Result<LineString, GeometryParseError> {
        self.expect(b'(')?;
        let mut coords = vec![self.coord()?];
        while self.peek() == Some(b',') {
            self.pos += 1;
            coords.push(self.coord()?);
        }
        self.expect(b')')?;
        Ok(coords)
    }

    fn ring_list(&mut self) -> Result<Polygon, GeometryParseError> {
        self.expect(b'(')?;
        let mut rings = vec![self.coord_list()?];
        while self.peek() == Some(b',') {
            self.pos += 1;
            rings.push(self.coord_list()?);
        }
        self.expect(b')')?;
        Ok(rings)
    }

    fn multi_point(&mut self) -> Result<Vec<Coord>, GeometryParseError> {
        self.expect(b'(')?;
        let mut points = Vec::new();
        loop {
            if self.peek() == Some(b'(') {
                self.pos += 1;
                points.push(self.coord()?);
                self.expect(b')')?;
            } else {
                points.push(self.coord()?);
            }
            if self.peek() == Some(b',') {
                self.pos += 1;
            } else {
                break;
            }
        }
        self.expect(b')')?;
        Ok(points)
    }

    fn geometry(&mut self) -> Result<Geometry, GeometryParseError> {
        let kind = self.word();
        if kind.is_empty() {
            return Err(malformed("missing geometry type"));
        }

        let save = self.pos;
        match self.word().as_str() {
            "Z" | "M" | "ZM" => {}
            "EMPTY" => return Err(GeometryParseError::Empty),
            _ => self.pos = save,
        }
        let save = self.pos;
        if self.word() == "EMPTY" {
            return Err(GeometryParseError::Empty);
        }
        self.pos = save;

        match kind.as_str() {
            "POINT" => {
                self.expect(b'(')?;
                let c = self.coord()?;
                self.expect(b')')?;
                Ok(Geometry::Point(c))
            }
            "LINESTRING" => Ok(Geometry::LineString(self.coord_list()?)),
            "POLYGON" => Ok(Geometry::Polygon(self.ring_list()?)),
            "MULTIPOINT" => Ok(Geometry::MultiPoint(self.multi_point()?)),
            "MULTILINESTRING" => Ok(Geometry::MultiLineString(self.ring_list()?)),
            "MULTIPOLYGON" => {
                self.expect(b'(')?;
                let mut polygons = vec![self.ring_list()?];
                while self.peek() == Some(b',') {
                    self.pos += 1;
                    polygons.push(self.ring_list()?);
                }
                self.expect(b')')?;
                Ok(Geometry::MultiPolygon(polygons))
            }
            other => Err(malformed(format!("unsupported WKT type '{}'", other))),
        }
    }
}
