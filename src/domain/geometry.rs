//! Geometry model
//!
//! Simple-feature geometries with `x` as easting/longitude and `y` as
//! northing/latitude. Parsing, validation and reprojection live in
//! `core::geometry`; this module only holds the data and its output forms.

use serde::{Serialize, Serializer};
use serde_json::{json, Value};

/// A single 2D coordinate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, serde::Deserialize)]
pub struct Coord {
    pub x: f64,
    pub y: f64,
}

impl Coord {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// A ring or path of coordinates
pub type LineString = Vec<Coord>;

/// Rings of a polygon: exterior first, then holes
pub type Polygon = Vec<LineString>;

/// Simple-feature geometry
#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Point(Coord),
    LineString(LineString),
    Polygon(Polygon),
    MultiPoint(Vec<Coord>),
    MultiLineString(Vec<LineString>),
    MultiPolygon(Vec<Polygon>),
}

impl Geometry {
    /// GeoJSON / WKT type name
    pub fn geometry_type(&self) -> &'static str {
        match self {
            Self::Point(_) => "Point",
            Self::LineString(_) => "LineString",
            Self::Polygon(_) => "Polygon",
            Self::MultiPoint(_) => "MultiPoint",
            Self::MultiLineString(_) => "MultiLineString",
            Self::MultiPolygon(_) => "MultiPolygon",
        }
    }

    /// Returns true when the geometry has no coordinates at all
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Point(_) => false,
            Self::LineString(ls) | Self::MultiPoint(ls) => ls.is_empty(),
            Self::Polygon(rings) | Self::MultiLineString(rings) => {
                rings.iter().all(|r| r.is_empty())
            }
            Self::MultiPolygon(polys) => polys.iter().flatten().all(|r| r.is_empty()),
        }
    }

    /// All coordinates in document order
    pub fn coords(&self) -> Vec<Coord> {
        match self {
            Self::Point(c) => vec![*c],
            Self::LineString(ls) | Self::MultiPoint(ls) => ls.clone(),
            Self::Polygon(rings) | Self::MultiLineString(rings) => {
                rings.iter().flatten().copied().collect()
            }
            Self::MultiPolygon(polys) => polys.iter().flatten().flatten().copied().collect(),
        }
    }

    /// Applies a fallible coordinate transform, keeping the structure
    pub fn try_map_coords<E, F>(&self, mut f: F) -> Result<Geometry, E>
    where
        F: FnMut(Coord) -> Result<Coord, E>,
    {
        let mut map_line =
            |line: &LineString| -> Result<LineString, E> { line.iter().map(|c| f(*c)).collect() };

        Ok(match self {
            Self::Point(c) => Self::Point(map_line(&vec![*c])?[0]),
            Self::LineString(ls) => Self::LineString(map_line(ls)?),
            Self::MultiPoint(ls) => Self::MultiPoint(map_line(ls)?),
            Self::Polygon(rings) => {
                Self::Polygon(rings.iter().map(&mut map_line).collect::<Result<_, E>>()?)
            }
            Self::MultiLineString(lines) => {
                Self::MultiLineString(lines.iter().map(&mut map_line).collect::<Result<_, E>>()?)
            }
            Self::MultiPolygon(polys) => Self::MultiPolygon(
                polys
                    .iter()
                    .map(|rings| rings.iter().map(&mut map_line).collect::<Result<_, E>>())
                    .collect::<Result<_, E>>()?,
            ),
        })
    }

    /// GeoJSON geometry object
    pub fn to_geojson(&self) -> Value {
        fn pos(c: &Coord) -> Value {
            json!([c.x, c.y])
        }
        fn line(l: &LineString) -> Value {
            Value::Array(l.iter().map(pos).collect())
        }
        fn poly(p: &Polygon) -> Value {
            Value::Array(p.iter().map(line).collect())
        }

        let coordinates = match self {
            Self::Point(c) => pos(c),
            Self::LineString(l) | Self::MultiPoint(l) => line(l),
            Self::Polygon(p) | Self::MultiLineString(p) => poly(p),
            Self::MultiPolygon(ps) => Value::Array(ps.iter().map(poly).collect()),
        };

        json!({ "type": self.geometry_type(), "coordinates": coordinates })
    }

    /// Well-known text representation
    pub fn to_wkt(&self) -> String {
        fn pos(c: &Coord) -> String {
            format!("{} {}", c.x, c.y)
        }
        fn line(l: &LineString) -> String {
            format!("({})", l.iter().map(pos).collect::<Vec<_>>().join(", "))
        }
        fn poly(p: &Polygon) -> String {
            format!("({})", p.iter().map(line).collect::<Vec<_>>().join(", "))
        }

        let name = self.geometry_type().to_uppercase();
        if self.is_empty() {
            return format!("{} EMPTY", name);
        }
        let body = match self {
            Self::Point(c) => format!("({})", pos(c)),
            Self::LineString(l) | Self::MultiPoint(l) => line(l),
            Self::Polygon(p) | Self::MultiLineString(p) => poly(p),
            Self::MultiPolygon(ps) => {
                format!("({})", ps.iter().map(poly).collect::<Vec<_>>().join(", "))
            }
        };
        format!("{} {}", name, body)
    }
}

impl Serialize for Geometry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_geojson().serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Geometry {
        Geometry::Polygon(vec![vec![
            Coord::new(0.0, 0.0),
            Coord::new(1.0, 0.0),
            Coord::new(1.0, 1.0),
            Coord::new(0.0, 1.0),
            Coord::new(0.0, 0.0),
        ]])
    }

    #[test]
    fn test_geojson_output() {
        let g = Geometry::Point(Coord::new(9.5, 56.1));
        assert_eq!(
            g.to_geojson(),
            json!({"type": "Point", "coordinates": [9.5, 56.1]})
        );
    }

    #[test]
    fn test_wkt_output() {
        assert_eq!(
            Geometry::LineString(vec![Coord::new(1.0, 2.0), Coord::new(3.5, 4.0)]).to_wkt(),
            "LINESTRING (1 2, 3.5 4)"
        );
        assert_eq!(
            square().to_wkt(),
            "POLYGON ((0 0, 1 0, 1 1, 0 1, 0 0))"
        );
        assert_eq!(Geometry::MultiPoint(vec![]).to_wkt(), "MULTIPOINT EMPTY");
    }

    #[test]
    fn test_try_map_coords_keeps_structure() {
        let shifted: Result<Geometry, ()> =
            square().try_map_coords(|c| Ok(Coord::new(c.x + 10.0, c.y)));
        let shifted = shifted.unwrap();
        assert_eq!(shifted.geometry_type(), "Polygon");
        assert_eq!(shifted.coords()[1], Coord::new(11.0, 0.0));
    }

    #[test]
    fn test_try_map_coords_propagates_error() {
        let result: Result<Geometry, &str> = square().try_map_coords(|_| Err("nope"));
        assert_eq!(result.unwrap_err(), "nope");
    }

    #[test]
    fn test_is_empty() {
        assert!(Geometry::Polygon(vec![vec![]]).is_empty());
        assert!(!square().is_empty());
        assert!(!Geometry::Point(Coord::new(0.0, 0.0)).is_empty());
    }
}
