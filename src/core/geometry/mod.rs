//! Geometry parsing, validation and reprojection

pub mod crs;
pub mod parse;
pub mod reproject;
pub mod validate;

pub use crs::{Bounds, Crs, Datum};
pub use parse::{parse_geojson, parse_wkt, GeometryParseError};
pub use reproject::{transform_geometry, Reprojector};
pub use validate::validate_geometry;
