//! Coordinate reference systems
//!
//! Supported: geographic WGS84 (EPSG:4326) and ETRS89 (EPSG:4258, treated as
//! WGS84), Web Mercator (EPSG:3857), WGS84 UTM north/south (EPSG:326xx /
//! 327xx) and ETRS89 UTM 28N-38N (EPSG:25828-25838). Every projection
//! converts to and from geographic longitude/latitude in degrees.

use crate::domain::Coord;
use std::f64::consts::{FRAC_PI_2, FRAC_PI_4};
use std::fmt;
use std::sync::OnceLock;

const WGS84_A: f64 = 6_378_137.0;
const WGS84_F: f64 = 1.0 / 298.257_223_563;
const UTM_K0: f64 = 0.9996;
const UTM_FALSE_EASTING: f64 = 500_000.0;
/// Easting window of a zone: its 6 degree band at the equator spans roughly
/// 166 km to 834 km, so degrees or unprojected values fall outside
const UTM_MIN_EASTING: f64 = 100_000.0;
const UTM_MAX_EASTING: f64 = 900_000.0;
const UTM_FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;
const WEB_MERCATOR_MAX: f64 = 20_037_508.342_789_244;
const WEB_MERCATOR_MAX_LAT: f64 = 85.051_128_779_806_59;

/// Geodetic datum of a CRS
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Datum {
    Wgs84,
    Etrs89,
}

/// A supported coordinate reference system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Crs {
    /// Longitude/latitude in degrees
    Geographic(Datum),
    /// Spherical Mercator in metres
    WebMercator,
    /// Universal Transverse Mercator in metres
    Utm { zone: u8, south: bool, datum: Datum },
}

/// Valid coordinate extent of a CRS
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Bounds {
    pub fn contains(&self, c: Coord) -> bool {
        c.x >= self.min_x && c.x <= self.max_x && c.y >= self.min_y && c.y <= self.max_y
    }
}

impl Crs {
    pub const WGS84: Crs = Crs::Geographic(Datum::Wgs84);

    /// Parses "EPSG:25832", "epsg:4326", "4326", "urn:ogc:def:crs:EPSG::3857"
    /// or "CRS84"
    pub fn parse(input: &str) -> Result<Crs, String> {
        let trimmed = input.trim();
        let upper = trimmed.to_uppercase();
        if matches!(upper.as_str(), "CRS84" | "OGC:CRS84" | "URN:OGC:DEF:CRS:OGC:1.3:CRS84") {
            return Ok(Self::WGS84);
        }

        let code = upper
            .rsplit(|c| c == ':')
            .next()
            .filter(|_| {
                upper.starts_with("EPSG:")
                    || upper.starts_with("URN:OGC:DEF:CRS:EPSG:")
                    || upper.chars().all(|c| c.is_ascii_digit())
            })
            .and_then(|c| c.parse::<u32>().ok())
            .ok_or_else(|| format!("unrecognized CRS '{}'", trimmed))?;

        Self::from_epsg(code)
    }

    pub fn from_epsg(code: u32) -> Result<Crs, String> {
        match code {
            4326 => Ok(Crs::Geographic(Datum::Wgs84)),
            4258 => Ok(Crs::Geographic(Datum::Etrs89)),
            3857 => Ok(Crs::WebMercator),
            32601..=32660 => Ok(Crs::Utm {
                zone: (code - 32600) as u8,
                south: false,
                datum: Datum::Wgs84,
            }),
            32701..=32760 => Ok(Crs::Utm {
                zone: (code - 32700) as u8,
                south: true,
                datum: Datum::Wgs84,
            }),
            25828..=25838 => Ok(Crs::Utm {
                zone: (code - 25800) as u8,
                south: false,
                datum: Datum::Etrs89,
            }),
            other => Err(format!("unsupported CRS EPSG:{}", other)),
        }
    }

    pub fn epsg(&self) -> u32 {
        match self {
            Crs::Geographic(Datum::Wgs84) => 4326,
            Crs::Geographic(Datum::Etrs89) => 4258,
            Crs::WebMercator => 3857,
            Crs::Utm {
                zone,
                south: false,
                datum: Datum::Wgs84,
            } => 32600 + *zone as u32,
            Crs::Utm {
                zone,
                south: true,
                datum: Datum::Wgs84,
            } => 32700 + *zone as u32,
            Crs::Utm {
                zone,
                datum: Datum::Etrs89,
                ..
            } => 25800 + *zone as u32,
        }
    }

    pub fn is_geographic(&self) -> bool {
        matches!(self, Crs::Geographic(_))
    }

    /// Returns true when coordinates are numerically identical in both CRSs
    /// (ETRS89 is treated as WGS84)
    pub fn same_projection(&self, other: &Crs) -> bool {
        match (self, other) {
            (Crs::Geographic(_), Crs::Geographic(_)) => true,
            (Crs::WebMercator, Crs::WebMercator) => true,
            (
                Crs::Utm {
                    zone: z1,
                    south: s1,
                    ..
                },
                Crs::Utm {
                    zone: z2,
                    south: s2,
                    ..
                },
            ) => z1 == z2 && s1 == s2,
            _ => false,
        }
    }

    pub fn bounds(&self) -> Bounds {
        match self {
            Crs::Geographic(_) => Bounds {
                min_x: -180.0,
                min_y: -90.0,
                max_x: 180.0,
                max_y: 90.0,
            },
            Crs::WebMercator => Bounds {
                min_x: -WEB_MERCATOR_MAX,
                min_y: -WEB_MERCATOR_MAX,
                max_x: WEB_MERCATOR_MAX,
                max_y: WEB_MERCATOR_MAX,
            },
            Crs::Utm { south: false, .. } => Bounds {
                min_x: UTM_MIN_EASTING,
                min_y: 0.0,
                max_x: UTM_MAX_EASTING,
                max_y: 9_350_000.0,
            },
            Crs::Utm { south: true, .. } => Bounds {
                min_x: UTM_MIN_EASTING,
                min_y: 1_000_000.0,
                max_x: UTM_MAX_EASTING,
                max_y: 10_000_000.0,
            },
        }
    }

    /// Converts a coordinate of this CRS to longitude/latitude degrees
    pub fn to_geographic(&self, c: Coord) -> Result<Coord, String> {
        let out = match self {
            Crs::Geographic(_) => c,
            Crs::WebMercator => {
                let lon = (c.x / WGS84_A).to_degrees();
                let lat = (2.0 * (c.y / WGS84_A).exp().atan() - FRAC_PI_2).to_degrees();
                Coord::new(lon, lat)
            }
            Crs::Utm { zone, south, .. } => utm(*zone, *south).inverse(c),
        };
        finite(out)
    }

    /// Converts longitude/latitude degrees to a coordinate of this CRS
    pub fn from_geographic(&self, c: Coord) -> Result<Coord, String> {
        let out = match self {
            Crs::Geographic(_) => c,
            Crs::WebMercator => {
                if c.y.abs() > WEB_MERCATOR_MAX_LAT {
                    return Err(format!(
                        "latitude {} is outside the Web Mercator range",
                        c.y
                    ));
                }
                let x = WGS84_A * c.x.to_radians();
                let y = WGS84_A * (FRAC_PI_4 + c.y.to_radians() / 2.0).tan().ln();
                Coord::new(x, y)
            }
            Crs::Utm { zone, south, .. } => utm(*zone, *south).forward(c),
        };
        finite(out)
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg())
    }
}

impl std::str::FromStr for Crs {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Crs::parse(s)
    }
}

fn finite(c: Coord) -> Result<Coord, String> {
    if c.is_finite() {
        Ok(c)
    } else {
        Err("transform produced a non-finite coordinate".to_string())
    }
}

fn utm(zone: u8, south: bool) -> TransverseMercator {
    TransverseMercator {
        central_meridian: (zone as f64 - 1.0) * 6.0 - 180.0 + 3.0,
        false_easting: UTM_FALSE_EASTING,
        false_northing: if south { UTM_FALSE_NORTHING_SOUTH } else { 0.0 },
        scale: UTM_K0,
    }
}

/// Krüger series coefficients (4th order in the third flattening n)
struct KrugerSeries {
    /// Rectifying radius
    a_rect: f64,
    /// Conformal latitude eccentricity term 2*sqrt(n)/(1+n)
    e: f64,
    alpha: [f64; 4],
    beta: [f64; 4],
    delta: [f64; 4],
}

fn kruger() -> &'static KrugerSeries {
    static SERIES: OnceLock<KrugerSeries> = OnceLock::new();
    SERIES.get_or_init(|| {
        let n = WGS84_F / (2.0 - WGS84_F);
        let n2 = n * n;
        let n3 = n2 * n;
        let n4 = n3 * n;
        KrugerSeries {
            a_rect: WGS84_A / (1.0 + n) * (1.0 + n2 / 4.0 + n4 / 64.0),
            e: 2.0 * n.sqrt() / (1.0 + n),
            alpha: [
                n / 2.0 - 2.0 * n2 / 3.0 + 5.0 * n3 / 16.0 + 41.0 * n4 / 180.0,
                13.0 * n2 / 48.0 - 3.0 * n3 / 5.0 + 557.0 * n4 / 1440.0,
                61.0 * n3 / 240.0 - 103.0 * n4 / 140.0,
                49561.0 * n4 / 161_280.0,
            ],
            beta: [
                n / 2.0 - 2.0 * n2 / 3.0 + 37.0 * n3 / 96.0 - n4 / 360.0,
                n2 / 48.0 + n3 / 15.0 - 437.0 * n4 / 1440.0,
                17.0 * n3 / 480.0 - 37.0 * n4 / 840.0,
                4397.0 * n4 / 161_280.0,
            ],
            delta: [
                2.0 * n - 2.0 * n2 / 3.0 - 2.0 * n3 + 116.0 * n4 / 45.0,
                7.0 * n2 / 3.0 - 8.0 * n3 / 5.0 - 227.0 * n4 / 45.0,
                56.0 * n3 / 15.0 - 136.0 * n4 / 35.0,
                4279.0 * n4 / 630.0,
            ],
        }
    })
}

/// Transverse Mercator on the WGS84 ellipsoid
#[derive(Debug, Clone, Copy)]
struct TransverseMercator {
    central_meridian: f64,
    false_easting: f64,
    false_northing: f64,
    scale: f64,
}

impl TransverseMercator {
    fn forward(&self, geo: Coord) -> Coord {
        let s = kruger();
        let phi = geo.y.to_radians();
        let dlambda = (geo.x - self.central_meridian).to_radians();

        let sin_phi = phi.sin();
        let t = (sin_phi.atanh() - s.e * (s.e * sin_phi).atanh()).sinh();
        let xi_p = t.atan2(dlambda.cos());
        let eta_p = (dlambda.sin() / (1.0 + t * t).sqrt()).atanh();

        let mut xi = xi_p;
        let mut eta = eta_p;
        for (j, alpha) in s.alpha.iter().enumerate() {
            let k = 2.0 * (j + 1) as f64;
            xi += alpha * (k * xi_p).sin() * (k * eta_p).cosh();
            eta += alpha * (k * xi_p).cos() * (k * eta_p).sinh();
        }

        Coord::new(
            self.false_easting + self.scale * s.a_rect * eta,
            self.false_northing + self.scale * s.a_rect * xi,
        )
    }

    fn inverse(&self, projected: Coord) -> Coord {
        let s = kruger();
        let xi = (projected.y - self.false_northing) / (self.scale * s.a_rect);
        let eta = (projected.x - self.false_easting) / (self.scale * s.a_rect);

        let mut xi_p = xi;
        let mut eta_p = eta;
        for (j, beta) in s.beta.iter().enumerate() {
            let k = 2.0 * (j + 1) as f64;
            xi_p -= beta * (k * xi).sin() * (k * eta).cosh();
            eta_p -= beta * (k * xi).cos() * (k * eta).sinh();
        }

        let chi = (xi_p.sin() / eta_p.cosh()).asin();
        let mut phi = chi;
        for (j, delta) in s.delta.iter().enumerate() {
            let k = 2.0 * (j + 1) as f64;
            phi += delta * (k * chi).sin();
        }
        let dlambda = eta_p.sinh().atan2(xi_p.cos());

        Coord::new(
            self.central_meridian + dlambda.to_degrees(),
            phi.to_degrees(),
        )
    }
}
