//! Geometry validity checks

use super::crs::Crs;
use crate::domain::geometry::{Coord, Geometry, LineString, Polygon};

/// Checks that `geometry` is usable in `crs`
///
/// Returns a human readable reason for the first problem found.
pub fn validate_geometry(geometry: &Geometry, crs: &Crs, require_simple: bool) -> Result<(), String> {
    if geometry.is_empty() {
        return Err(format!("{} has no coordinates", geometry.geometry_type()));
    }

    let bounds = crs.bounds();
    for c in geometry.coords() {
        if !c.is_finite() {
            return Err("coordinate is not finite".to_string());
        }
        if !bounds.contains(c) {
            return Err(format!("coordinate ({}, {}) is outside the bounds of {}", c.x, c.y, crs));
        }
    }

    match geometry {
        Geometry::Point(_) | Geometry::MultiPoint(_) => Ok(()),
        Geometry::LineString(line) => validate_line(line),
        Geometry::MultiLineString(lines) => lines.iter().try_for_each(|l| validate_line(l)),
        Geometry::Polygon(rings) => validate_polygon(rings, require_simple),
        Geometry::MultiPolygon(polys) => polys
            .iter()
            .try_for_each(|p| validate_polygon(p, require_simple)),
    }
}

fn validate_line(line: &LineString) -> Result<(), String> {
    let first = line.first().ok_or("linestring is empty")?;
    if line.iter().all(|c| c == first) {
        return Err("linestring needs at least two distinct points".to_string());
    }
    Ok(())
}

fn validate_polygon(rings: &Polygon, require_simple: bool) -> Result<(), String> {
    if rings.is_empty() {
        return Err("polygon has no rings".to_string());
    }
    for (i, ring) in rings.iter().enumerate() {
        if ring.len() < 4 {
            return Err(format!("ring {} has {} points, at least 4 required", i, ring.len()));
        }
        if ring.first() != ring.last() {
            return Err(format!("ring {} is not closed", i));
        }
        if is_collinear(ring) {
            return Err(format!("ring {} has zero area", i));
        }
        if require_simple {
            if let Some((a, b)) = self_intersection(ring) {
                return Err(format!(
                    "ring {} self-intersects between segments {} and {}",
                    i, a, b
                ));
            }
        }
    }
    Ok(())
}

/// True when every vertex lies on the line through the first two distinct
/// points, i.e. the ring encloses nothing
fn is_collinear(ring: &[Coord]) -> bool {
    let origin = ring[0];
    let Some(&direction) = ring.iter().find(|c| **c != origin) else {
        return true;
    };
    let scale = (direction.x - origin.x).hypot(direction.y - origin.y);
    ring.iter().all(|&c| {
        let extent = (c.x - origin.x).hypot(c.y - origin.y);
        orientation(origin, direction, c).abs() <= 1e-12 * scale * extent.max(scale)
    })
}

/// First pair of non-adjacent segments of a closed ring that touch or cross
fn self_intersection(ring: &[Coord]) -> Option<(usize, usize)> {
    let n = ring.len() - 1;
    for i in 0..n {
        for j in (i + 1)..n {
            let adjacent = j == i + 1 || (i == 0 && j == n - 1);
            if adjacent {
                continue;
            }
            if segments_intersect(ring[i], ring[i + 1], ring[j], ring[j + 1]) {
                return Some((i, j));
            }
        }
    }
    None
}

fn orientation(a: Coord, b: Coord, c: Coord) -> f64 {
    (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)
}

fn on_segment(a: Coord, b: Coord, p: Coord) -> bool {
    p.x >= a.x.min(b.x) && p.x <= a.x.max(b.x) && p.y >= a.y.min(b.y) && p.y <= a.y.max(b.y)
}

fn segments_intersect(p1: Coord, p2: Coord, q1: Coord, q2: Coord) -> bool {
    let d1 = orientation(q1, q2, p1);
    let d2 = orientation(q1, q2, p2);
    let d3 = orientation(p1, p2, q1);
    let d4 = orientation(p1, p2, q2);

    if ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
    {
        return true;
    }

    (d1 == 0.0 && on_segment(q1, q2, p1))
        || (d2 == 0.0 && on_segment(q1, q2, p2))
        || (d3 == 0.0 && on_segment(p1, p2, q1))
        || (d4 == 0.0 && on_segment(p1, p2, q2))
}
