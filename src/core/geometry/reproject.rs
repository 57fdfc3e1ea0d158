//! Reprojection into the pipeline's target CRS

use super::crs::Crs;
use super::validate::validate_geometry;
use crate::core::normalize::NormalizedRecord;
use crate::domain::{CanonicalRecord, Geometry, RecordRejection};

/// Transforms every coordinate of `geometry` from `from` to `to`
///
/// Projected to projected transforms go through geographic coordinates.
pub fn transform_geometry(geometry: &Geometry, from: &Crs, to: &Crs) -> Result<Geometry, String> {
    if from.same_projection(to) {
        return Ok(geometry.clone());
    }
    geometry.try_map_coords(|c| {
        let geographic = from.to_geographic(c)?;
        to.from_geographic(geographic)
    })
}

/// Validates geometries in their source CRS and moves them to the target CRS
#[derive(Debug, Clone)]
pub struct Reprojector {
    target: Crs,
    require_simple: bool,
}

impl Reprojector {
    pub fn new(target: Crs, require_simple: bool) -> Self {
        Self {
            target,
            require_simple,
        }
    }

    pub fn target(&self) -> &Crs {
        &self.target
    }

    pub fn reproject(&self, geometry: &Geometry, source_crs: &Crs) -> Result<Geometry, RecordRejection> {
        validate_geometry(geometry, source_crs, self.require_simple)
            .map_err(RecordRejection::invalid_geometry)?;

        let projected = transform_geometry(geometry, source_crs, &self.target).map_err(|e| {
            RecordRejection::invalid_geometry(format!(
                "cannot reproject from {} to {}: {}",
                source_crs, self.target, e
            ))
        })?;

        // Projection can fold a valid ring onto itself near the edges of a zone
        validate_geometry(&projected, &self.target, self.require_simple).map_err(|e| {
            RecordRejection::invalid_geometry(format!("invalid after reprojection: {}", e))
        })?;

        Ok(projected)
    }

    /// Builds the canonical record for a normalized record
    pub fn canonicalize(
        &self,
        record: NormalizedRecord,
        source_crs: &Crs,
    ) -> Result<CanonicalRecord, RecordRejection> {
        let geometry = self.reproject(&record.geometry, source_crs)?;
        Ok(CanonicalRecord::new(
            record.record_id,
            geometry,
            self.target.epsg(),
            record.attributes,
            record.provenance,
        ))
    }
}
