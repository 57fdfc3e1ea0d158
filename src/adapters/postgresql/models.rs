//! PostgreSQL row models
//!
//! Mappings between domain types and the rows of the `canonical_records`,
//! `checkpoints` and `record_failures` tables.

use crate::core::state::{Checkpoint, CheckpointStatus};
use crate::domain::{
    CanonicalRecord, FailureRecord, FailureStage, Provenance, Result, SourceCursor, SourceId,
    StrataError,
};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio_postgres::Row;

/// Row of `canonical_records`
#[derive(Debug, Clone)]
pub struct PostgreSQLRecordRow {
    pub source_id: String,
    pub batch_sequence: i64,
    pub record_id: String,
    pub geometry: Value,
    pub geometry_wkt: String,
    pub crs_epsg: i32,
    pub attributes: Value,
    pub provenance_key: String,
    pub ingested_at: DateTime<Utc>,
}

impl PostgreSQLRecordRow {
    pub fn from_domain(record: &CanonicalRecord, batch_sequence: u64) -> Result<Self> {
        Ok(Self {
            source_id: record.source_id().to_string(),
            batch_sequence: to_i64(batch_sequence, "batch_sequence")?,
            record_id: record.record_id().to_string(),
            geometry: record.geometry().to_geojson(),
            geometry_wkt: record.geometry().to_wkt(),
            crs_epsg: record.crs() as i32,
            attributes: record.attributes_json(),
            provenance_key: record.provenance().key(),
            ingested_at: record.ingested_at(),
        })
    }
}

/// Row of `checkpoints`
#[derive(Debug, Clone)]
pub struct PostgreSQLCheckpoint {
    pub source_id: String,
    pub cursor: Value,
    pub records_to_skip: i64,
    pub last_committed_sequence: Option<i64>,
    pub records_committed: i64,
    pub records_failed: i64,
    pub batches_committed: i64,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl PostgreSQLCheckpoint {
    pub fn from_domain(checkpoint: &Checkpoint) -> Result<Self> {
        Ok(Self {
            source_id: checkpoint.source_id.to_string(),
            cursor: serde_json::to_value(&checkpoint.cursor)?,
            records_to_skip: to_i64(checkpoint.records_to_skip, "records_to_skip")?,
            last_committed_sequence: checkpoint
                .last_committed_sequence
                .map(|s| to_i64(s, "last_committed_sequence"))
                .transpose()?,
            records_committed: to_i64(checkpoint.records_committed, "records_committed")?,
            records_failed: to_i64(checkpoint.records_failed, "records_failed")?,
            batches_committed: to_i64(checkpoint.batches_committed, "batches_committed")?,
            status: checkpoint.status.as_str().to_string(),
            started_at: checkpoint.started_at,
            updated_at: checkpoint.updated_at,
            completed_at: checkpoint.completed_at,
        })
    }

    pub fn from_row(row: &Row) -> Self {
        Self {
            source_id: row.get("source_id"),
            cursor: row.get("cursor"),
            records_to_skip: row.get("records_to_skip"),
            last_committed_sequence: row.get("last_committed_sequence"),
            records_committed: row.get("records_committed"),
            records_failed: row.get("records_failed"),
            batches_committed: row.get("batches_committed"),
            status: row.get("status"),
            started_at: row.get("started_at"),
            updated_at: row.get("updated_at"),
            completed_at: row.get("completed_at"),
        }
    }

    pub fn to_domain(&self) -> Result<Checkpoint> {
        let source_id = SourceId::new(self.source_id.as_str()).map_err(StrataError::Validation)?;
        let cursor: SourceCursor = serde_json::from_value(self.cursor.clone())?;
        let status = match self.status.as_str() {
            "not_started" => CheckpointStatus::NotStarted,
            "in_progress" => CheckpointStatus::InProgress,
            "completed" => CheckpointStatus::Completed,
            "interrupted" => CheckpointStatus::Interrupted,
            _ => CheckpointStatus::Failed,
        };

        Ok(Checkpoint {
            source_id,
            cursor,
            records_to_skip: self.records_to_skip.max(0) as u64,
            last_committed_sequence: self.last_committed_sequence.map(|s| s.max(0) as u64),
            records_committed: self.records_committed.max(0) as u64,
            records_failed: self.records_failed.max(0) as u64,
            batches_committed: self.batches_committed.max(0) as u64,
            status,
            started_at: self.started_at,
            updated_at: self.updated_at,
            completed_at: self.completed_at,
        })
    }
}

/// Row of `record_failures`
#[derive(Debug, Clone)]
pub struct PostgreSQLFailure {
    pub source_id: String,
    pub provenance_key: String,
    pub provenance: Value,
    pub reason: String,
    pub field: Option<String>,
    pub detail: String,
    pub stage: String,
    pub fields: Value,
    pub recorded_at: DateTime<Utc>,
}

impl PostgreSQLFailure {
    pub fn from_domain(failure: &FailureRecord) -> Result<Self> {
        Ok(Self {
            source_id: failure.source_id.to_string(),
            provenance_key: failure.provenance_key.clone(),
            provenance: serde_json::to_value(&failure.provenance)?,
            reason: failure.reason.as_str().to_string(),
            field: failure.field.clone(),
            detail: failure.detail.clone(),
            stage: failure.stage.as_str().to_string(),
            fields: serde_json::to_value(&failure.fields)?,
            recorded_at: failure.recorded_at,
        })
    }

    pub fn from_row(row: &Row) -> Self {
        Self {
            source_id: row.get("source_id"),
            provenance_key: row.get("provenance_key"),
            provenance: row.get("provenance"),
            reason: row.get("reason"),
            field: row.get("field"),
            detail: row.get("detail"),
            stage: row.get("stage"),
            fields: row.get("fields"),
            recorded_at: row.get("recorded_at"),
        }
    }

    pub fn to_domain(&self) -> Result<FailureRecord> {
        let provenance: Provenance = serde_json::from_value(self.provenance.clone())?;
        let stage: FailureStage = serde_json::from_value(Value::String(self.stage.clone()))?;
        Ok(FailureRecord {
            source_id: SourceId::new(self.source_id.as_str()).map_err(StrataError::Validation)?,
            provenance_key: self.provenance_key.clone(),
            provenance,
            reason: self.reason.parse().map_err(StrataError::Validation)?,
            field: self.field.clone(),
            detail: self.detail.clone(),
            stage,
            fields: serde_json::from_value(self.fields.clone())?,
            recorded_at: self.recorded_at,
        })
    }
}

fn to_i64(value: u64, name: &str) -> Result<i64> {
    i64::try_from(value)
        .map_err(|_| StrataError::Validation(format!("{} {} does not fit in BIGINT", name, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::CheckpointBuilder;
    use crate::domain::RecordRejection;

    #[test]
    fn test_checkpoint_row_round_trip() {
        let checkpoint = CheckpointBuilder::new(SourceId::new("chr").unwrap())
            .cursor(SourceCursor::Document {
                doc_index: 1,
                path: "reports/2024.pdf".to_string(),
                page: 3,
            })
            .records_to_skip(2)
            .last_committed_sequence(9)
            .records_committed(4500)
            .status(CheckpointStatus::InProgress)
            .build();

        let row = PostgreSQLCheckpoint::from_domain(&checkpoint).unwrap();
        assert_eq!(row.status, "in_progress");
        assert_eq!(row.last_committed_sequence, Some(9));
        assert_eq!(row.to_domain().unwrap(), checkpoint);
    }

    #[test]
    fn test_failure_row_round_trip() {
        let failure = FailureRecord::new(
            RecordRejection::type_mismatch("HerdSize", "expected an integer, got \"x\""),
            FailureStage::Normalize,
            Provenance {
                source_id: SourceId::new("chr").unwrap(),
                chunk_start: SourceCursor::Page { offset: 0 },
                chunk_end: SourceCursor::Page { offset: 100 },
                index: 5,
                chunk_records: 100,
            },
            Default::default(),
        );

        let row = PostgreSQLFailure::from_domain(&failure).unwrap();
        assert_eq!(row.reason, "type_mismatch");
        assert_eq!(row.stage, "normalize");
        assert_eq!(row.to_domain().unwrap(), failure);
    }

    #[test]
    fn test_to_i64_overflow() {
        assert!(to_i64(u64::MAX, "x").is_err());
        assert_eq!(to_i64(7, "x").unwrap(), 7);
    }
}
