//! Record-level rejections and failure records
//!
//! A rejected record never stops its pipeline. It is converted into a
//! `FailureRecord` and appended to the failure sink.

use super::ids::SourceId;
use super::record::{FieldMap, Provenance};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a record was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    MissingField,
    TypeMismatch,
    ConstraintViolation,
    InvalidGeometry,
}

impl RejectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingField => "missing_field",
            Self::TypeMismatch => "type_mismatch",
            Self::ConstraintViolation => "constraint_violation",
            Self::InvalidGeometry => "invalid_geometry",
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RejectionReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "missing_field" => Ok(Self::MissingField),
            "type_mismatch" => Ok(Self::TypeMismatch),
            "constraint_violation" => Ok(Self::ConstraintViolation),
            "invalid_geometry" => Ok(Self::InvalidGeometry),
            other => Err(format!("unknown rejection reason '{}'", other)),
        }
    }
}

/// Pipeline stage that rejected a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Decode,
    Normalize,
    Reproject,
    Batch,
}

impl FailureStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Decode => "decode",
            Self::Normalize => "normalize",
            Self::Reproject => "reproject",
            Self::Batch => "batch",
        }
    }
}

/// A validation failure for one record
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason}: {detail}")]
pub struct RecordRejection {
    pub reason: RejectionReason,
    /// Mapped field at fault, if any
    pub field: Option<String>,
    pub detail: String,
}

impl RecordRejection {
    pub fn new(reason: RejectionReason, field: Option<&str>, detail: impl Into<String>) -> Self {
        Self {
            reason,
            field: field.map(str::to_string),
            detail: detail.into(),
        }
    }

    pub fn missing_field(field: &str) -> Self {
        Self::new(
            RejectionReason::MissingField,
            Some(field),
            format!("required field '{}' is missing", field),
        )
    }

    pub fn type_mismatch(field: &str, detail: impl Into<String>) -> Self {
        Self::new(RejectionReason::TypeMismatch, Some(field), detail)
    }

    pub fn constraint_violation(field: Option<&str>, detail: impl Into<String>) -> Self {
        Self::new(RejectionReason::ConstraintViolation, field, detail)
    }

    pub fn invalid_geometry(detail: impl Into<String>) -> Self {
        Self::new(RejectionReason::InvalidGeometry, None, detail)
    }
}

/// A rejected record as stored in the failure sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub source_id: SourceId,
    /// `Provenance::key()`, the dedup key within a source
    pub provenance_key: String,
    pub provenance: Provenance,
    pub reason: RejectionReason,
    pub field: Option<String>,
    pub detail: String,
    pub stage: FailureStage,
    /// Raw fields as decoded
    pub fields: FieldMap,
    pub recorded_at: DateTime<Utc>,
}

impl FailureRecord {
    pub fn new(
        rejection: RecordRejection,
        stage: FailureStage,
        provenance: Provenance,
        fields: FieldMap,
    ) -> Self {
        Self {
            source_id: provenance.source_id.clone(),
            provenance_key: provenance.key(),
            provenance,
            reason: rejection.reason,
            field: rejection.field,
            detail: rejection.detail,
            stage,
            fields,
            recorded_at: Utc::now(),
        }
    }
}
