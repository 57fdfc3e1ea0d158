//! Records as they move through the pipeline
//!
//! `RawChunk` (adapter output) is decoded into `ProvisionalRecord`s, which the
//! normalizer and reprojector turn into immutable `CanonicalRecord`s.

use super::cursor::SourceCursor;
use super::geometry::Geometry;
use super::ids::{RecordId, SourceId};
use bytes::Bytes;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Loosely typed field map of a provisional record
pub type FieldMap = BTreeMap<String, Value>;

/// Opaque bytes fetched by an adapter in one `next()` call
#[derive(Debug, Clone)]
pub struct RawChunk {
    pub source_id: SourceId,
    /// Cursor before this chunk was read
    pub start: SourceCursor,
    /// Cursor after this chunk
    pub end: SourceCursor,
    pub bytes: Bytes,
    pub fetched_at: DateTime<Utc>,
}

impl RawChunk {
    pub fn new(source_id: SourceId, start: SourceCursor, end: SourceCursor, bytes: Bytes) -> Self {
        Self {
            source_id,
            start,
            end,
            bytes,
            fetched_at: Utc::now(),
        }
    }
}

/// Where a record came from
///
/// Identifies the record by the chunk it was decoded from and its index in
/// that chunk. Since adapters resume deterministically, the same record
/// always gets the same provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub source_id: SourceId,
    pub chunk_start: SourceCursor,
    pub chunk_end: SourceCursor,
    pub index: u64,
    pub chunk_records: u64,
}

impl Provenance {
    /// Stable key, e.g. `chr@page:100#7`
    pub fn key(&self) -> String {
        format!("{}@{}#{}", self.source_id, self.chunk_start, self.index)
    }

    /// Returns true if this is the last record decoded from its chunk
    pub fn closes_chunk(&self) -> bool {
        self.index + 1 >= self.chunk_records
    }
}

/// A decoded record before schema mapping
#[derive(Debug, Clone)]
pub struct ProvisionalRecord {
    pub fields: FieldMap,
    pub provenance: Provenance,
    /// Set when the adapter could not decode this record's raw text
    pub decode_error: Option<String>,
}

/// A typed attribute value of a canonical record
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Timestamp(DateTime<Utc>),
    Date(NaiveDate),
}

impl FieldValue {
    /// JSON form used by the warehouse
    pub fn to_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::String(s) => Value::String(s.clone()),
            Self::Integer(i) => Value::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Self::Boolean(b) => Value::Bool(*b),
            Self::Timestamp(ts) => Value::String(ts.to_rfc3339()),
            Self::Date(d) => Value::String(d.format("%Y-%m-%d").to_string()),
        }
    }
}

/// A normalized, validated, reprojected record
///
/// Fields are private: a canonical record is only built by the reprojector
/// and never mutated afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct CanonicalRecord {
    record_id: RecordId,
    geometry: Geometry,
    crs: u32,
    attributes: BTreeMap<String, FieldValue>,
    provenance: Provenance,
    ingested_at: DateTime<Utc>,
}

impl CanonicalRecord {
    pub(crate) fn new(
        record_id: RecordId,
        geometry: Geometry,
        crs: u32,
        attributes: BTreeMap<String, FieldValue>,
        provenance: Provenance,
    ) -> Self {
        Self {
            record_id,
            geometry,
            crs,
            attributes,
            provenance,
            ingested_at: Utc::now(),
        }
    }

    pub fn record_id(&self) -> &RecordId {
        &self.record_id
    }

    /// Geometry in the target CRS
    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// EPSG code of the target CRS
    pub fn crs(&self) -> u32 {
        self.crs
    }

    pub fn attributes(&self) -> &BTreeMap<String, FieldValue> {
        &self.attributes
    }

    pub fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    pub fn source_id(&self) -> &SourceId {
        &self.provenance.source_id
    }

    pub fn ingested_at(&self) -> DateTime<Utc> {
        self.ingested_at
    }

    /// Attributes as a JSON object
    pub fn attributes_json(&self) -> Value {
        Value::Object(
            self.attributes
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }

    /// Size estimate used for batch byte bounds (serialized JSON length)
    pub fn estimated_size(&self) -> usize {
        serde_json::to_vec(self).map(|v| v.len()).unwrap_or(0)
    }
}
