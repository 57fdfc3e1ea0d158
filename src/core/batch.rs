//! Batch assembly
//!
//! Groups canonical records of one source into sealed batches bounded by
//! record count and estimated bytes. Records keep their arrival order and
//! sealed batches get consecutive sequence numbers. Record ids are unique
//! within a batch, since the warehouse keys rows on them.

use crate::config::BatchConfig;
use crate::domain::{CanonicalRecord, Provenance, RecordId, RecordRejection, SourceId};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::Instant;

/// Size and age bounds of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    pub max_records: usize,
    pub max_bytes: usize,
    pub max_age: Duration,
}

impl BatchLimits {
    pub fn from_config(config: &BatchConfig) -> Self {
        Self {
            max_records: config.max_records.max(1),
            max_bytes: config.max_bytes,
            max_age: Duration::from_millis(config.max_age_ms),
        }
    }
}

/// A sealed, ordered group of records ready to commit
#[derive(Debug, Clone)]
pub struct Batch {
    source_id: SourceId,
    sequence: u64,
    records: Vec<CanonicalRecord>,
    bytes: usize,
}

impl Batch {
    pub fn source_id(&self) -> &SourceId {
        &self.source_id
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn records(&self) -> &[CanonicalRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Estimated serialized size
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    /// Provenance of the last record, from which the resume position after
    /// this batch is derived
    pub fn last_provenance(&self) -> Option<&Provenance> {
        self.records.last().map(CanonicalRecord::provenance)
    }

    /// SHA-256 over record ids, geometries and attributes, in order
    ///
    /// Stored in the batch ledger; a re-commit with a different checksum
    /// means the source did not replay deterministically.
    pub fn checksum(&self) -> String {
        let mut hasher = Sha256::new();
        for record in &self.records {
            hasher.update(record.record_id().as_str().as_bytes());
            hasher.update([0u8]);
            hasher.update(record.geometry().to_wkt().as_bytes());
            hasher.update([0u8]);
            hasher.update(record.attributes_json().to_string().as_bytes());
            hasher.update([b'\n']);
        }
        format!("{:x}", hasher.finalize())
    }
}

/// Accumulates records for one source
#[derive(Debug)]
pub struct BatchAssembler {
    source_id: SourceId,
    limits: BatchLimits,
    next_sequence: u64,
    open: Vec<CanonicalRecord>,
    open_ids: HashSet<RecordId>,
    open_bytes: usize,
    opened_at: Option<Instant>,
}

impl BatchAssembler {
    /// Sequence numbering continues after `last_committed_sequence`
    pub fn new(source_id: SourceId, limits: BatchLimits, last_committed_sequence: Option<u64>) -> Self {
        Self {
            source_id,
            limits,
            next_sequence: last_committed_sequence.map_or(0, |s| s + 1),
            open: Vec::new(),
            open_ids: HashSet::new(),
            open_bytes: 0,
            opened_at: None,
        }
    }

    /// Records in the open batch
    pub fn pending(&self) -> usize {
        self.open.len()
    }

    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// When the open batch reaches its maximum age
    pub fn deadline(&self) -> Option<Instant> {
        self.opened_at.map(|t| t + self.limits.max_age)
    }

    /// Adds a record, returning a batch if one was sealed
    ///
    /// The open batch is sealed before the record when the record would
    /// push it over `max_bytes`, and after the record when it reaches
    /// `max_records`. A record larger than `max_bytes` on its own is
    /// rejected, and so is a record whose id is already in the open batch.
    pub fn push(&mut self, record: CanonicalRecord) -> Result<Option<Batch>, RecordRejection> {
        let size = record.estimated_size();
        if size > self.limits.max_bytes {
            return Err(RecordRejection::constraint_violation(
                None,
                format!(
                    "record of {} bytes exceeds the batch limit of {} bytes",
                    size, self.limits.max_bytes
                ),
            ));
        }

        let seal_first =
            !self.open.is_empty() && self.open_bytes.saturating_add(size) > self.limits.max_bytes;
        if !seal_first && self.open_ids.contains(record.record_id()) {
            return Err(RecordRejection::constraint_violation(
                None,
                format!(
                    "record id '{}' already occurs in batch {}",
                    record.record_id(),
                    self.next_sequence
                ),
            ));
        }

        let mut sealed = None;
        if seal_first {
            sealed = self.seal();
        }

        if self.open.is_empty() {
            self.opened_at = Some(Instant::now());
        }
        self.open_ids.insert(record.record_id().clone());
        self.open.push(record);
        self.open_bytes += size;

        if self.open.len() >= self.limits.max_records {
            debug_assert!(sealed.is_none());
            sealed = self.seal();
        }
        Ok(sealed)
    }

    /// Seals the open batch, if any (end of stream or age timeout)
    pub fn flush(&mut self) -> Option<Batch> {
        self.seal()
    }

    /// Drops the open batch, returning how many records it held
    pub fn discard(&mut self) -> usize {
        let dropped = self.open.len();
        self.open.clear();
        self.open_ids.clear();
        self.open_bytes = 0;
        self.opened_at = None;
        dropped
    }

    fn seal(&mut self) -> Option<Batch> {
        if self.open.is_empty() {
            return None;
        }
        let batch = Batch {
            source_id: self.source_id.clone(),
            sequence: self.next_sequence,
            records: std::mem::take(&mut self.open),
            bytes: std::mem::replace(&mut self.open_bytes, 0),
        };
        self.open_ids.clear();
        self.next_sequence += 1;
        self.opened_at = None;

        tracing::debug!(
            source_id = %batch.source_id,
            sequence = batch.sequence,
            records = batch.records.len(),
            bytes = batch.bytes,
            "Batch sealed"
        );
        Some(batch)
    }
}
