//! Checkpoint model for resumable ingestion
//!
//! One checkpoint per source records where the adapter has to resume and
//! how far batch numbering has progressed. It is written only after a batch
//! is durably committed.

use crate::domain::{Provenance, SourceCursor, SourceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of the last run of a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    #[default]
    NotStarted,
    InProgress,
    /// The source reached end of stream
    Completed,
    Failed,
    /// Stopped by a stop signal
    Interrupted,
}

impl CheckpointStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Interrupted => "interrupted",
        }
    }
}

impl std::fmt::Display for CheckpointStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Adapter position plus the number of already committed records to skip
/// in the first chunk read from there
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResumePosition {
    pub cursor: SourceCursor,
    pub records_to_skip: u64,
}

impl ResumePosition {
    /// Position right after the record with provenance `last`
    ///
    /// If `last` closed its chunk the next chunk starts clean. Otherwise the
    /// chunk is fetched again and its first `index + 1` records are skipped.
    pub fn after(last: &Provenance) -> Self {
        if last.closes_chunk() {
            Self {
                cursor: last.chunk_end.clone(),
                records_to_skip: 0,
            }
        } else {
            Self {
                cursor: last.chunk_start.clone(),
                records_to_skip: last.index + 1,
            }
        }
    }
}

/// Per-source ingestion progress
///
/// # Examples
///
/// ```
/// use strata::core::state::{CheckpointBuilder, CheckpointStatus};
/// use strata::domain::SourceId;
///
/// let checkpoint = CheckpointBuilder::new(SourceId::new("chr_herds").unwrap())
///     .records_committed(500)
///     .last_committed_sequence(0)
///     .build();
///
/// assert_eq!(checkpoint.records_committed, 500);
/// assert_eq!(checkpoint.status, CheckpointStatus::NotStarted);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub source_id: SourceId,

    /// Adapter cursor to resume from
    pub cursor: SourceCursor,

    /// Records of the chunk at `cursor` that were already committed
    pub records_to_skip: u64,

    /// Sequence of the last durably committed batch
    pub last_committed_sequence: Option<u64>,

    pub records_committed: u64,
    pub records_failed: u64,
    pub batches_committed: u64,

    pub status: CheckpointStatus,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Checkpoint {
    pub fn new(source_id: SourceId) -> Self {
        CheckpointBuilder::new(source_id).build()
    }

    pub fn resume_position(&self) -> ResumePosition {
        ResumePosition {
            cursor: self.cursor.clone(),
            records_to_skip: self.records_to_skip,
        }
    }

    /// Duration of the last run if it finished
    pub fn last_run_duration(&self) -> Option<chrono::Duration> {
        self.completed_at.map(|done| done - self.started_at)
    }

    pub fn mark_started(&mut self) {
        let now = Utc::now();
        self.started_at = now;
        self.updated_at = now;
        self.completed_at = None;
        self.status = CheckpointStatus::InProgress;
    }

    /// Records a committed batch
    pub fn record_commit(&mut self, sequence: u64, rows: u64, position: ResumePosition) {
        self.cursor = position.cursor;
        self.records_to_skip = position.records_to_skip;
        self.last_committed_sequence = Some(sequence);
        self.records_committed += rows;
        self.batches_committed += 1;
        self.updated_at = Utc::now();
    }

    pub fn record_failures(&mut self, count: u64) {
        self.records_failed += count;
        self.updated_at = Utc::now();
    }

    pub fn mark_completed(&mut self) {
        self.finish(CheckpointStatus::Completed);
    }

    pub fn mark_failed(&mut self) {
        self.finish(CheckpointStatus::Failed);
    }

    pub fn mark_interrupted(&mut self) {
        self.finish(CheckpointStatus::Interrupted);
    }

    fn finish(&mut self, status: CheckpointStatus) {
        let now = Utc::now();
        self.status = status;
        self.updated_at = now;
        self.completed_at = Some(now);
    }
}

/// Builder for [`Checkpoint`]
pub struct CheckpointBuilder {
    source_id: SourceId,
    cursor: SourceCursor,
    records_to_skip: u64,
    last_committed_sequence: Option<u64>,
    records_committed: u64,
    records_failed: u64,
    batches_committed: u64,
    status: CheckpointStatus,
}

impl CheckpointBuilder {
    pub fn new(source_id: SourceId) -> Self {
        Self {
            source_id,
            cursor: SourceCursor::Start,
            records_to_skip: 0,
            last_committed_sequence: None,
            records_committed: 0,
            records_failed: 0,
            batches_committed: 0,
            status: CheckpointStatus::NotStarted,
        }
    }

    pub fn cursor(mut self, cursor: SourceCursor) -> Self {
        self.cursor = cursor;
        self
    }

    pub fn records_to_skip(mut self, n: u64) -> Self {
        self.records_to_skip = n;
        self
    }

    pub fn last_committed_sequence(mut self, sequence: u64) -> Self {
        self.last_committed_sequence = Some(sequence);
        self
    }

    pub fn records_committed(mut self, n: u64) -> Self {
        self.records_committed = n;
        self
    }

    pub fn records_failed(mut self, n: u64) -> Self {
        self.records_failed = n;
        self
    }

    pub fn batches_committed(mut self, n: u64) -> Self {
        self.batches_committed = n;
        self
    }

    pub fn status(mut self, status: CheckpointStatus) -> Self {
        self.status = status;
        self
    }

    pub fn build(self) -> Checkpoint {
        let now = Utc::now();
        Checkpoint {
            source_id: self.source_id,
            cursor: self.cursor,
            records_to_skip: self.records_to_skip,
            last_committed_sequence: self.last_committed_sequence,
            records_committed: self.records_committed,
            records_failed: self.records_failed,
            batches_committed: self.batches_committed,
            status: self.status,
            started_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provenance(index: u64, chunk_records: u64) -> Provenance {
        Provenance {
            source_id: SourceId::new("chr").unwrap(),
            chunk_start: SourceCursor::Page { offset: 100 },
            chunk_end: SourceCursor::Page { offset: 200 },
            index,
            chunk_records,
        }
    }

    #[test]
    fn test_resume_after_last_record_of_chunk() {
        let pos = ResumePosition::after(&provenance(99, 100));
        assert_eq!(pos.cursor, SourceCursor::Page { offset: 200 });
        assert_eq!(pos.records_to_skip, 0);
    }

    #[test]
    fn test_resume_inside_chunk() {
        let pos = ResumePosition::after(&provenance(41, 100));
        assert_eq!(pos.cursor, SourceCursor::Page { offset: 100 });
        assert_eq!(pos.records_to_skip, 42);
    }

    #[test]
    fn test_record_commit_updates_progress() {
        let mut checkpoint = Checkpoint::new(SourceId::new("chr").unwrap());
        checkpoint.mark_started();
        assert_eq!(checkpoint.status, CheckpointStatus::InProgress);

        checkpoint.record_commit(0, 100, ResumePosition::after(&provenance(99, 100)));
        checkpoint.record_commit(1, 30, ResumePosition::after(&provenance(29, 100)));
        checkpoint.record_failures(2);

        assert_eq!(checkpoint.last_committed_sequence, Some(1));
        assert_eq!(checkpoint.records_committed, 130);
        assert_eq!(checkpoint.batches_committed, 2);
        assert_eq!(checkpoint.records_failed, 2);
        assert_eq!(checkpoint.records_to_skip, 30);

        checkpoint.mark_interrupted();
        assert_eq!(checkpoint.status, CheckpointStatus::Interrupted);
        assert!(checkpoint.last_run_duration().is_some());
    }

    #[test]
    fn test_checkpoint_serde_round_trip() {
        let checkpoint = CheckpointBuilder::new(SourceId::new("chr").unwrap())
            .cursor(SourceCursor::File {
                file_index: 2,
                path: "in/herds_03.csv".to_string(),
                offset: 4096,
            })
            .records_to_skip(7)
            .last_committed_sequence(11)
            .status(CheckpointStatus::Completed)
            .build();

        let json = serde_json::to_string(&checkpoint).unwrap();
        let back: Checkpoint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, checkpoint);
        assert!(json.contains("\"status\":\"completed\""));
    }
}
