//! Storage abstraction traits
//!
//! The warehouse, the checkpoint store and the failure sink are trait
//! objects so that PostgreSQL, file and in-memory backends can be mixed
//! per deployment and in tests.

use crate::core::batch::Batch;
use crate::core::state::Checkpoint;
use crate::domain::{FailureRecord, Result, SourceId};
use async_trait::async_trait;

/// Outcome of one warehouse upsert
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitResult {
    /// The batch is durable; `rows` rows were written
    Success { rows: u64 },
    /// The write failed but may succeed if retried (connection loss,
    /// serialization failure, timeout)
    RetryableError(String),
    /// The write can never succeed as is
    FatalError(String),
}

/// Warehouse that canonical batches are committed to
///
/// `upsert` must be idempotent per `(source_id, sequence)`: applying the
/// same sealed batch twice leaves exactly one row set for it.
#[async_trait]
pub trait WarehouseClient: Send + Sync {
    /// Test the warehouse connection
    ///
    /// # Errors
    ///
    /// Returns an error if the warehouse cannot be reached.
    async fn test_connection(&self) -> Result<()>;

    /// Create tables if they do not exist
    async fn ensure_schema(&self) -> Result<()>;

    /// Write a sealed batch
    async fn upsert(&self, batch: &Batch) -> CommitResult;

    /// Backend name for logs
    fn name(&self) -> &str;
}

/// Checkpoint persistence keyed by source id
#[async_trait]
pub trait CheckpointStorage: Send + Sync {
    /// Load the checkpoint of a source
    ///
    /// Returns `Ok(None)` if the source has never committed.
    async fn load_checkpoint(&self, source_id: &SourceId) -> Result<Option<Checkpoint>>;

    /// Create or replace the checkpoint of a source
    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()>;

    /// All stored checkpoints, ordered by source id
    async fn get_all_checkpoints(&self) -> Result<Vec<Checkpoint>>;
}

/// Append-only failure sink
///
/// Records are deduplicated by `(source_id, provenance_key)` so that a
/// record re-rejected after a resume is stored once.
#[async_trait]
pub trait FailureStorage: Send + Sync {
    /// Append a failure record. Returns false if it was already present.
    async fn append_failure(&self, failure: &FailureRecord) -> Result<bool>;

    /// Failures of one source in insertion order
    async fn list_failures(&self, source_id: &SourceId) -> Result<Vec<FailureRecord>>;

    /// Number of stored failures of one source
    async fn count_failures(&self, source_id: &SourceId) -> Result<u64> {
        Ok(self.list_failures(source_id).await?.len() as u64)
    }
}
