//! In-memory backends
//!
//! Used for dry runs and tests. The warehouse keeps the same row key and
//! batch ledger as the PostgreSQL backend so idempotence can be checked
//! without a database.

use crate::adapters::database::traits::{
    CheckpointStorage, CommitResult, FailureStorage, WarehouseClient,
};
use crate::core::batch::Batch;
use crate::core::state::Checkpoint;
use crate::domain::{FailureRecord, Result, SourceId};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A stored warehouse row
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    pub geometry: Value,
    pub wkt: String,
    pub crs: u32,
    pub attributes: Value,
    pub provenance_key: String,
}

/// Row key: (source id, batch sequence, record id)
pub type RowKey = (String, u64, String);

#[derive(Default)]
struct WarehouseState {
    rows: BTreeMap<RowKey, StoredRow>,
    /// (source id, sequence) -> (rows in the batch, checksum)
    committed_batches: BTreeMap<(String, u64), (u64, String)>,
    /// Results returned before any real write, in order
    scripted: VecDeque<CommitResult>,
}

/// Warehouse held in process memory
#[derive(Default)]
pub struct InMemoryWarehouse {
    state: Mutex<WarehouseState>,
    upsert_calls: AtomicU64,
}

impl InMemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue results to return from the next `upsert` calls instead of
    /// writing, e.g. two retryable errors before a success
    pub fn script_results(&self, results: impl IntoIterator<Item = CommitResult>) {
        lock(&self.state).scripted.extend(results);
    }

    /// Number of `upsert` calls, including scripted ones
    pub fn upsert_calls(&self) -> u64 {
        self.upsert_calls.load(Ordering::SeqCst)
    }

    pub fn row_count(&self) -> usize {
        lock(&self.state).rows.len()
    }

    /// Rows of one source, ordered by (sequence, record id)
    pub fn rows_for(&self, source_id: &str) -> Vec<(RowKey, StoredRow)> {
        lock(&self.state)
            .rows
            .iter()
            .filter(|(key, _)| key.0 == source_id)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Row count per committed batch of one source, ordered by sequence
    pub fn committed_batches(&self, source_id: &str) -> Vec<(u64, u64)> {
        lock(&self.state)
            .committed_batches
            .iter()
            .filter(|((source, _), _)| source == source_id)
            .map(|((_, seq), (rows, _))| (*seq, *rows))
            .collect()
    }
}

#[async_trait]
impl WarehouseClient for InMemoryWarehouse {
    async fn test_connection(&self) -> Result<()> {
        Ok(())
    }

    async fn ensure_schema(&self) -> Result<()> {
        Ok(())
    }

    async fn upsert(&self, batch: &Batch) -> CommitResult {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = lock(&self.state);
        if let Some(result) = state.scripted.pop_front() {
            return result;
        }

        let source = batch.source_id().to_string();
        let sequence = batch.sequence();

        // Replace the row set of this batch as a whole
        state
            .rows
            .retain(|(s, seq, _), _| !(s == &source && *seq == sequence));
        // A repeated record id keeps its first row, as in PostgreSQL
        let mut rows = 0u64;
        for record in batch.records() {
            let key = (source.clone(), sequence, record.record_id().to_string());
            if state.rows.contains_key(&key) {
                continue;
            }
            state.rows.insert(
                key,
                StoredRow {
                    geometry: record.geometry().to_geojson(),
                    wkt: record.geometry().to_wkt(),
                    crs: record.crs(),
                    attributes: record.attributes_json(),
                    provenance_key: record.provenance().key(),
                },
            );
            rows += 1;
        }
        let checksum = batch.checksum();
        if let Some((_, previous)) = state.committed_batches.get(&(source.clone(), sequence)) {
            if previous != &checksum {
                tracing::warn!(
                    source_id = %source,
                    sequence,
                    "Re-committed batch differs from the stored one"
                );
            }
        }
        state
            .committed_batches
            .insert((source, sequence), (rows, checksum));
        CommitResult::Success { rows }
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// Checkpoints held in process memory
#[derive(Default)]
pub struct InMemoryCheckpointStorage {
    checkpoints: Mutex<BTreeMap<String, Checkpoint>>,
}

impl InMemoryCheckpointStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStorage for InMemoryCheckpointStorage {
    async fn load_checkpoint(&self, source_id: &SourceId) -> Result<Option<Checkpoint>> {
        Ok(lock(&self.checkpoints).get(source_id.as_str()).cloned())
    }

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        lock(&self.checkpoints).insert(checkpoint.source_id.to_string(), checkpoint.clone());
        Ok(())
    }

    async fn get_all_checkpoints(&self) -> Result<Vec<Checkpoint>> {
        Ok(lock(&self.checkpoints).values().cloned().collect())
    }
}

#[derive(Default)]
struct FailureState {
    records: Vec<FailureRecord>,
    keys: HashSet<(String, String)>,
}

/// Failure sink held in process memory
#[derive(Default)]
pub struct InMemoryFailureStorage {
    state: Mutex<FailureState>,
}

impl InMemoryFailureStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<FailureRecord> {
        lock(&self.state).records.clone()
    }
}

#[async_trait]
impl FailureStorage for InMemoryFailureStorage {
    async fn append_failure(&self, failure: &FailureRecord) -> Result<bool> {
        let mut state = lock(&self.state);
        let key = (failure.source_id.to_string(), failure.provenance_key.clone());
        if !state.keys.insert(key) {
            return Ok(false);
        }
        state.records.push(failure.clone());
        Ok(true)
    }

    async fn list_failures(&self, source_id: &SourceId) -> Result<Vec<FailureRecord>> {
        Ok(lock(&self.state)
            .records
            .iter()
            .filter(|f| &f.source_id == source_id)
            .cloned()
            .collect())
    }
}
