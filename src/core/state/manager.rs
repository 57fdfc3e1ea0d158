//! Checkpoint manager
//!
//! Thin layer over a [`CheckpointStorage`] backend. Each source pipeline is
//! the single writer of its own checkpoint; status queries read
//! concurrently.

use crate::adapters::database::traits::CheckpointStorage;
use crate::core::state::checkpoint::Checkpoint;
use crate::domain::{Result, SourceId};
use std::sync::Arc;

pub struct CheckpointManager {
    storage: Arc<dyn CheckpointStorage>,
    dry_run: bool,
}

impl CheckpointManager {
    pub fn new(storage: Arc<dyn CheckpointStorage>) -> Self {
        Self {
            storage,
            dry_run: false,
        }
    }

    /// In dry-run mode checkpoints are loaded but never written
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Load the checkpoint of a source, or a fresh one if none exists
    pub async fn load_or_new(&self, source_id: &SourceId) -> Result<Checkpoint> {
        match self.storage.load_checkpoint(source_id).await? {
            Some(checkpoint) => {
                tracing::info!(
                    source_id = %source_id,
                    cursor = %checkpoint.cursor,
                    records_to_skip = checkpoint.records_to_skip,
                    last_committed_sequence = ?checkpoint.last_committed_sequence,
                    status = %checkpoint.status,
                    "Resuming from checkpoint"
                );
                Ok(checkpoint)
            }
            None => Ok(Checkpoint::new(source_id.clone())),
        }
    }

    pub async fn load(&self, source_id: &SourceId) -> Result<Option<Checkpoint>> {
        self.storage.load_checkpoint(source_id).await
    }

    /// Persist a checkpoint
    pub async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        if self.dry_run {
            tracing::debug!(source_id = %checkpoint.source_id, "Dry run, checkpoint not written");
            return Ok(());
        }
        self.storage.save_checkpoint(checkpoint).await
    }

    /// Persist the checkpoint after a committed batch
    pub async fn checkpoint_batch(&self, checkpoint: &Checkpoint) -> Result<()> {
        tracing::debug!(
            source_id = %checkpoint.source_id,
            sequence = ?checkpoint.last_committed_sequence,
            cursor = %checkpoint.cursor,
            records_committed = checkpoint.records_committed,
            "Checkpointing batch"
        );
        self.save(checkpoint).await
    }

    pub async fn get_all(&self) -> Result<Vec<Checkpoint>> {
        self.storage.get_all_checkpoints().await
    }
}
