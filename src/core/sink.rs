//! Sink writer
//!
//! Commits sealed batches to the warehouse, retrying retryable results with
//! exponential backoff. In dry-run mode batches are logged and not written.

use crate::adapters::database::traits::{CommitResult, WarehouseClient};
use crate::core::batch::Batch;
use crate::core::retry::{retry_async, RetryError, RetryPolicy};
use crate::domain::SinkError;
use std::sync::Arc;

/// Result of a successful commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitReceipt {
    pub rows: u64,
    /// Upsert calls made, including the successful one
    pub attempts: u32,
}

pub struct SinkWriter {
    warehouse: Arc<dyn WarehouseClient>,
    policy: RetryPolicy,
    dry_run: bool,
}

impl SinkWriter {
    pub fn new(warehouse: Arc<dyn WarehouseClient>, policy: RetryPolicy) -> Self {
        Self {
            warehouse,
            policy,
            dry_run: false,
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn warehouse_name(&self) -> &str {
        self.warehouse.name()
    }

    /// Commit a sealed batch
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Fatal`] for a fatal result and
    /// [`SinkError::RetriesExhausted`] once retryable results have used up
    /// the attempt budget. In both cases nothing about the batch should be
    /// checkpointed.
    pub async fn commit(&self, batch: &Batch) -> Result<CommitReceipt, SinkError> {
        if self.dry_run {
            tracing::info!(
                source_id = %batch.source_id(),
                sequence = batch.sequence(),
                records = batch.len(),
                "Dry run, batch not written"
            );
            return Ok(CommitReceipt {
                rows: batch.len() as u64,
                attempts: 0,
            });
        }

        let operation = format!("commit {}#{}", batch.source_id(), batch.sequence());
        let outcome = retry_async(&self.policy, &operation, SinkError::is_transient, || async {
            match self.warehouse.upsert(batch).await {
                CommitResult::Success { rows } => Ok(rows),
                CommitResult::RetryableError(msg) => Err(SinkError::transient(msg)),
                CommitResult::FatalError(msg) => Err(SinkError::fatal(msg)),
            }
        })
        .await;

        match outcome {
            Ok((rows, attempts)) => {
                crate::log_batch_committed!(batch.source_id(), batch.sequence(), rows, attempts);
                if rows != batch.len() as u64 {
                    tracing::warn!(
                        source_id = %batch.source_id(),
                        sequence = batch.sequence(),
                        records = batch.len(),
                        rows,
                        "Warehouse wrote a different number of rows than the batch holds"
                    );
                }
                Ok(CommitReceipt { rows, attempts })
            }
            Err(RetryError::Permanent(e)) => Err(e),
            Err(RetryError::Exhausted {
                attempts,
                last_error,
            }) => Err(SinkError::RetriesExhausted {
                attempts,
                last_error: last_error.to_string(),
            }),
        }
    }
}
