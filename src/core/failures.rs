//! Failure sink
//!
//! Rejected records go here instead of the warehouse. Each source pipeline
//! writes its own failures; the store deduplicates by provenance so a
//! record rejected again after a resume is stored once.

use crate::adapters::database::traits::FailureStorage;
use crate::domain::{FailureRecord, FailureStage, FieldMap, Provenance, RecordRejection, Result, SourceId};
use std::sync::Arc;

pub struct FailureSink {
    storage: Arc<dyn FailureStorage>,
    dry_run: bool,
}

impl FailureSink {
    pub fn new(storage: Arc<dyn FailureStorage>) -> Self {
        Self {
            storage,
            dry_run: false,
        }
    }

    /// In dry-run mode rejections are logged only
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Store a rejection. Returns false if the record was already stored.
    pub async fn reject(
        &self,
        rejection: RecordRejection,
        stage: FailureStage,
        provenance: Provenance,
        fields: FieldMap,
    ) -> Result<bool> {
        tracing::debug!(
            source_id = %provenance.source_id,
            provenance = %provenance.key(),
            stage = stage.as_str(),
            reason = rejection.reason.as_str(),
            field = rejection.field.as_deref().unwrap_or(""),
            detail = %rejection.detail,
            "Record rejected"
        );
        if self.dry_run {
            return Ok(true);
        }
        let failure = FailureRecord::new(rejection, stage, provenance, fields);
        self.storage.append_failure(&failure).await
    }

    pub async fn list(&self, source_id: &SourceId) -> Result<Vec<FailureRecord>> {
        self.storage.list_failures(source_id).await
    }

    pub async fn count(&self, source_id: &SourceId) -> Result<u64> {
        self.storage.count_failures(source_id).await
    }
}
