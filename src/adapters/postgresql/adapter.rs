//! PostgreSQL adapter implementing the storage traits
//!
//! A batch is written in one transaction: its previous row set (if any) is
//! deleted, every record is upserted on `(source_id, batch_sequence,
//! record_id)` and the `committed_batches` ledger row is upserted. A
//! re-commit of the same batch therefore leaves exactly one row set.

use crate::adapters::database::traits::{
    CheckpointStorage, CommitResult, FailureStorage, WarehouseClient,
};
use crate::adapters::postgresql::client::{is_retryable, PostgreSQLClient};
use crate::adapters::postgresql::models::{
    PostgreSQLCheckpoint, PostgreSQLFailure, PostgreSQLRecordRow,
};
use crate::core::batch::Batch;
use crate::core::state::Checkpoint;
use crate::domain::{FailureRecord, Result, SourceId, StrataError};
use async_trait::async_trait;
use std::collections::HashSet;

const DELETE_BATCH_ROWS: &str =
    "DELETE FROM canonical_records WHERE source_id = $1 AND batch_sequence = $2";

const UPSERT_RECORD: &str = r#"
    INSERT INTO canonical_records (
        source_id, batch_sequence, record_id, geometry, geometry_wkt,
        crs_epsg, attributes, provenance_key, ingested_at
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
    ON CONFLICT (source_id, batch_sequence, record_id) DO UPDATE SET
        geometry = EXCLUDED.geometry,
        geometry_wkt = EXCLUDED.geometry_wkt,
        crs_epsg = EXCLUDED.crs_epsg,
        attributes = EXCLUDED.attributes,
        provenance_key = EXCLUDED.provenance_key,
        ingested_at = EXCLUDED.ingested_at
"#;

const UPSERT_LEDGER: &str = r#"
    INSERT INTO committed_batches (source_id, batch_sequence, record_count, checksum, committed_at)
    VALUES ($1, $2, $3, $4, now())
    ON CONFLICT (source_id, batch_sequence) DO UPDATE SET
        record_count = EXCLUDED.record_count,
        checksum = EXCLUDED.checksum,
        committed_at = EXCLUDED.committed_at
"#;

/// Error of one write attempt, classified for the sink's retry loop
enum WriteError {
    Retryable(String),
    Fatal(String),
}

impl From<tokio_postgres::Error> for WriteError {
    fn from(e: tokio_postgres::Error) -> Self {
        if is_retryable(&e) {
            WriteError::Retryable(e.to_string())
        } else {
            WriteError::Fatal(e.to_string())
        }
    }
}

/// PostgreSQL adapter for the warehouse, checkpoints and failures
pub struct PostgreSQLAdapter {
    client: PostgreSQLClient,
}

impl PostgreSQLAdapter {
    pub fn new(client: PostgreSQLClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &PostgreSQLClient {
        &self.client
    }

    async fn write_batch(&self, batch: &Batch) -> std::result::Result<u64, WriteError> {
        let mut conn = self
            .client
            .get_connection()
            .await
            .map_err(|e| WriteError::Retryable(e.to_string()))?;

        let rows = batch
            .records()
            .iter()
            .map(|r| PostgreSQLRecordRow::from_domain(r, batch.sequence()))
            .collect::<Result<Vec<_>>>()
            .map_err(|e| WriteError::Fatal(e.to_string()))?;
        let source_id = batch.source_id().to_string();
        let sequence = i64::try_from(batch.sequence())
            .map_err(|_| WriteError::Fatal("batch sequence does not fit in BIGINT".to_string()))?;

        let tx = conn.transaction().await?;
        tx.execute(DELETE_BATCH_ROWS, &[&source_id, &sequence]).await?;

        // A repeated record id keeps its first row
        let insert = tx.prepare_cached(UPSERT_RECORD).await?;
        let mut written = 0u64;
        let mut seen = HashSet::with_capacity(rows.len());
        for row in &rows {
            if !seen.insert(row.record_id.as_str()) {
                continue;
            }
            written += tx.execute(
                &insert,
                &[
                    &row.source_id,
                    &row.batch_sequence,
                    &row.record_id,
                    &row.geometry,
                    &row.geometry_wkt,
                    &row.crs_epsg,
                    &row.attributes,
                    &row.provenance_key,
                    &row.ingested_at,
                ],
            )
            .await?;
        }

        let record_count = i64::try_from(written)
            .map_err(|_| WriteError::Fatal("row count does not fit in BIGINT".to_string()))?;
        tx.execute(
            UPSERT_LEDGER,
            &[&source_id, &sequence, &record_count, &batch.checksum()],
        )
        .await?;
        tx.commit().await?;

        Ok(written)
    }
}

#[async_trait]
impl WarehouseClient for PostgreSQLAdapter {
    async fn test_connection(&self) -> Result<()> {
        self.client.test_connection().await
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.client.ensure_schema().await
    }

    async fn upsert(&self, batch: &Batch) -> CommitResult {
        tracing::debug!(
            source_id = %batch.source_id(),
            sequence = batch.sequence(),
            records = batch.len(),
            "Writing batch to PostgreSQL"
        );

        match self.write_batch(batch).await {
            Ok(rows) => CommitResult::Success { rows },
            Err(WriteError::Retryable(msg)) => CommitResult::RetryableError(msg),
            Err(WriteError::Fatal(msg)) => CommitResult::FatalError(msg),
        }
    }

    fn name(&self) -> &str {
        "postgresql"
    }
}

#[async_trait]
impl CheckpointStorage for PostgreSQLAdapter {
    async fn load_checkpoint(&self, source_id: &SourceId) -> Result<Option<Checkpoint>> {
        let rows = self
            .client
            .query(
                "SELECT * FROM checkpoints WHERE source_id = $1",
                &[&source_id.as_str()],
            )
            .await?;

        match rows.first() {
            Some(row) => Ok(Some(PostgreSQLCheckpoint::from_row(row).to_domain()?)),
            None => {
                tracing::debug!(source_id = %source_id, "No checkpoint found in PostgreSQL (first run)");
                Ok(None)
            }
        }
    }

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        let row = PostgreSQLCheckpoint::from_domain(checkpoint)?;

        let upsert_query = r#"
            INSERT INTO checkpoints (
                source_id, cursor, records_to_skip, last_committed_sequence,
                records_committed, records_failed, batches_committed, status,
                started_at, updated_at, completed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (source_id) DO UPDATE SET
                cursor = EXCLUDED.cursor,
                records_to_skip = EXCLUDED.records_to_skip,
                last_committed_sequence = EXCLUDED.last_committed_sequence,
                records_committed = EXCLUDED.records_committed,
                records_failed = EXCLUDED.records_failed,
                batches_committed = EXCLUDED.batches_committed,
                status = EXCLUDED.status,
                started_at = EXCLUDED.started_at,
                updated_at = EXCLUDED.updated_at,
                completed_at = EXCLUDED.completed_at
        "#;

        self.client
            .execute(
                upsert_query,
                &[
                    &row.source_id,
                    &row.cursor,
                    &row.records_to_skip,
                    &row.last_committed_sequence,
                    &row.records_committed,
                    &row.records_failed,
                    &row.batches_committed,
                    &row.status,
                    &row.started_at,
                    &row.updated_at,
                    &row.completed_at,
                ],
            )
            .await
            .map_err(|e| StrataError::State(format!("Failed to save checkpoint: {}", e)))?;
        Ok(())
    }

    async fn get_all_checkpoints(&self) -> Result<Vec<Checkpoint>> {
        let rows = self
            .client
            .query("SELECT * FROM checkpoints ORDER BY source_id", &[])
            .await?;
        rows.iter()
            .map(|row| PostgreSQLCheckpoint::from_row(row).to_domain())
            .collect()
    }
}

#[async_trait]
impl FailureStorage for PostgreSQLAdapter {
    async fn append_failure(&self, failure: &FailureRecord) -> Result<bool> {
        let row = PostgreSQLFailure::from_domain(failure)?;
        let inserted = self
            .client
            .execute(
                r#"
                INSERT INTO record_failures (
                    source_id, provenance_key, provenance, reason, field,
                    detail, stage, fields, recorded_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ON CONFLICT (source_id, provenance_key) DO NOTHING
                "#,
                &[
                    &row.source_id,
                    &row.provenance_key,
                    &row.provenance,
                    &row.reason,
                    &row.field,
                    &row.detail,
                    &row.stage,
                    &row.fields,
                    &row.recorded_at,
                ],
            )
            .await?;
        Ok(inserted == 1)
    }

    async fn list_failures(&self, source_id: &SourceId) -> Result<Vec<FailureRecord>> {
        let rows = self
            .client
            .query(
                "SELECT * FROM record_failures WHERE source_id = $1 ORDER BY id",
                &[&source_id.as_str()],
            )
            .await?;
        rows.iter()
            .map(|row| PostgreSQLFailure::from_row(row).to_domain())
            .collect()
    }

    async fn count_failures(&self, source_id: &SourceId) -> Result<u64> {
        let rows = self
            .client
            .query(
                "SELECT COUNT(*) FROM record_failures WHERE source_id = $1",
                &[&source_id.as_str()],
            )
            .await?;
        let count: i64 = rows.first().map(|r| r.get(0)).unwrap_or(0);
        Ok(count.max(0) as u64)
    }
}
