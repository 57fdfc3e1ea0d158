//! One source's pipeline
//!
//! A fetch task pulls chunks from the adapter, stages them when staging is
//! configured, decodes them and hands the records to the processing side
//! over a bounded channel. Every record
//! holds a semaphore permit from the moment it is fetched until its batch
//! is committed or the record is rejected, so at most
//! `max_in_flight_records` records are in flight and fetching pauses when
//! the bound is hit.
//!
//! The processing side normalizes, reprojects and batches records, commits
//! each sealed batch and checkpoints after every commit. The checkpoint
//! never moves past a record that is not durably committed.

use super::status::{SourceState, StatusRegistry};
use super::summary::{SourceOutcome, SourceSummary};
use crate::adapters::sources::SourceAdapter;
use crate::core::batch::{Batch, BatchAssembler, BatchLimits};
use crate::core::failures::FailureSink;
use crate::core::geometry::{Crs, Reprojector};
use crate::core::normalize::SchemaNormalizer;
use crate::core::sink::SinkWriter;
use crate::core::staging::ChunkStager;
use crate::core::state::{Checkpoint, CheckpointManager, ResumePosition};
use crate::domain::{
    FailureStage, FieldMap, Provenance, ProvisionalRecord, RecordRejection, SourceError, SourceId,
};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

/// A fetched record and its in-flight permit
struct InFlight {
    record: ProvisionalRecord,
    permit: OwnedSemaphorePermit,
}

enum FetchMessage {
    Records(Vec<InFlight>),
    End,
    Failed(SourceError),
}

enum Exit {
    Drained,
    Stopped,
    /// Channel closed without an end marker
    Closed,
    Failed(String),
}

/// Resolves once the stop flag is set. Never resolves if the sender is gone.
async fn wait_for_stop(stop: &mut watch::Receiver<bool>) {
    loop {
        if *stop.borrow_and_update() {
            return;
        }
        if stop.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Everything one source needs to run
pub(crate) struct SourcePipeline {
    pub source_id: SourceId,
    pub adapter: Box<dyn SourceAdapter>,
    pub staging: Option<ChunkStager>,
    pub normalizer: SchemaNormalizer,
    pub source_crs: Crs,
    pub reprojector: Reprojector,
    pub limits: BatchLimits,
    pub max_in_flight: usize,
    pub queue_capacity: usize,
    pub sink: Arc<SinkWriter>,
    pub failures: Arc<FailureSink>,
    pub checkpoints: Arc<CheckpointManager>,
    pub status: StatusRegistry,
}

impl SourcePipeline {
    pub(crate) async fn run(self, mut stop: watch::Receiver<bool>) -> SourceSummary {
        let started = Instant::now();
        let SourcePipeline {
            source_id,
            mut adapter,
            staging,
            normalizer,
            source_crs,
            reprojector,
            limits,
            max_in_flight,
            queue_capacity,
            sink,
            failures,
            checkpoints,
            status,
        } = self;

        tracing::info!(source_id = %source_id, kind = adapter.kind(), "Source started");
        let mut summary = SourceSummary::new(source_id.clone());

        let mut checkpoint = match checkpoints.load_or_new(&source_id).await {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                return fail_early(&status, summary, started, format!("cannot load checkpoint: {e}"));
            }
        };
        checkpoint.mark_started();
        if let Err(e) = checkpoints.save(&checkpoint).await {
            return fail_early(&status, summary, started, format!("cannot save checkpoint: {e}"));
        }

        let resume = checkpoint.resume_position();
        if !resume.cursor.is_start() {
            if let Err(e) = adapter.resume(resume.cursor.clone()) {
                return fail_early(&status, summary, started, e.to_string());
            }
        }
        status.update(&source_id, |s| s.cursor = resume.cursor.clone());

        let semaphore = Arc::new(Semaphore::new(max_in_flight.max(1)));
        let (tx, mut rx) = mpsc::channel(queue_capacity.max(1));
        let fetch: JoinHandle<()> = tokio::spawn(fetch_task(
            adapter,
            staging,
            resume.records_to_skip,
            semaphore,
            tx,
            stop.clone(),
        ));

        let mut processor = Processor {
            source_id: source_id.clone(),
            assembler: BatchAssembler::new(
                source_id.clone(),
                limits,
                checkpoint.last_committed_sequence,
            ),
            normalizer,
            source_crs,
            reprojector,
            sink,
            failures,
            checkpoints,
            status: status.clone(),
            checkpoint,
            permits: VecDeque::new(),
            unsaved_failures: 0,
            summary: &mut summary,
        };

        let exit = loop {
            processor.transition(SourceState::Fetching);
            let deadline = processor.assembler.deadline();
            tokio::select! {
                _ = wait_for_stop(&mut stop) => break Exit::Stopped,
                message = rx.recv() => match message {
                    Some(FetchMessage::Records(items)) => {
                        if let Err(e) = processor.process(items).await {
                            break Exit::Failed(e);
                        }
                    }
                    Some(FetchMessage::Failed(e)) => break Exit::Failed(e.to_string()),
                    Some(FetchMessage::End) => {
                        processor.transition(SourceState::Draining);
                        match processor.flush().await {
                            Ok(()) => break Exit::Drained,
                            Err(e) => break Exit::Failed(e),
                        }
                    }
                    None => break Exit::Closed,
                },
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(tokio::time::Instant::now)), if deadline.is_some() => {
                    tracing::debug!(source_id = %source_id, "Batch age limit reached");
                    if let Err(e) = processor.flush().await {
                        break Exit::Failed(e);
                    }
                }
            }
        };

        let exit = match exit {
            Exit::Closed if *stop.borrow() => Exit::Stopped,
            Exit::Closed => Exit::Failed("fetch task ended unexpectedly".to_string()),
            other => other,
        };

        drop(rx);
        if matches!(exit, Exit::Failed(_)) {
            fetch.abort();
        }
        let _ = fetch.await;

        processor.finish(exit).await;
        summary.duration = started.elapsed();
        tracing::info!(
            source_id = %source_id,
            outcome = ?summary.outcome,
            records_committed = summary.records_committed,
            records_failed = summary.records_failed,
            batches = summary.batches_committed,
            duration_ms = summary.duration.as_millis() as u64,
            "Source finished"
        );
        summary
    }
}

fn fail_early(
    status: &StatusRegistry,
    mut summary: SourceSummary,
    started: Instant,
    error: String,
) -> SourceSummary {
    crate::log_source_failed!(summary.source_id, SourceState::Idle, error);
    status.update(&summary.source_id, |s| s.last_error = Some(error.clone()));
    status.transition(&summary.source_id, SourceState::Failed);
    summary.outcome = SourceOutcome::Failed;
    summary.error = Some(error);
    summary.duration = started.elapsed();
    summary
}

async fn fetch_task(
    mut adapter: Box<dyn SourceAdapter>,
    mut staging: Option<ChunkStager>,
    records_to_skip: u64,
    semaphore: Arc<Semaphore>,
    tx: mpsc::Sender<FetchMessage>,
    mut stop: watch::Receiver<bool>,
) {
    let result = fetch_chunks(
        adapter.as_mut(),
        staging.as_mut(),
        records_to_skip,
        &semaphore,
        &tx,
        &mut stop,
    )
    .await;
    adapter.close().await;
    match result {
        Ok(true) => {
            let _ = tx.send(FetchMessage::End).await;
        }
        Ok(false) => {}
        Err(e) => {
            let _ = tx.send(FetchMessage::Failed(e)).await;
        }
    }
}

/// Returns true at end of stream, false when stopped or the receiver is gone
async fn fetch_chunks(
    adapter: &mut dyn SourceAdapter,
    mut staging: Option<&mut ChunkStager>,
    mut records_to_skip: u64,
    semaphore: &Arc<Semaphore>,
    tx: &mpsc::Sender<FetchMessage>,
    stop: &mut watch::Receiver<bool>,
) -> Result<bool, SourceError> {
    tokio::select! {
        opened = adapter.open() => opened?,
        _ = wait_for_stop(stop) => return Ok(false),
    }

    loop {
        let chunk = tokio::select! {
            chunk = adapter.next() => chunk?,
            _ = wait_for_stop(stop) => return Ok(false),
        };
        let Some(chunk) = chunk else {
            if let Some(stager) = &staging {
                tracing::info!(source_id = %adapter.source_id(), chunks = stager.staged(), "Raw chunks staged");
            }
            return Ok(true);
        };
        if let Some(stager) = staging.as_deref_mut() {
            stager.stage(&chunk).await?;
        }

        let mut records = adapter.decode(&chunk);
        if records_to_skip > 0 {
            let skip = (records_to_skip as usize).min(records.len());
            if (skip as u64) < records_to_skip {
                tracing::warn!(
                    source_id = %chunk.source_id,
                    expected = records_to_skip,
                    found = records.len(),
                    "Resumed chunk is shorter than the committed part"
                );
            }
            records.drain(..skip);
            records_to_skip = 0;
        }

        let mut slice = Vec::new();
        for record in records {
            let permit = match Arc::clone(semaphore).try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    // in-flight limit reached: hand over what we have, then wait
                    if !slice.is_empty()
                        && tx.send(FetchMessage::Records(std::mem::take(&mut slice))).await.is_err()
                    {
                        return Ok(false);
                    }
                    tokio::select! {
                        permit = Arc::clone(semaphore).acquire_owned() => permit
                            .map_err(|_| SourceError::fatal("in-flight limiter closed"))?,
                        _ = wait_for_stop(stop) => return Ok(false),
                    }
                }
            };
            slice.push(InFlight { record, permit });
        }
        if !slice.is_empty() && tx.send(FetchMessage::Records(slice)).await.is_err() {
            return Ok(false);
        }
    }
}

/// Processing side of a source pipeline
struct Processor<'a> {
    source_id: SourceId,
    normalizer: SchemaNormalizer,
    source_crs: Crs,
    reprojector: Reprojector,
    assembler: BatchAssembler,
    sink: Arc<SinkWriter>,
    failures: Arc<FailureSink>,
    checkpoints: Arc<CheckpointManager>,
    status: StatusRegistry,
    checkpoint: Checkpoint,
    /// Permits of the records in the open batch, oldest first
    permits: VecDeque<OwnedSemaphorePermit>,
    /// New failures not yet counted in a saved checkpoint
    unsaved_failures: u64,
    summary: &'a mut SourceSummary,
}

impl Processor<'_> {
    fn transition(&self, state: SourceState) {
        self.status.transition(&self.source_id, state);
    }

    fn current_state(&self) -> SourceState {
        self.status
            .get(&self.source_id)
            .map_or(SourceState::Idle, |s| s.state)
    }

    async fn process(&mut self, items: Vec<InFlight>) -> Result<(), String> {
        let fetched = items.len() as u64;
        self.summary.records_fetched += fetched;
        self.status
            .update(&self.source_id, |s| s.records_fetched += fetched);

        self.transition(SourceState::Normalizing);
        let mut normalized = Vec::with_capacity(items.len());
        for InFlight { record, permit } in items {
            match self.normalizer.normalize(&record) {
                Ok(n) => normalized.push((n, record.fields, permit)),
                Err(rejection) => {
                    let stage = if record.decode_error.is_some() {
                        FailureStage::Decode
                    } else {
                        FailureStage::Normalize
                    };
                    self.reject(rejection, stage, record.provenance, record.fields)
                        .await?;
                }
            }
        }

        self.transition(SourceState::Reprojecting);
        let mut canonical = Vec::with_capacity(normalized.len());
        for (record, fields, permit) in normalized {
            let provenance = record.provenance.clone();
            match self.reprojector.canonicalize(record, &self.source_crs) {
                Ok(c) => canonical.push((c, fields, permit)),
                Err(rejection) => {
                    self.reject(rejection, FailureStage::Reproject, provenance, fields)
                        .await?
                }
            }
        }

        self.transition(SourceState::Batching);
        for (record, fields, permit) in canonical {
            let provenance = record.provenance().clone();
            match self.assembler.push(record) {
                Ok(sealed) => {
                    self.permits.push_back(permit);
                    if let Some(batch) = sealed {
                        self.commit(batch).await?;
                        self.transition(SourceState::Batching);
                    }
                }
                Err(rejection) => {
                    self.reject(rejection, FailureStage::Batch, provenance, fields)
                        .await?
                }
            }
        }
        Ok(())
    }

    async fn reject(
        &mut self,
        rejection: RecordRejection,
        stage: FailureStage,
        provenance: Provenance,
        fields: FieldMap,
    ) -> Result<(), String> {
        let stored = self
            .failures
            .reject(rejection, stage, provenance, fields)
            .await
            .map_err(|e| format!("cannot store failure record: {e}"))?;
        if stored {
            self.unsaved_failures += 1;
            self.summary.records_failed += 1;
            self.status.update(&self.source_id, |s| s.records_failed += 1);
        }
        Ok(())
    }

    /// Seals and commits the open batch, if any
    async fn flush(&mut self) -> Result<(), String> {
        match self.assembler.flush() {
            Some(batch) => self.commit(batch).await,
            None => Ok(()),
        }
    }

    async fn commit(&mut self, batch: Batch) -> Result<(), String> {
        self.transition(SourceState::Committing);
        let receipt = self.sink.commit(&batch).await.map_err(|e| e.to_string())?;

        self.transition(SourceState::Checkpointing);
        if let Some(last) = batch.last_provenance() {
            self.checkpoint
                .record_commit(batch.sequence(), receipt.rows, ResumePosition::after(last));
        }
        self.checkpoint.record_failures(std::mem::take(&mut self.unsaved_failures));
        self.checkpoints
            .checkpoint_batch(&self.checkpoint)
            .await
            .map_err(|e| format!("batch {} committed but checkpoint failed: {e}", batch.sequence()))?;

        for _ in 0..batch.len() {
            self.permits.pop_front();
        }

        self.summary.records_committed += receipt.rows;
        self.summary.batches_committed += 1;
        self.summary.last_committed_sequence = Some(batch.sequence());
        let cursor = self.checkpoint.cursor.clone();
        self.status.update(&self.source_id, |s| {
            s.records_committed += receipt.rows;
            s.batches_committed += 1;
            s.last_committed_sequence = Some(batch.sequence());
            s.cursor = cursor;
        });
        Ok(())
    }

    async fn finish(mut self, exit: Exit) {
        let failed_in = self.current_state();
        self.checkpoint
            .record_failures(std::mem::take(&mut self.unsaved_failures));

        let mut error = match exit {
            Exit::Drained => {
                self.checkpoint.mark_completed();
                self.summary.outcome = SourceOutcome::Completed;
                None
            }
            Exit::Stopped | Exit::Closed => {
                let dropped = self.assembler.discard();
                self.permits.clear();
                tracing::info!(
                    source_id = %self.source_id,
                    discarded = dropped,
                    "Source stopped, open batch discarded"
                );
                self.checkpoint.mark_interrupted();
                self.summary.outcome = SourceOutcome::Interrupted;
                None
            }
            Exit::Failed(e) => {
                self.assembler.discard();
                self.permits.clear();
                self.checkpoint.mark_failed();
                self.summary.outcome = SourceOutcome::Failed;
                Some(e)
            }
        };

        if let Err(e) = self.checkpoints.save(&self.checkpoint).await {
            tracing::error!(source_id = %self.source_id, error = %e, "Failed to save final checkpoint");
            if error.is_none() {
                self.summary.outcome = SourceOutcome::Failed;
                error = Some(format!("cannot save checkpoint: {e}"));
            }
        }

        match error {
            Some(e) => {
                crate::log_source_failed!(self.source_id, failed_in, e);
                self.status
                    .update(&self.source_id, |s| s.last_error = Some(e.clone()));
                self.transition(SourceState::Failed);
                self.summary.error = Some(e);
            }
            None => self.transition(SourceState::Terminated),
        }
    }
}
