//! End-to-end pipeline scenarios
//!
//! Sources are scripted in-process adapters (or the SOAP adapter over a
//! scripted transport); warehouse, checkpoints and failures are the
//! in-memory backends so every write can be inspected.

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{json, Value};
use std::collections::{HashSet, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use strata::adapters::database::memory::{
    InMemoryCheckpointStorage, InMemoryFailureStorage, InMemoryWarehouse,
};
use strata::adapters::database::{Backends, CheckpointStorage};
use strata::adapters::sources::soap::{SoapResponse, SoapSource, SoapTransport};
use strata::adapters::sources::SourceAdapter;
use strata::config::{PipelineConfig, SourceConfig};
use strata::core::pipeline::{Coordinator, RunHandle, RunStatus, SourceOutcome, SourceState};
use strata::core::state::{CheckpointBuilder, CheckpointStatus};
use strata::domain::{
    FailureStage, FieldMap, Provenance, ProvisionalRecord, RawChunk, RejectionReason, SourceCursor, SourceError,
    SourceId,
};
use tempfile::TempDir;

/// Pages through `total` generated parcels, `chunk` per call
struct ScriptedSource {
    id: SourceId,
    total: u64,
    chunk: u64,
    offset: u64,
    /// Fatal error once this offset is reached
    fail_at: Option<u64>,
    /// Records generated without their required `name`
    nameless: HashSet<u64>,
    /// Ids wrap around after this many records
    id_cycle: Option<u64>,
}

impl ScriptedSource {
    fn new(id: &str, total: u64, chunk: u64) -> Self {
        Self {
            id: SourceId::new(id).unwrap(),
            total,
            chunk,
            offset: 0,
            fail_at: None,
            nameless: HashSet::new(),
            id_cycle: None,
        }
    }

    fn failing_at(mut self, offset: u64) -> Self {
        self.fail_at = Some(offset);
        self
    }

    fn without_name(mut self, index: u64) -> Self {
        self.nameless.insert(index);
        self
    }

    fn repeating_ids(mut self, cycle: u64) -> Self {
        self.id_cycle = Some(cycle);
        self
    }

    fn record(&self, i: u64) -> Value {
        let mut record = json!({
            "id": self.id_cycle.map_or(i, |cycle| i % cycle),
            "lon": 10.0 + (i as f64) * 0.0001,
            "lat": 56.0,
        });
        if !self.nameless.contains(&i) {
            record["name"] = json!(format!("parcel {i}"));
        }
        record
    }
}

#[async_trait]
impl SourceAdapter for ScriptedSource {
    fn source_id(&self) -> &SourceId {
        &self.id
    }

    fn kind(&self) -> &'static str {
        "scripted"
    }

    async fn open(&mut self) -> Result<(), SourceError> {
        Ok(())
    }

    async fn next(&mut self) -> Result<Option<RawChunk>, SourceError> {
        if self.fail_at.is_some_and(|at| self.offset >= at) {
            return Err(SourceError::fatal("upstream removed the dataset"));
        }
        if self.offset >= self.total {
            return Ok(None);
        }
        let end = (self.offset + self.chunk).min(self.total);
        let records: Vec<Value> = (self.offset..end).map(|i| self.record(i)).collect();
        let chunk = RawChunk::new(
            self.id.clone(),
            SourceCursor::Page { offset: self.offset },
            SourceCursor::Page { offset: end },
            Bytes::from(serde_json::to_vec(&records).unwrap()),
        );
        self.offset = end;
        Ok(Some(chunk))
    }

    fn checkpoint(&self) -> SourceCursor {
        SourceCursor::Page { offset: self.offset }
    }

    fn resume(&mut self, cursor: SourceCursor) -> Result<(), SourceError> {
        match cursor {
            SourceCursor::Start => self.offset = 0,
            SourceCursor::Page { offset } => self.offset = offset,
            other => return Err(SourceError::fatal(format!("unexpected cursor {other}"))),
        }
        Ok(())
    }

    fn decode(&self, chunk: &RawChunk) -> Vec<ProvisionalRecord> {
        let items: Vec<FieldMap> = serde_json::from_slice(&chunk.bytes).unwrap();
        let chunk_records = items.len() as u64;
        items
            .into_iter()
            .enumerate()
            .map(|(index, fields)| ProvisionalRecord {
                fields,
                provenance: Provenance {
                    source_id: chunk.source_id.clone(),
                    chunk_start: chunk.start.clone(),
                    chunk_end: chunk.end.clone(),
                    index: index as u64,
                    chunk_records,
                },
                decode_error: None,
            })
            .collect()
    }
}

struct Stores {
    warehouse: Arc<InMemoryWarehouse>,
    checkpoints: Arc<InMemoryCheckpointStorage>,
    failures: Arc<InMemoryFailureStorage>,
}

impl Stores {
    fn new() -> Self {
        Self {
            warehouse: Arc::new(InMemoryWarehouse::new()),
            checkpoints: Arc::new(InMemoryCheckpointStorage::new()),
            failures: Arc::new(InMemoryFailureStorage::new()),
        }
    }

    fn backends(&self) -> Backends {
        Backends {
            warehouse: self.warehouse.clone(),
            checkpoints: self.checkpoints.clone(),
            failures: self.failures.clone(),
        }
    }

    fn coordinator(&self, max_records: usize) -> Coordinator {
        Coordinator::new(pipeline(max_records), self.backends())
    }
}

fn pipeline(max_records: usize) -> PipelineConfig {
    toml::from_str(&format!(
        r#"
max_in_flight_records = 1000

[batch]
max_records = {max_records}
max_age_ms = 60000

[sink_retry]
max_attempts = 3
initial_delay_ms = 1
max_delay_ms = 5
"#
    ))
    .unwrap()
}

fn parcels_source(id: &str) -> SourceConfig {
    toml::from_str(&format!(
        r#"
id = "{id}"
type = "json_stream"

[json_stream]
url = "http://127.0.0.1:9/unused"

[schema]
id_field = "id"
geometry = {{ format = "xy", x_field = "lon", y_field = "lat" }}

[[schema.fields]]
source = "name"
target = "name"
type = "string"
required = true

[retry]
max_attempts = 3
initial_delay_ms = 1
max_delay_ms = 5
"#
    ))
    .unwrap()
}

async fn run(coordinator: &Coordinator, config: SourceConfig, adapter: ScriptedSource) -> RunHandle {
    coordinator
        .start_with_adapters(vec![(config, Box::new(adapter) as Box<dyn SourceAdapter>)])
        .unwrap()
}

/// Polls the run status until `done` holds or five seconds pass
async fn wait_for(handle: &RunHandle, done: impl Fn(&RunStatus) -> bool) -> RunStatus {
    for _ in 0..500 {
        let status = handle.status();
        if done(&status) {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("run did not reach the expected state: {:?}", handle.status());
}

#[tokio::test]
async fn test_250_records_make_three_batches() {
    let stores = Stores::new();
    let coordinator = stores.coordinator(100);

    let handle = run(&coordinator, parcels_source("parcels"), ScriptedSource::new("parcels", 250, 40)).await;
    let summary = handle.wait().await;

    assert!(summary.is_successful());
    assert_eq!(summary.sources[0].outcome, SourceOutcome::Completed);
    assert_eq!(summary.total_committed(), 250);
    assert_eq!(
        stores.warehouse.committed_batches("parcels"),
        vec![(0, 100), (1, 100), (2, 50)]
    );

    let checkpoint = stores
        .checkpoints
        .load_checkpoint(&SourceId::new("parcels").unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(checkpoint.status, CheckpointStatus::Completed);
    assert_eq!(checkpoint.last_committed_sequence, Some(2));
    assert_eq!(checkpoint.cursor, SourceCursor::Page { offset: 250 });
    assert_eq!(checkpoint.records_to_skip, 0);
}

/// NDJSON export files in a local directory, read through the same
/// line-file adapter SFTP sources use
fn write_exports(dir: &Path, files: &[(&str, std::ops::Range<u64>)]) {
    let exports = dir.join("exports");
    std::fs::create_dir_all(&exports).unwrap();
    for (name, ids) in files {
        let lines: String = ids
            .clone()
            .map(|i| {
                format!(
                    "{}\n",
                    json!({"id": i, "lon": 10.0 + (i as f64) * 0.0001, "lat": 56.0, "name": format!("parcel {i}")})
                )
            })
            .collect();
        std::fs::write(exports.join(name), lines).unwrap();
    }
}

fn line_files_source(id: &str, root: &Path) -> SourceConfig {
    toml::from_str(&format!(
        r#"
id = "{id}"
type = "object_storage"

[object_storage]
format = "ndjson"
chunk_bytes = 2048

[object_storage.store]
backend = "local"
root = "{}"
prefix = "exports/"
suffix = ".ndjson"

[schema]
id_field = "id"
geometry = {{ format = "xy", x_field = "lon", y_field = "lat" }}
"#,
        root.display().to_string().replace('\\', "/")
    ))
    .unwrap()
}

#[tokio::test]
async fn test_250_line_file_records_make_three_batches() {
    let dir = TempDir::new().unwrap();
    write_exports(
        dir.path(),
        &[("a.ndjson", 0..120), ("b.ndjson", 120..200), ("c.ndjson", 200..250)],
    );
    std::fs::write(dir.path().join("exports/readme.txt"), "not an export\n").unwrap();

    let stores = Stores::new();
    let coordinator = stores.coordinator(100);
    let summary = coordinator
        .start_run(vec![line_files_source("exports", dir.path())])
        .unwrap()
        .wait()
        .await;

    assert!(summary.is_successful(), "{:?}", summary.sources[0].error);
    assert_eq!(summary.total_committed(), 250);
    assert_eq!(
        stores.warehouse.committed_batches("exports"),
        vec![(0, 100), (1, 100), (2, 50)]
    );
    let ids: HashSet<String> = stores
        .warehouse
        .rows_for("exports")
        .into_iter()
        .map(|((_, _, id), _)| id)
        .collect();
    assert_eq!(ids.len(), 250);
    assert!(stores.failures.all().is_empty());

    let checkpoint = stores
        .checkpoints
        .load_checkpoint(&SourceId::new("exports").unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(checkpoint.status, CheckpointStatus::Completed);
    assert_eq!(checkpoint.last_committed_sequence, Some(2));
}

#[tokio::test]
async fn test_empty_source_commits_nothing() {
    let stores = Stores::new();
    let coordinator = stores.coordinator(100);

    let summary = run(&coordinator, parcels_source("empty"), ScriptedSource::new("empty", 0, 10))
        .await
        .wait()
        .await;

    assert_eq!(summary.sources[0].outcome, SourceOutcome::Completed);
    assert_eq!(stores.warehouse.upsert_calls(), 0);
    assert!(stores.warehouse.committed_batches("empty").is_empty());
}

#[tokio::test]
async fn test_missing_required_field_yields_one_failure() {
    let stores = Stores::new();
    let coordinator = stores.coordinator(100);

    let adapter = ScriptedSource::new("parcels", 1, 10).without_name(0);
    let summary = run(&coordinator, parcels_source("parcels"), adapter).await.wait().await;

    assert!(summary.is_successful());
    assert_eq!(stores.warehouse.row_count(), 0);

    let failures = stores.failures.all();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].reason, RejectionReason::MissingField);
    assert_eq!(failures[0].field.as_deref(), Some("name"));
    assert_eq!(summary.sources[0].records_failed, 1);
}

#[tokio::test]
async fn test_repeated_ids_in_one_batch_go_to_failures() {
    let stores = Stores::new();
    let coordinator = stores.coordinator(100);

    let adapter = ScriptedSource::new("parcels", 10, 10).repeating_ids(5);
    let summary = run(&coordinator, parcels_source("parcels"), adapter).await.wait().await;

    assert!(summary.is_successful());
    let source = &summary.sources[0];
    assert_eq!(source.records_committed, 5);
    assert_eq!(source.records_failed, 5);
    assert_eq!(stores.warehouse.row_count(), 5);
    assert_eq!(stores.warehouse.committed_batches("parcels"), vec![(0, 5)]);

    let failures = stores.failures.all();
    assert_eq!(failures.len(), 5);
    assert!(failures
        .iter()
        .all(|f| f.reason == RejectionReason::ConstraintViolation && f.stage == FailureStage::Batch));
    assert_eq!(stores.warehouse.row_count() + failures.len(), 10);
}

#[tokio::test]
async fn test_resume_after_failure_has_no_duplicates() {
    let stores = Stores::new();
    let coordinator = stores.coordinator(100);

    // 150 records arrive, then the source fails: batch 0 is committed and
    // the 50 open records are discarded
    let first = run(
        &coordinator,
        parcels_source("parcels"),
        ScriptedSource::new("parcels", 250, 30).failing_at(150),
    )
    .await
    .wait()
    .await;
    assert_eq!(first.sources[0].outcome, SourceOutcome::Failed);
    assert!(first.sources[0]
        .error
        .as_deref()
        .unwrap()
        .contains("upstream removed the dataset"));
    assert_eq!(stores.warehouse.committed_batches("parcels"), vec![(0, 100)]);

    let id = SourceId::new("parcels").unwrap();
    let checkpoint = stores.checkpoints.load_checkpoint(&id).await.unwrap().unwrap();
    assert_eq!(checkpoint.status, CheckpointStatus::Failed);
    // record 99 is the 10th record of the chunk starting at 90
    assert_eq!(checkpoint.cursor, SourceCursor::Page { offset: 90 });
    assert_eq!(checkpoint.records_to_skip, 10);

    let second = run(&coordinator, parcels_source("parcels"), ScriptedSource::new("parcels", 250, 30))
        .await
        .wait()
        .await;
    assert_eq!(second.sources[0].outcome, SourceOutcome::Completed);
    assert_eq!(second.total_committed(), 150);

    let rows = stores.warehouse.rows_for("parcels");
    let ids: HashSet<&str> = rows.iter().map(|((_, _, id), _)| id.as_str()).collect();
    assert_eq!(rows.len(), 250);
    assert_eq!(ids.len(), 250);
    assert_eq!(
        stores.warehouse.committed_batches("parcels"),
        vec![(0, 100), (1, 100), (2, 50)]
    );
}

#[tokio::test]
async fn test_recommitted_batch_leaves_one_row_set() {
    let stores = Stores::new();
    let coordinator = stores.coordinator(100);
    let id = SourceId::new("x").unwrap();

    run(&coordinator, parcels_source("x"), ScriptedSource::new("x", 500, 50))
        .await
        .wait()
        .await;
    assert_eq!(stores.warehouse.committed_batches("x").len(), 5);

    // A crash between the warehouse commit of batch 4 and its checkpoint
    // leaves the checkpoint at batch 3
    stores
        .checkpoints
        .save_checkpoint(
            &CheckpointBuilder::new(id.clone())
                .cursor(SourceCursor::Page { offset: 400 })
                .last_committed_sequence(3)
                .records_committed(400)
                .batches_committed(4)
                .status(CheckpointStatus::Interrupted)
                .build(),
        )
        .await
        .unwrap();

    let summary = run(&coordinator, parcels_source("x"), ScriptedSource::new("x", 500, 50))
        .await
        .wait()
        .await;

    assert_eq!(summary.sources[0].last_committed_sequence, Some(4));
    assert_eq!(stores.warehouse.row_count(), 500);
    assert_eq!(
        stores.warehouse.committed_batches("x"),
        vec![(0, 100), (1, 100), (2, 100), (3, 100), (4, 100)]
    );
    assert_eq!(stores.warehouse.upsert_calls(), 6);
}

#[tokio::test]
async fn test_sink_retries_transient_errors() {
    let stores = Stores::new();
    stores.warehouse.script_results([
        strata::adapters::database::CommitResult::RetryableError("deadlock detected".to_string()),
        strata::adapters::database::CommitResult::RetryableError("deadlock detected".to_string()),
    ]);
    let coordinator = stores.coordinator(100);

    let summary = run(&coordinator, parcels_source("parcels"), ScriptedSource::new("parcels", 80, 40))
        .await
        .wait()
        .await;

    assert!(summary.is_successful());
    assert_eq!(stores.warehouse.upsert_calls(), 3);
    assert_eq!(stores.warehouse.committed_batches("parcels"), vec![(0, 80)]);
}

#[tokio::test]
async fn test_sink_fatal_error_fails_source_without_checkpoint_advance() {
    let stores = Stores::new();
    stores
        .warehouse
        .script_results([strata::adapters::database::CommitResult::FatalError(
            "value too long for column".to_string(),
        )]);
    let coordinator = stores.coordinator(100);

    let summary = run(&coordinator, parcels_source("parcels"), ScriptedSource::new("parcels", 100, 50))
        .await
        .wait()
        .await;

    assert_eq!(summary.sources[0].outcome, SourceOutcome::Failed);
    let checkpoint = stores
        .checkpoints
        .load_checkpoint(&SourceId::new("parcels").unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(checkpoint.last_committed_sequence, None);
    assert_eq!(checkpoint.cursor, SourceCursor::Start);
    assert_eq!(checkpoint.status, CheckpointStatus::Failed);
}

#[tokio::test]
async fn test_one_failing_source_does_not_abort_the_run() {
    let stores = Stores::new();
    let coordinator = stores.coordinator(100);

    let handle = coordinator
        .start_with_adapters(vec![
            (
                parcels_source("good"),
                Box::new(ScriptedSource::new("good", 120, 40)) as Box<dyn SourceAdapter>,
            ),
            (
                parcels_source("bad"),
                Box::new(ScriptedSource::new("bad", 120, 40).failing_at(0)) as Box<dyn SourceAdapter>,
            ),
        ])
        .unwrap();
    let summary = handle.wait().await;

    assert!(!summary.is_successful());
    assert_eq!(summary.failed_sources().count(), 1);
    assert_eq!(stores.warehouse.rows_for("good").len(), 120);
    assert!(stores.warehouse.rows_for("bad").is_empty());
}

#[tokio::test]
async fn test_dry_run_writes_nothing() {
    let stores = Stores::new();
    let coordinator = stores.coordinator(100).with_dry_run(true);

    let adapter = ScriptedSource::new("parcels", 150, 50).without_name(3);
    let summary = run(&coordinator, parcels_source("parcels"), adapter).await.wait().await;

    assert_eq!(summary.sources[0].outcome, SourceOutcome::Completed);
    assert_eq!(stores.warehouse.upsert_calls(), 0);
    assert!(stores.failures.all().is_empty());
    assert!(stores.checkpoints.get_all_checkpoints().await.unwrap().is_empty());
}

fn staging_pipeline(max_records: usize, root: &Path) -> PipelineConfig {
    let mut config = pipeline(max_records);
    config.staging = Some(
        toml::from_str(&format!(
            "backend = \"local\"\nroot = \"{}\"\nprefix = \"landing/\"",
            root.display().to_string().replace('\\', "/")
        ))
        .unwrap(),
    );
    config
}

/// Staged chunk files of one run, sorted by name
fn staged_chunks(root: &Path, source: &str, run_id: uuid::Uuid) -> Vec<Vec<u8>> {
    let dir = root.join("landing/raw").join(source).join(run_id.to_string());
    let Ok(entries) = std::fs::read_dir(&dir) else {
        return Vec::new();
    };
    let mut paths: Vec<_> = entries.map(|e| e.unwrap().path()).collect();
    paths.sort();
    paths.into_iter().map(|p| std::fs::read(p).unwrap()).collect()
}

#[tokio::test]
async fn test_fetched_chunks_are_staged_before_loading() {
    let dir = TempDir::new().unwrap();
    let stores = Stores::new();
    let coordinator = Coordinator::new(staging_pipeline(100, dir.path()), stores.backends());

    let handle = run(&coordinator, parcels_source("parcels"), ScriptedSource::new("parcels", 250, 100)).await;
    let run_id = handle.run_id();
    let summary = handle.wait().await;

    assert!(summary.is_successful(), "{:?}", summary.sources[0].error);
    assert_eq!(summary.total_committed(), 250);
    let chunks = staged_chunks(dir.path(), "parcels", run_id);
    assert_eq!(chunks.len(), 3);
    let first: Vec<Value> = serde_json::from_slice(&chunks[0]).unwrap();
    let last: Vec<Value> = serde_json::from_slice(&chunks[2]).unwrap();
    assert_eq!(first.len(), 100);
    assert_eq!(first[0]["id"], json!(0));
    assert_eq!(last.len(), 50);
}

#[tokio::test]
async fn test_dry_run_stages_nothing() {
    let dir = TempDir::new().unwrap();
    let stores = Stores::new();
    let coordinator =
        Coordinator::new(staging_pipeline(100, dir.path()), stores.backends()).with_dry_run(true);

    let handle = run(&coordinator, parcels_source("parcels"), ScriptedSource::new("parcels", 50, 25)).await;
    let summary = handle.wait().await;

    assert_eq!(summary.sources[0].outcome, SourceOutcome::Completed);
    assert!(!dir.path().join("landing").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_discards_open_batch_and_checkpoints() {
    let stores = Stores::new();
    let coordinator = stores.coordinator(100);

    let handle = run(
        &coordinator,
        parcels_source("endless"),
        ScriptedSource::new("endless", u64::MAX / 2, 10),
    )
    .await;
    wait_for(&handle, |status| {
        status
            .source("endless")
            .is_some_and(|s| s.batches_committed >= 2)
    })
    .await;
    handle.stop();
    let summary = handle.wait().await;

    assert_eq!(summary.sources[0].outcome, SourceOutcome::Interrupted);
    assert!(summary.was_interrupted());

    let committed = stores.warehouse.rows_for("endless").len();
    assert!(committed >= 200);
    assert_eq!(committed % 100, 0);

    let checkpoint = stores
        .checkpoints
        .load_checkpoint(&SourceId::new("endless").unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(checkpoint.status, CheckpointStatus::Interrupted);
    assert_eq!(checkpoint.records_committed, committed as u64);
}

/// Scripted SOAP responses, consumed in order
struct ScriptedTransport {
    responses: Mutex<VecDeque<Result<SoapResponse, SourceError>>>,
}

#[async_trait]
impl SoapTransport for ScriptedTransport {
    async fn call(&self, _action: &str, _envelope: String) -> Result<SoapResponse, SourceError> {
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(SourceError::fatal("no more responses")))
    }
}

fn herd_page(first: u64, count: u64) -> Result<SoapResponse, SourceError> {
    let herds: String = (first..first + count)
        .map(|i| {
            format!(
                "<chr:Herd><chr:HerdNumber>{i}</chr:HerdNumber>\
                 <chr:X>{}</chr:X><chr:Y>6200000</chr:Y></chr:Herd>",
                500000 + i
            )
        })
        .collect();
    Ok(SoapResponse {
        status: 200,
        body: format!(
            "<soap:Envelope xmlns:soap=\"http://schemas.xmlsoap.org/soap/envelope/\"><soap:Body>\
             <chr:ListHerdsResponse xmlns:chr=\"urn:chr\">{herds}</chr:ListHerdsResponse>\
             </soap:Body></soap:Envelope>"
        ),
    })
}

#[tokio::test]
async fn test_soap_transient_failures_within_budget() {
    let stores = Stores::new();
    let coordinator = stores.coordinator(100);

    let config: SourceConfig = toml::from_str(
        r#"
id = "chr_herds"
type = "soap"
crs = "EPSG:25832"

[soap]
endpoint = "http://127.0.0.1:9/chr"
soap_action = "ListHerds"
body_template = "<ListHerds><Offset>{offset}</Offset><Limit>{limit}</Limit></ListHerds>"
record_element = "Herd"
page_size = 100

[schema]
id_field = "HerdNumber"
geometry = { format = "xy", x_field = "X", y_field = "Y" }

[retry]
max_attempts = 3
initial_delay_ms = 1
max_delay_ms = 5
"#,
    )
    .unwrap();

    let transport = Arc::new(ScriptedTransport {
        responses: Mutex::new(VecDeque::from(vec![
            Err(SourceError::transient("connection reset by peer")),
            Err(SourceError::transient("HTTP 503 Service Unavailable")),
            herd_page(0, 100),
            herd_page(100, 20),
        ])),
    });
    let adapter = SoapSource::with_transport(
        SourceId::new("chr_herds").unwrap(),
        config.soap.as_ref().unwrap(),
        transport,
    );

    let handle = coordinator
        .start_with_adapters(vec![(config, Box::new(adapter) as Box<dyn SourceAdapter>)])
        .unwrap();
    let status = wait_for(&handle, RunStatus::is_finished).await;
    let summary = handle.wait().await;

    let source = status.source("chr_herds").unwrap();
    assert!(source
        .history
        .iter()
        .any(|t| t.state == SourceState::Committing));
    assert_eq!(source.state, SourceState::Terminated);

    assert!(summary.is_successful());
    assert_eq!(summary.total_committed(), 120);
    assert!(stores.failures.all().is_empty());
    assert_eq!(
        stores.warehouse.committed_batches("chr_herds"),
        vec![(0, 100), (1, 20)]
    );

    let rows = stores.warehouse.rows_for("chr_herds");
    assert!(rows.iter().all(|(_, row)| row.crs == 4326));
}

#[tokio::test]
async fn test_open_retry_budget_exhausted_fails_source() {
    let stores = Stores::new();
    let coordinator = stores.coordinator(100);
    let mut config = parcels_source("flaky");
    config.retry.max_attempts = 2;

    let adapter = ScriptedSource::new("flaky", 0, 10);
    let flaky = FlakySource {
        inner: adapter,
        failures_left: 5,
    };
    let summary = coordinator
        .start_with_adapters(vec![(config, Box::new(flaky) as Box<dyn SourceAdapter>)])
        .unwrap()
        .wait()
        .await;

    assert_eq!(summary.sources[0].outcome, SourceOutcome::Failed);
    assert!(summary.sources[0]
        .error
        .as_deref()
        .unwrap()
        .contains("after 2 attempts"));
}

/// Fails `open` transiently a number of times
struct FlakySource {
    inner: ScriptedSource,
    failures_left: u32,
}

#[async_trait]
impl SourceAdapter for FlakySource {
    fn source_id(&self) -> &SourceId {
        self.inner.source_id()
    }

    fn kind(&self) -> &'static str {
        "flaky"
    }

    async fn open(&mut self) -> Result<(), SourceError> {
        if self.failures_left > 0 {
            self.failures_left -= 1;
            return Err(SourceError::transient("connection refused"));
        }
        self.inner.open().await
    }

    async fn next(&mut self) -> Result<Option<RawChunk>, SourceError> {
        self.inner.next().await
    }

    fn checkpoint(&self) -> SourceCursor {
        self.inner.checkpoint()
    }

    fn resume(&mut self, cursor: SourceCursor) -> Result<(), SourceError> {
        self.inner.resume(cursor)
    }

    fn decode(&self, chunk: &RawChunk) -> Vec<ProvisionalRecord> {
        self.inner.decode(chunk)
    }
}
