//! Pipeline coordinator
//!
//! Starts one task per source and tracks the run. Sources are independent:
//! a source that fails is reported in the status and the summary while the
//! others keep running.

use super::source_pipeline::SourcePipeline;
use super::status::{RunStatus, StatusRegistry};
use super::summary::{RunSummary, SourceOutcome, SourceSummary};
use crate::adapters::database::Backends;
use crate::adapters::sources::{create_source_adapter, RetryingSource, SourceAdapter};
use crate::adapters::storage::create_object_store;
use crate::config::{PipelineConfig, SourceConfig};
use crate::core::batch::BatchLimits;
use crate::core::failures::FailureSink;
use crate::core::geometry::{Crs, Reprojector};
use crate::core::normalize::SchemaNormalizer;
use crate::core::retry::RetryPolicy;
use crate::core::sink::SinkWriter;
use crate::core::staging::ChunkStager;
use crate::core::state::CheckpointManager;
use crate::domain::{Result, SourceId, StrataError};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// A running ingestion
pub struct RunHandle {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    started: Instant,
    stop_tx: watch::Sender<bool>,
    status: StatusRegistry,
    tasks: Vec<(SourceId, JoinHandle<SourceSummary>)>,
}

impl RunHandle {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Ask every source to stop. Committed batches stay committed; open
    /// partial batches are discarded.
    pub fn stop(&self) {
        tracing::info!(run_id = %self.run_id, "Stop requested");
        let _ = self.stop_tx.send(true);
    }

    /// A sender that stops the run, for signal handlers
    pub fn stop_signal(&self) -> watch::Sender<bool> {
        self.stop_tx.clone()
    }

    pub fn status(&self) -> RunStatus {
        RunStatus {
            run_id: self.run_id,
            started_at: self.started_at,
            sources: self.status.snapshot(),
        }
    }

    /// Wait for every source to finish
    pub async fn wait(self) -> RunSummary {
        let mut sources = Vec::with_capacity(self.tasks.len());
        for (source_id, task) in self.tasks {
            match task.await {
                Ok(summary) => sources.push(summary),
                Err(e) => {
                    tracing::error!(source_id = %source_id, error = %e, "Source task aborted");
                    let mut summary = SourceSummary::new(source_id);
                    summary.outcome = SourceOutcome::Failed;
                    summary.error = Some(format!("source task aborted: {e}"));
                    sources.push(summary);
                }
            }
        }
        let summary = RunSummary {
            run_id: self.run_id,
            sources,
            duration: self.started.elapsed(),
        };
        tracing::info!(
            run_id = %summary.run_id,
            sources = summary.sources.len(),
            failed_sources = summary.failed_sources().count(),
            records_committed = summary.total_committed(),
            records_failed = summary.total_failed_records(),
            duration_ms = summary.duration.as_millis() as u64,
            "Run finished"
        );
        summary
    }
}

/// Runs sources against one set of storage backends
pub struct Coordinator {
    pipeline: PipelineConfig,
    backends: Backends,
    dry_run: bool,
}

impl Coordinator {
    pub fn new(pipeline: PipelineConfig, backends: Backends) -> Self {
        Self {
            pipeline,
            backends,
            dry_run: false,
        }
    }

    /// Dry run: fetch, normalize and reproject, but write no batches,
    /// checkpoints or failure records
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn backends(&self) -> &Backends {
        &self.backends
    }

    /// Start a run over the given sources
    ///
    /// Every source is set up before any task starts, so a configuration
    /// error aborts the whole run.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an unknown CRS, an invalid schema
    /// mapping or an adapter that cannot be built.
    pub fn start_run(&self, sources: Vec<SourceConfig>) -> Result<RunHandle> {
        let adapters = sources
            .into_iter()
            .map(|config| {
                let adapter = create_source_adapter(&config)?;
                Ok((config, adapter))
            })
            .collect::<Result<Vec<_>>>()?;
        self.start_with_adapters(adapters)
    }

    /// Start a run with adapters built by the caller. Each adapter is
    /// wrapped in its source's retry policy.
    pub fn start_with_adapters(
        &self,
        sources: Vec<(SourceConfig, Box<dyn SourceAdapter>)>,
    ) -> Result<RunHandle> {
        let target = Crs::parse(&self.pipeline.target_crs).map_err(|e| {
            StrataError::Configuration(format!("pipeline.target_crs: {e}"))
        })?;
        let reprojector = Reprojector::new(target, self.pipeline.require_simple_polygons);
        let limits = BatchLimits::from_config(&self.pipeline.batch);

        let sink = Arc::new(
            SinkWriter::new(
                self.backends.warehouse.clone(),
                RetryPolicy::from_config(&self.pipeline.sink_retry),
            )
            .with_dry_run(self.dry_run),
        );
        let failures =
            Arc::new(FailureSink::new(self.backends.failures.clone()).with_dry_run(self.dry_run));
        let checkpoints = Arc::new(
            CheckpointManager::new(self.backends.checkpoints.clone()).with_dry_run(self.dry_run),
        );
        let status = StatusRegistry::new();
        let run_id = Uuid::new_v4();

        let staging = match &self.pipeline.staging {
            Some(config) if !self.dry_run => {
                let store = create_object_store(config).map_err(|e| {
                    StrataError::Configuration(format!("pipeline.staging: {e}"))
                })?;
                tracing::info!(store = %store.describe(), "Staging raw chunks");
                Some((store, config.prefix.as_str()))
            }
            _ => None,
        };

        let mut pipelines = Vec::with_capacity(sources.len());
        for (config, adapter) in sources {
            let source_id = SourceId::new(config.id.as_str()).map_err(StrataError::Configuration)?;
            let config_error =
                |e: String| StrataError::Configuration(format!("source '{}': {}", config.id, e));
            let normalizer = SchemaNormalizer::new(&config.schema).map_err(config_error)?;
            let source_crs = Crs::parse(&config.crs).map_err(config_error)?;
            let adapter: Box<dyn SourceAdapter> = Box::new(RetryingSource::new(
                adapter,
                RetryPolicy::from_config(&config.retry),
            ));

            status.register(&source_id, adapter.kind());
            let stager = staging
                .as_ref()
                .map(|(store, prefix)| ChunkStager::new(store.clone(), prefix, &source_id, run_id));
            pipelines.push(SourcePipeline {
                source_id,
                adapter,
                staging: stager,
                normalizer,
                source_crs,
                reprojector: reprojector.clone(),
                limits,
                max_in_flight: self.pipeline.max_in_flight_records,
                queue_capacity: self.pipeline.queue_capacity,
                sink: sink.clone(),
                failures: failures.clone(),
                checkpoints: checkpoints.clone(),
                status: status.clone(),
            });
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        tracing::info!(
            run_id = %run_id,
            sources = pipelines.len(),
            warehouse = sink.warehouse_name(),
            target_crs = %reprojector.target(),
            dry_run = self.dry_run,
            "Starting run"
        );

        let tasks = pipelines
            .into_iter()
            .map(|pipeline| {
                let source_id = pipeline.source_id.clone();
                let task = tokio::spawn(pipeline.run(stop_rx.clone()));
                (source_id, task)
            })
            .collect();

        Ok(RunHandle {
            run_id,
            started_at: Utc::now(),
            started: Instant::now(),
            stop_tx,
            status,
            tasks,
        })
    }

    /// Current status of a run
    pub fn status(&self, handle: &RunHandle) -> RunStatus {
        handle.status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::database::memory::{
        InMemoryCheckpointStorage, InMemoryFailureStorage, InMemoryWarehouse,
    };
    use mockito::Server;

    fn source(toml_src: &str) -> SourceConfig {
        toml::from_str(toml_src).unwrap()
    }

    #[tokio::test]
    async fn test_start_run_builds_adapters_from_config() {
        let mut server = Server::new_async().await;
        let body = r#"{"type":"FeatureCollection","features":[
            {"type":"Feature","properties":{"id":"a"},"geometry":{"type":"Point","coordinates":[9.5,56.1]}},
            {"type":"Feature","properties":{"id":"b"},"geometry":{"type":"Point","coordinates":[9.6,56.2]}},
            {"type":"Feature","properties":{"id":"c"},"geometry":{"type":"Point","coordinates":[9.7,56.3]}}
        ]}"#;
        let mock = server
            .mock("GET", "/parcels.geojson")
            .with_status(200)
            .with_body(body)
            .create_async()
            .await;

        let warehouse = Arc::new(InMemoryWarehouse::new());
        let backends = Backends {
            warehouse: warehouse.clone(),
            checkpoints: Arc::new(InMemoryCheckpointStorage::new()),
            failures: Arc::new(InMemoryFailureStorage::new()),
        };
        let coordinator = Coordinator::new(PipelineConfig::default(), backends);
        let config = source(&format!(
            r#"
            id = "parcels"
            type = "json_stream"
            [json_stream]
            url = "{}/parcels.geojson"
            records_path = "features"
            [schema]
            id_field = "properties.id"
            geometry = {{ format = "geojson", field = "geometry" }}
            "#,
            server.url()
        ));

        let summary = coordinator.start_run(vec![config]).unwrap().wait().await;

        mock.assert_async().await;
        assert!(summary.is_successful());
        assert_eq!(summary.total_committed(), 3);
        assert_eq!(warehouse.committed_batches("parcels"), vec![(0, 3)]);
    }

    #[tokio::test]
    async fn test_start_run_rejects_missing_protocol_table() {
        let coordinator = Coordinator::new(PipelineConfig::default(), Backends::in_memory());
        let config = source(
            r#"
            id = "herds"
            type = "soap"
            [schema]
            id_field = "HerdNumber"
            geometry = { format = "wkt", field = "wkt" }
            "#,
        );

        assert!(matches!(
            coordinator.start_run(vec![config]),
            Err(StrataError::Configuration(_))
        ));
    }
}
