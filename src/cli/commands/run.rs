//! Run command implementation
//!
//! Ingests the selected sources until each one is drained, fails or is
//! stopped by a shutdown signal.

use super::exit_code;
use crate::adapters::database::create_backends;
use crate::config::load_config;
use crate::core::pipeline::{Coordinator, RunSummary, SourceOutcome};
use clap::Args;
use std::io::{self, Write};
use tokio::sync::watch;

/// Arguments for the run command
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Only run these source ids (repeatable or comma-separated)
    #[arg(short, long, value_name = "ID")]
    pub source: Vec<String>,

    /// Fetch, normalize and batch without writing to the warehouse
    #[arg(long)]
    pub dry_run: bool,

    /// Skip confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

impl RunArgs {
    /// Requested source ids, split on commas
    pub fn source_ids(&self) -> Vec<String> {
        self.source
            .iter()
            .flat_map(|s| s.split(','))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    pub async fn execute(
        &self,
        config_path: &str,
        mut shutdown_signal: watch::Receiver<bool>,
    ) -> anyhow::Result<i32> {
        tracing::info!("Starting run command");

        let config = match load_config(config_path) {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(error = %e, "Failed to load configuration");
                eprintln!("Failed to load configuration: {e}");
                return Ok(exit_code::CONFIGURATION);
            }
        };

        let requested = self.source_ids();
        if let Some(unknown) = requested
            .iter()
            .find(|id| !config.sources.iter().any(|s| &s.id == *id))
        {
            eprintln!("Unknown source id: {unknown}");
            return Ok(exit_code::CONFIGURATION);
        }

        let sources = config.selected_sources(&requested);
        if sources.is_empty() {
            println!("No enabled sources selected. Nothing to do.");
            return Ok(exit_code::SUCCESS);
        }

        let dry_run = self.dry_run || config.application.dry_run;
        if dry_run {
            tracing::info!("Dry run mode enabled - no data will be written");
            println!("DRY RUN MODE - nothing will be written to the warehouse, checkpoints or failure store");
            println!();
        }

        if !self.yes && !dry_run {
            println!("Run Configuration:");
            println!("  Target CRS: {}", config.pipeline.target_crs);
            println!("  Batch size: {}", config.pipeline.batch.max_records);
            println!("  Sources:");
            for source in &sources {
                println!("    - {} ({}, {})", source.id, source.kind.as_str(), source.crs);
            }
            println!();
            print!("Proceed with ingestion? [y/N]: ");
            io::stdout().flush()?;

            let mut input = String::new();
            io::stdin().read_line(&mut input)?;
            if !input.trim().eq_ignore_ascii_case("y") {
                println!("Run cancelled.");
                return Ok(exit_code::SUCCESS);
            }
        }

        let backends = match create_backends(&config).await {
            Ok(b) => b,
            Err(e) => {
                tracing::error!(error = %e, "Failed to create storage backends");
                eprintln!("Failed to initialize storage: {e}");
                return Ok(exit_code::CONNECTION);
            }
        };

        if !dry_run {
            if let Err(e) = backends.warehouse.test_connection().await {
                tracing::error!(error = %e, "Warehouse connection test failed");
                eprintln!("Failed to connect to the warehouse: {e}");
                return Ok(exit_code::CONNECTION);
            }
            if let Err(e) = backends.warehouse.ensure_schema().await {
                tracing::error!(error = %e, "Failed to prepare warehouse schema");
                eprintln!("Failed to prepare warehouse schema: {e}");
                return Ok(exit_code::FATAL);
            }
        }

        let coordinator = Coordinator::new(config.pipeline.clone(), backends).with_dry_run(dry_run);
        let handle = match coordinator.start_run(sources) {
            Ok(h) => h,
            Err(e) => {
                tracing::error!(error = %e, "Failed to start run");
                eprintln!("Failed to start run: {e}");
                return Ok(exit_code::CONFIGURATION);
            }
        };

        println!("Starting run {}...", handle.run_id());
        println!();

        // Forward the process shutdown signal to the run
        let stop = handle.stop_signal();
        let forwarder = tokio::spawn(async move {
            while shutdown_signal.changed().await.is_ok() {
                if *shutdown_signal.borrow() {
                    tracing::info!("Shutdown signal received, draining sources");
                    let _ = stop.send(true);
                    break;
                }
            }
        });

        let summary = handle.wait().await;
        forwarder.abort();

        print_summary(&summary);
        Ok(exit_code_for(&summary))
    }
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!("Run Summary ({}):", summary.run_id);
    println!(
        "{:<24} {:<12} {:>10} {:>10} {:>10} {:>8}",
        "Source", "Outcome", "Fetched", "Committed", "Failed", "Batches"
    );
    println!("{}", "-".repeat(80));
    for source in &summary.sources {
        let outcome = match source.outcome {
            SourceOutcome::Completed => "completed",
            SourceOutcome::Interrupted => "interrupted",
            SourceOutcome::Failed => "FAILED",
        };
        println!(
            "{:<24} {:<12} {:>10} {:>10} {:>10} {:>8}",
            source.source_id.as_str(),
            outcome,
            source.records_fetched,
            source.records_committed,
            source.records_failed,
            source.batches_committed
        );
    }
    println!();
    println!("  Records committed: {}", summary.total_committed());
    println!("  Records rejected: {}", summary.total_failed_records());
    println!("  Commit rate: {:.2}%", summary.commit_rate());
    println!("  Duration: {:.2}s", summary.duration.as_secs_f64());

    let failed: Vec<_> = summary.failed_sources().collect();
    if !failed.is_empty() {
        println!();
        println!("Failed sources:");
        for source in failed {
            println!(
                "  - {}: {}",
                source.source_id,
                source.error.as_deref().unwrap_or("unknown error")
            );
        }
    }

    if summary.was_interrupted() {
        println!();
        println!("Run interrupted. Progress is checkpointed; run the same command to resume.");
    }
}

/// Interrupted takes precedence so a stopped run is never reported as success
fn exit_code_for(summary: &RunSummary) -> i32 {
    if summary.was_interrupted() {
        exit_code::INTERRUPTED
    } else if !summary.is_successful() {
        exit_code::PARTIAL_FAILURE
    } else {
        exit_code::SUCCESS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::pipeline::SourceSummary;
    use crate::domain::SourceId;
    use std::time::Duration;
    use uuid::Uuid;

    fn summary(outcomes: &[SourceOutcome]) -> RunSummary {
        RunSummary {
            run_id: Uuid::new_v4(),
            sources: outcomes
                .iter()
                .enumerate()
                .map(|(i, outcome)| {
                    let mut s = SourceSummary::new(SourceId::new(format!("s{i}")).unwrap());
                    s.outcome = *outcome;
                    s
                })
                .collect(),
            duration: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code_for(&summary(&[SourceOutcome::Completed])), 0);
        assert_eq!(
            exit_code_for(&summary(&[SourceOutcome::Completed, SourceOutcome::Failed])),
            1
        );
        assert_eq!(
            exit_code_for(&summary(&[SourceOutcome::Failed, SourceOutcome::Interrupted])),
            130
        );
    }

    #[test]
    fn test_source_ids_split_and_trim() {
        let args = RunArgs {
            source: vec!["a, b".to_string(), "c".to_string(), ",".to_string()],
            dry_run: false,
            yes: true,
        };
        assert_eq!(args.source_ids(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_missing_config_is_configuration_error() {
        let (_tx, rx) = watch::channel(false);
        let args = RunArgs {
            source: Vec::new(),
            dry_run: true,
            yes: true,
        };
        let code = args.execute("/nonexistent/strata.toml", rx).await.unwrap();
        assert_eq!(code, exit_code::CONFIGURATION);
    }
}
