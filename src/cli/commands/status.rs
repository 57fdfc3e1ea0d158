//! Status command implementation
//!
//! Shows the stored checkpoint and failure count of each source.

use super::exit_code;
use crate::adapters::database::create_backends;
use crate::config::load_config;
use crate::core::failures::FailureSink;
use crate::core::state::{Checkpoint, CheckpointManager, CheckpointStatus};
use clap::Args;

/// Arguments for the status command
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Filter by source id
    #[arg(short, long)]
    pub source: Option<String>,
}

impl StatusArgs {
    pub async fn execute(&self, config_path: &str) -> anyhow::Result<i32> {
        tracing::info!("Checking ingestion status");

        println!("Ingestion Status");
        println!();

        let config = match load_config(config_path) {
            Ok(c) => c,
            Err(e) => {
                println!("Failed to load configuration file");
                println!("   Error: {}", e);
                return Ok(exit_code::CONFIGURATION);
            }
        };

        let backends = match create_backends(&config).await {
            Ok(b) => b,
            Err(e) => {
                println!("Failed to open the checkpoint store");
                println!("   Error: {}", e);
                return Ok(exit_code::CONNECTION);
            }
        };

        let checkpoints = CheckpointManager::new(backends.checkpoints.clone());
        let failures = FailureSink::new(backends.failures.clone());

        let all = match checkpoints.get_all().await {
            Ok(c) => c,
            Err(e) => {
                println!("Failed to load checkpoints");
                println!("   Error: {}", e);
                return Ok(exit_code::FATAL);
            }
        };

        if all.is_empty() {
            println!("No ingestion history found.");
            println!("Run 'strata run' to start ingesting data.");
            return Ok(exit_code::SUCCESS);
        }

        let filtered: Vec<&Checkpoint> = all
            .iter()
            .filter(|c| {
                self.source
                    .as_deref()
                    .map_or(true, |id| c.source_id.as_str() == id)
            })
            .collect();

        if filtered.is_empty() {
            println!("No checkpoints match the specified source.");
            return Ok(exit_code::SUCCESS);
        }

        println!("Found {} checkpoint(s):", filtered.len());
        println!();
        println!(
            "{:<24} {:<12} {:>10} {:>10} {:>8} {:<24} {:<20}",
            "Source", "Status", "Committed", "Failures", "Last Seq", "Cursor", "Updated"
        );
        println!("{}", "-".repeat(116));

        for checkpoint in filtered {
            // Stored failures may exceed the checkpoint's count after a re-run
            let stored_failures = match failures.count(&checkpoint.source_id).await {
                Ok(n) => n.to_string(),
                Err(e) => {
                    tracing::warn!(source_id = %checkpoint.source_id, error = %e, "Failed to count failures");
                    "?".to_string()
                }
            };

            println!(
                "{:<24} {:<12} {:>10} {:>10} {:>8} {:<24} {:<20}",
                checkpoint.source_id.as_str(),
                status_label(checkpoint.status),
                checkpoint.records_committed,
                stored_failures,
                checkpoint
                    .last_committed_sequence
                    .map_or_else(|| "-".to_string(), |s| s.to_string()),
                checkpoint.cursor.to_string(),
                checkpoint.updated_at.format("%Y-%m-%d %H:%M:%S")
            );
        }

        println!();
        Ok(exit_code::SUCCESS)
    }
}

fn status_label(status: CheckpointStatus) -> &'static str {
    match status {
        CheckpointStatus::NotStarted => "not started",
        CheckpointStatus::InProgress => "in progress",
        CheckpointStatus::Completed => "completed",
        CheckpointStatus::Interrupted => "interrupted",
        CheckpointStatus::Failed => "FAILED",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::database::file::FileCheckpointStorage;
    use crate::adapters::database::CheckpointStorage;
    use crate::core::state::CheckpointBuilder;
    use crate::domain::{SourceCursor, SourceId};
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    fn config_with_state_dir(dir: &TempDir) -> NamedTempFile {
        let text = format!(
            r#"
[warehouse]
target = "memory"

[state]
backend = "file"
path = "{}"

[failures]
backend = "memory"

[[sources]]
id = "chr_herds"
type = "json_stream"

[sources.json_stream]
url = "https://data.example.org/herds.json"

[sources.schema]
id_field = "id"
geometry = {{ format = "wkt", field = "wkt" }}
"#,
            dir.path().display()
        );
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_status_label() {
        assert_eq!(status_label(CheckpointStatus::Failed), "FAILED");
        assert_eq!(status_label(CheckpointStatus::InProgress), "in progress");
    }

    #[tokio::test]
    async fn test_status_with_stored_checkpoint() {
        let dir = TempDir::new().unwrap();
        let storage = FileCheckpointStorage::new(dir.path()).await.unwrap();
        storage
            .save_checkpoint(
                &CheckpointBuilder::new(SourceId::new("chr_herds").unwrap())
                    .cursor(SourceCursor::Stream { records: 200 })
                    .last_committed_sequence(1)
                    .records_committed(200)
                    .status(CheckpointStatus::Interrupted)
                    .build(),
            )
            .await
            .unwrap();

        let file = config_with_state_dir(&dir);
        let args = StatusArgs {
            source: Some("chr_herds".to_string()),
        };
        assert_eq!(args.execute(file.path().to_str().unwrap()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_status_without_history() {
        let dir = TempDir::new().unwrap();
        let file = config_with_state_dir(&dir);
        let args = StatusArgs { source: None };
        assert_eq!(args.execute(file.path().to_str().unwrap()).await.unwrap(), 0);
    }
}
