//! File-backed checkpoint and failure stores
//!
//! Checkpoints are one JSON document per source, replaced atomically via a
//! temporary file and rename. Failures are appended to a JSON Lines file.

use crate::adapters::database::traits::{CheckpointStorage, FailureStorage};
use crate::core::state::Checkpoint;
use crate::domain::{FailureRecord, Result, SourceId, StrataError};
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Checkpoints stored as `<dir>/<source_id>.json`
pub struct FileCheckpointStorage {
    dir: PathBuf,
}

impl FileCheckpointStorage {
    pub async fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            StrataError::State(format!(
                "Failed to create checkpoint directory {}: {}",
                dir.display(),
                e
            ))
        })?;
        Ok(Self { dir })
    }

    fn path_for(&self, source_id: &SourceId) -> PathBuf {
        self.dir.join(format!("{}.json", source_id))
    }
}

#[async_trait]
impl CheckpointStorage for FileCheckpointStorage {
    async fn load_checkpoint(&self, source_id: &SourceId) -> Result<Option<Checkpoint>> {
        let path = self.path_for(source_id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let checkpoint = serde_json::from_slice(&bytes).map_err(|e| {
                    StrataError::State(format!("Corrupt checkpoint {}: {}", path.display(), e))
                })?;
                Ok(Some(checkpoint))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        let path = self.path_for(&checkpoint.source_id);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(checkpoint)?;

        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp, &path).await.map_err(|e| {
            StrataError::State(format!(
                "Failed to replace checkpoint {}: {}",
                path.display(),
                e
            ))
        })
    }

    async fn get_all_checkpoints(&self) -> Result<Vec<Checkpoint>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut checkpoints = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            match serde_json::from_slice::<Checkpoint>(&bytes) {
                Ok(checkpoint) => checkpoints.push(checkpoint),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable checkpoint")
                }
            }
        }
        checkpoints.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        Ok(checkpoints)
    }
}

/// Failures appended to a JSON Lines file
pub struct JsonLinesFailureStorage {
    path: PathBuf,
    /// (source id, provenance key) of stored failures, loaded on first use
    keys: Mutex<Option<HashSet<(String, String)>>>,
}

impl JsonLinesFailureStorage {
    pub async fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(Self {
            path,
            keys: Mutex::new(None),
        })
    }

    async fn read_all(path: &Path) -> Result<Vec<FailureRecord>> {
        let text = match tokio::fs::read_to_string(path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut records = Vec::new();
        for (n, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(
                    path = %path.display(),
                    line = n + 1,
                    error = %e,
                    "Skipping unreadable failure record"
                ),
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl FailureStorage for JsonLinesFailureStorage {
    async fn append_failure(&self, failure: &FailureRecord) -> Result<bool> {
        let mut guard = self.keys.lock().await;
        if guard.is_none() {
            let existing = Self::read_all(&self.path).await?;
            *guard = Some(
                existing
                    .into_iter()
                    .map(|f| (f.source_id.into_inner(), f.provenance_key))
                    .collect(),
            );
        }
        let keys = guard.get_or_insert_with(HashSet::new);

        let key = (failure.source_id.to_string(), failure.provenance_key.clone());
        if keys.contains(&key) {
            return Ok(false);
        }

        let mut line = serde_json::to_vec(failure)?;
        line.push(b'\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;

        keys.insert(key);
        Ok(true)
    }

    async fn list_failures(&self, source_id: &SourceId) -> Result<Vec<FailureRecord>> {
        let _guard = self.keys.lock().await;
        Ok(Self::read_all(&self.path)
            .await?
            .into_iter()
            .filter(|f| &f.source_id == source_id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::{CheckpointBuilder, CheckpointStatus};
    use crate::domain::{FailureStage, Provenance, RecordRejection, SourceCursor};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_checkpoint_round_trip() {
        let dir = TempDir::new().unwrap();
        let storage = FileCheckpointStorage::new(dir.path().join("state")).await.unwrap();
        let id = SourceId::new("chr_herds").unwrap();

        assert!(storage.load_checkpoint(&id).await.unwrap().is_none());

        let checkpoint = CheckpointBuilder::new(id.clone())
            .cursor(SourceCursor::Page { offset: 300 })
            .last_committed_sequence(2)
            .records_committed(300)
            .status(CheckpointStatus::Interrupted)
            .build();
        storage.save_checkpoint(&checkpoint).await.unwrap();
        storage.save_checkpoint(&checkpoint).await.unwrap();

        assert_eq!(storage.load_checkpoint(&id).await.unwrap(), Some(checkpoint));
        assert_eq!(storage.get_all_checkpoints().await.unwrap().len(), 1);
        assert!(!dir.path().join("state/chr_herds.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_failures_survive_reopen_and_dedup() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("failures.jsonl");
        let id = SourceId::new("chr").unwrap();
        let failure = FailureRecord::new(
            RecordRejection::invalid_geometry("ring 0 is not closed"),
            FailureStage::Reproject,
            Provenance {
                source_id: id.clone(),
                chunk_start: SourceCursor::Start,
                chunk_end: SourceCursor::Page { offset: 10 },
                index: 4,
                chunk_records: 10,
            },
            Default::default(),
        );

        let storage = JsonLinesFailureStorage::new(&path).await.unwrap();
        assert!(storage.append_failure(&failure).await.unwrap());
        drop(storage);

        let reopened = JsonLinesFailureStorage::new(&path).await.unwrap();
        assert!(!reopened.append_failure(&failure).await.unwrap());

        let stored = reopened.list_failures(&id).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].detail, "ring 0 is not closed");
    }
}
