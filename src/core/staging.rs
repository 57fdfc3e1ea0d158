//! Raw chunk staging
//!
//! Each fetched chunk that carries bytes is copied to object storage as
//! `<prefix>raw/<source_id>/<run_id>/chunk-<n>.raw` before it is decoded.
//! Chunk numbers start at 1 and follow fetch order.

use crate::adapters::storage::ObjectStore;
use crate::domain::{RawChunk, SourceError, SourceId};
use std::sync::Arc;
use uuid::Uuid;

pub struct ChunkStager {
    store: Arc<dyn ObjectStore>,
    directory: String,
    staged: u64,
}

impl ChunkStager {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: &str, source_id: &SourceId, run_id: Uuid) -> Self {
        Self {
            store,
            directory: format!("{prefix}raw/{source_id}/{run_id}/"),
            staged: 0,
        }
    }

    /// Number of chunks written so far
    pub fn staged(&self) -> u64 {
        self.staged
    }

    /// Writes the chunk and returns its object path, or `None` for an empty
    /// chunk
    pub async fn stage(&mut self, chunk: &RawChunk) -> Result<Option<String>, SourceError> {
        if chunk.bytes.is_empty() {
            tracing::debug!(source_id = %chunk.source_id, cursor = %chunk.start, "Empty chunk, skipping staging");
            return Ok(None);
        }
        let path = format!("{}chunk-{:06}.raw", self.directory, self.staged + 1);
        self.store.write(&path, chunk.bytes.clone()).await?;
        self.staged += 1;
        tracing::debug!(
            source_id = %chunk.source_id,
            path = %path,
            bytes = chunk.bytes.len(),
            "Staged raw chunk"
        );
        Ok(Some(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::storage::LocalObjectStore;
    use crate::domain::SourceCursor;
    use bytes::Bytes;
    use tempfile::TempDir;

    fn chunk(source_id: &SourceId, body: &'static [u8]) -> RawChunk {
        RawChunk::new(
            source_id.clone(),
            SourceCursor::Start,
            SourceCursor::Page { offset: 1 },
            Bytes::from_static(body),
        )
    }

    #[tokio::test]
    async fn test_stage_numbers_chunks_and_skips_empty() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(LocalObjectStore::with_root(dir.path(), "", None));
        let source_id = SourceId::new("parcels").unwrap();
        let run_id = Uuid::new_v4();
        let mut stager = ChunkStager::new(store, "landing/", &source_id, run_id);

        let first = stager.stage(&chunk(&source_id, b"<a/>")).await.unwrap();
        assert!(stager.stage(&chunk(&source_id, b"")).await.unwrap().is_none());
        let second = stager.stage(&chunk(&source_id, b"<b/>")).await.unwrap();

        assert_eq!(
            first.as_deref(),
            Some(format!("landing/raw/parcels/{run_id}/chunk-000001.raw").as_str())
        );
        assert_eq!(
            second.as_deref(),
            Some(format!("landing/raw/parcels/{run_id}/chunk-000002.raw").as_str())
        );
        assert_eq!(stager.staged(), 2);
        let written = std::fs::read(dir.path().join(second.unwrap())).unwrap();
        assert_eq!(written, b"<b/>");
    }

    #[tokio::test]
    async fn test_read_only_store_fails_staging() {
        struct ReadOnly;

        #[async_trait::async_trait]
        impl ObjectStore for ReadOnly {
            async fn list(&self) -> Result<Vec<crate::adapters::storage::ObjectInfo>, SourceError> {
                Ok(Vec::new())
            }
            async fn read(&self, _: &str, _: u64, _: u64) -> Result<Bytes, SourceError> {
                Ok(Bytes::new())
            }
            fn describe(&self) -> String {
                "sftp://host/out".to_string()
            }
        }

        let source_id = SourceId::new("herds").unwrap();
        let mut stager = ChunkStager::new(Arc::new(ReadOnly), "", &source_id, Uuid::new_v4());
        let err = stager.stage(&chunk(&source_id, b"x")).await.unwrap_err();
        assert!(!err.is_transient());
        assert!(err.to_string().contains("does not accept writes"));
    }
}
