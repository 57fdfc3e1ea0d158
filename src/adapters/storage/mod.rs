//! Object storage access
//!
//! [`ObjectStore`] is the listing and ranged-read interface behind the
//! object storage, PDF and SFTP sources. Listings are sorted by path so
//! that file cursors stay meaningful across runs. Stores that accept
//! writes also receive staged raw chunks.

pub mod gcs;
pub mod local;

use crate::config::{ObjectStoreBackend, ObjectStoreConfig};
use crate::domain::SourceError;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

pub use gcs::GcsObjectStore;
pub use local::LocalObjectStore;

/// One listed object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub path: String,
    pub size: u64,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Objects under the configured prefix, sorted by path
    async fn list(&self) -> Result<Vec<ObjectInfo>, SourceError>;

    /// Up to `len` bytes starting at `offset`. Reading at or past the end
    /// returns an empty buffer.
    async fn read(&self, path: &str, offset: u64, len: u64) -> Result<Bytes, SourceError>;

    /// Creates or replaces the object at `path`
    async fn write(&self, path: &str, _bytes: Bytes) -> Result<(), SourceError> {
        Err(SourceError::fatal(format!(
            "{} does not accept writes ({path})",
            self.describe()
        )))
    }

    /// Short description for logs, e.g. `gs://bucket/prefix`
    fn describe(&self) -> String;
}

/// Create the object store selected by the configuration
pub fn create_object_store(config: &ObjectStoreConfig) -> Result<Arc<dyn ObjectStore>, SourceError> {
    match config.backend {
        ObjectStoreBackend::Gcs => Ok(Arc::new(GcsObjectStore::new(config)?)),
        ObjectStoreBackend::Local => Ok(Arc::new(LocalObjectStore::new(config)?)),
    }
}

/// Keeps objects matching the optional suffix and sorts them by path
pub(crate) fn finish_listing(mut objects: Vec<ObjectInfo>, suffix: Option<&str>) -> Vec<ObjectInfo> {
    if let Some(suffix) = suffix {
        objects.retain(|o| o.path.ends_with(suffix));
    }
    objects.sort_by(|a, b| a.path.cmp(&b.path));
    objects
}
