//! Local directory object store

use super::{finish_listing, ObjectInfo, ObjectStore};
use crate::config::ObjectStoreConfig;
use crate::domain::SourceError;
use async_trait::async_trait;
use bytes::Bytes;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Objects are the files below `root`; paths are relative with `/`
/// separators.
pub struct LocalObjectStore {
    root: PathBuf,
    prefix: String,
    suffix: Option<String>,
}

impl LocalObjectStore {
    pub fn new(config: &ObjectStoreConfig) -> Result<Self, SourceError> {
        let root = config
            .root
            .as_deref()
            .ok_or_else(|| SourceError::fatal("local object store requires a root directory"))?;
        Ok(Self::with_root(root, &config.prefix, config.suffix.clone()))
    }

    pub fn with_root(root: impl Into<PathBuf>, prefix: &str, suffix: Option<String>) -> Self {
        Self {
            root: root.into(),
            prefix: prefix.to_string(),
            suffix,
        }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, SourceError> {
        if Path::new(path)
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(SourceError::fatal(format!("object path '{path}' leaves the root")));
        }
        Ok(self.root.join(path))
    }
}

fn io_error(context: String, e: std::io::Error) -> SourceError {
    match e.kind() {
        std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
            SourceError::fatal(format!("{context}: {e}"))
        }
        _ => SourceError::transient(format!("{context}: {e}")),
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn list(&self) -> Result<Vec<ObjectInfo>, SourceError> {
        let mut objects = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir)
                .await
                .map_err(|e| io_error(format!("Failed to list {}", dir.display()), e))?;
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| io_error(format!("Failed to list {}", dir.display()), e))?
            {
                let path = entry.path();
                let meta = entry
                    .metadata()
                    .await
                    .map_err(|e| io_error(format!("Failed to stat {}", path.display()), e))?;
                if meta.is_dir() {
                    pending.push(path);
                    continue;
                }
                let Ok(relative) = path.strip_prefix(&self.root) else {
                    continue;
                };
                let name = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if name.starts_with(&self.prefix) {
                    objects.push(ObjectInfo {
                        path: name,
                        size: meta.len(),
                    });
                }
            }
        }

        Ok(finish_listing(objects, self.suffix.as_deref()))
    }

    async fn read(&self, path: &str, offset: u64, len: u64) -> Result<Bytes, SourceError> {
        let full = self.resolve(path)?;
        let mut file = tokio::fs::File::open(&full)
            .await
            .map_err(|e| io_error(format!("Failed to open {}", full.display()), e))?;
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| io_error(format!("Failed to seek {}", full.display()), e))?;

        let mut buf = Vec::new();
        file.take(len)
            .read_to_end(&mut buf)
            .await
            .map_err(|e| io_error(format!("Failed to read {}", full.display()), e))?;
        Ok(Bytes::from(buf))
    }

    async fn write(&self, path: &str, bytes: Bytes) -> Result<(), SourceError> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(format!("Failed to create {}", parent.display()), e))?;
        }
        tokio::fs::write(&full, &bytes)
            .await
            .map_err(|e| io_error(format!("Failed to write {}", full.display()), e))
    }

    fn describe(&self) -> String {
        format!("file://{}/{}", self.root.display(), self.prefix)
    }
}
