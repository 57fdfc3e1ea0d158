//! PDF documents from object storage
//!
//! Documents are taken one at a time from a sorted listing, loaded whole
//! and their text extracted on the blocking pool. Each page is one chunk;
//! `decode` matches every text line against the configured pattern and
//! turns the named captures into fields.

use super::traits::{build_records, unsupported_cursor, DecodedItem, SourceAdapter};
use crate::adapters::storage::{ObjectInfo, ObjectStore};
use crate::domain::{FieldMap, ProvisionalRecord, RawChunk, SourceCursor, SourceError, SourceId};
use async_trait::async_trait;
use bytes::Bytes;
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;

/// Turns a PDF document into the text of its pages, in page order
pub type TextExtractor = Arc<dyn Fn(&[u8]) -> Result<Vec<String>, String> + Send + Sync>;

/// Page text via `lopdf`
pub fn extract_pages(bytes: &[u8]) -> Result<Vec<String>, String> {
    let document = lopdf::Document::load_mem(bytes).map_err(|e| e.to_string())?;
    document
        .get_pages()
        .keys()
        .map(|&number| {
            document
                .extract_text(&[number])
                .map_err(|e| format!("page {number}: {e}"))
        })
        .collect()
}

/// A loaded document
struct LoadedDocument {
    doc_index: usize,
    pages: Vec<String>,
}

pub struct PdfSource {
    source_id: SourceId,
    store: Arc<dyn ObjectStore>,
    extractor: TextExtractor,
    line_pattern: Regex,
    files: Option<Vec<ObjectInfo>>,
    doc_index: usize,
    /// Next page, 1-based
    page: u32,
    loaded: Option<LoadedDocument>,
    pending_resume: Option<SourceCursor>,
}

impl PdfSource {
    pub fn new(
        source_id: SourceId,
        store: Arc<dyn ObjectStore>,
        line_pattern: &str,
    ) -> Result<Self, SourceError> {
        Self::with_extractor(source_id, store, line_pattern, Arc::new(extract_pages))
    }

    pub fn with_extractor(
        source_id: SourceId,
        store: Arc<dyn ObjectStore>,
        line_pattern: &str,
        extractor: TextExtractor,
    ) -> Result<Self, SourceError> {
        let line_pattern = Regex::new(line_pattern)
            .map_err(|e| SourceError::fatal(format!("invalid line pattern: {e}")))?;
        Ok(Self {
            source_id,
            store,
            extractor,
            line_pattern,
            files: None,
            doc_index: 0,
            page: 1,
            loaded: None,
            pending_resume: None,
        })
    }

    fn apply_resume(&mut self, files: &[ObjectInfo], cursor: &SourceCursor) -> Result<(), SourceError> {
        let (doc_index, page) = match cursor {
            SourceCursor::Start => (0, 1),
            SourceCursor::Document {
                doc_index,
                path,
                page,
            } => {
                if files.get(*doc_index).map(|f| &f.path) == Some(path) {
                    (*doc_index, *page)
                } else if let Some(index) = files.iter().position(|f| &f.path == path) {
                    (index, *page)
                } else {
                    tracing::warn!(
                        source_id = %self.source_id,
                        path = %path,
                        "Checkpointed document is no longer listed, continuing with the next document"
                    );
                    let next = files.iter().position(|f| f.path.as_str() > path.as_str());
                    (next.unwrap_or(files.len()), 1)
                }
            }
            other => return Err(unsupported_cursor("pdf", other)),
        };
        self.doc_index = doc_index;
        self.page = page.max(1);
        self.loaded = None;
        Ok(())
    }

    fn cursor_at(&self, doc_index: usize, page: u32) -> SourceCursor {
        let path = self
            .files
            .as_ref()
            .and_then(|files| files.get(doc_index))
            .map(|f| f.path.clone());
        match path {
            None if doc_index == 0 && page <= 1 => SourceCursor::Start,
            path => SourceCursor::Document {
                doc_index,
                path: path.unwrap_or_default(),
                page,
            },
        }
    }

    async fn load(&mut self, file: &ObjectInfo) -> Result<(), SourceError> {
        let bytes = self.store.read(&file.path, 0, file.size).await?;
        let extractor = Arc::clone(&self.extractor);
        let pages = tokio::task::spawn_blocking(move || extractor(&bytes))
            .await
            .map_err(|e| SourceError::fatal(format!("text extraction task failed: {e}")))?
            .map_err(|e| SourceError::fatal(format!("cannot read PDF {}: {e}", file.path)))?;

        tracing::debug!(
            source_id = %self.source_id,
            path = %file.path,
            pages = pages.len(),
            "Loaded PDF document"
        );
        self.loaded = Some(LoadedDocument {
            doc_index: self.doc_index,
            pages,
        });
        Ok(())
    }

    /// Captures of every line matching the pattern, and the number of
    /// non-blank lines that did not match
    fn match_lines(&self, text: &str) -> (Vec<FieldMap>, usize) {
        let mut rows = Vec::new();
        let mut skipped = 0;
        for line in text.lines().map(str::trim).filter(|line| !line.is_empty()) {
            let Some(captures) = self.line_pattern.captures(line) else {
                skipped += 1;
                continue;
            };
            let mut fields = FieldMap::new();
            for name in self.line_pattern.capture_names().flatten() {
                if let Some(m) = captures.name(name) {
                    fields.insert(name.to_string(), Value::String(m.as_str().trim().to_string()));
                }
            }
            rows.push(fields);
        }
        (rows, skipped)
    }
}

#[async_trait]
impl SourceAdapter for PdfSource {
    fn source_id(&self) -> &SourceId {
        &self.source_id
    }

    fn kind(&self) -> &'static str {
        "pdf"
    }

    async fn open(&mut self) -> Result<(), SourceError> {
        let files = self.store.list().await?;
        tracing::info!(
            source_id = %self.source_id,
            store = %self.store.describe(),
            documents = files.len(),
            "Listed PDF documents"
        );
        if let Some(cursor) = self.pending_resume.take() {
            self.apply_resume(&files, &cursor)?;
        }
        self.files = Some(files);
        Ok(())
    }

    async fn next(&mut self) -> Result<Option<RawChunk>, SourceError> {
        let files = match &self.files {
            Some(files) => files.clone(),
            None => return Err(SourceError::fatal("pdf source read before open")),
        };

        loop {
            let Some(file) = files.get(self.doc_index) else {
                return Ok(None);
            };
            if self.loaded.as_ref().map(|d| d.doc_index) != Some(self.doc_index) {
                self.load(file).await?;
            }
            let text = self
                .loaded
                .as_ref()
                .and_then(|d| d.pages.get(self.page as usize - 1))
                .cloned();

            match text {
                Some(text) => {
                    let start = self.cursor_at(self.doc_index, self.page);
                    self.page += 1;
                    let end = self.cursor_at(self.doc_index, self.page);
                    return Ok(Some(RawChunk::new(
                        self.source_id.clone(),
                        start,
                        end,
                        Bytes::from(text),
                    )));
                }
                None => {
                    self.doc_index += 1;
                    self.page = 1;
                    self.loaded = None;
                }
            }
        }
    }

    fn checkpoint(&self) -> SourceCursor {
        match (&self.files, &self.pending_resume) {
            (None, Some(cursor)) => cursor.clone(),
            _ => self.cursor_at(self.doc_index, self.page),
        }
    }

    fn resume(&mut self, cursor: SourceCursor) -> Result<(), SourceError> {
        if !matches!(cursor, SourceCursor::Start | SourceCursor::Document { .. }) {
            return Err(unsupported_cursor("pdf", &cursor));
        }
        match self.files.take() {
            Some(files) => {
                let result = self.apply_resume(&files, &cursor);
                self.files = Some(files);
                result
            }
            None => {
                self.pending_resume = Some(cursor);
                Ok(())
            }
        }
    }

    fn decode(&self, chunk: &RawChunk) -> Vec<ProvisionalRecord> {
        let text = String::from_utf8_lossy(&chunk.bytes);
        let (rows, skipped) = self.match_lines(&text);
        if skipped > 0 {
            tracing::debug!(
                source_id = %chunk.source_id,
                page = %chunk.start,
                matched = rows.len(),
                skipped,
                "Page lines not matching the line pattern skipped"
            );
        }
        let items: Vec<DecodedItem> = rows.into_iter().map(Ok).collect();
        build_records(chunk, items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::storage::LocalObjectStore;
    use tempfile::TempDir;

    const PATTERN: &str = r"^(?P<parcel>\d{3,})\s+(?P<x>[\d.]+)\s+(?P<y>[\d.]+)$";

    /// Pages separated by form feeds; content starting with BAD is corrupt
    fn fake_extractor() -> TextExtractor {
        Arc::new(|bytes: &[u8]| {
            let text = String::from_utf8_lossy(bytes);
            if text.starts_with("BAD") {
                return Err("not a PDF".to_string());
            }
            Ok(text.split('\x0c').map(str::to_string).collect())
        })
    }

    fn setup(files: &[(&str, &str)]) -> (TempDir, Arc<dyn ObjectStore>) {
        let dir = TempDir::new().unwrap();
        for (name, content) in files {
            std::fs::write(dir.path().join(name), content).unwrap();
        }
        let store = LocalObjectStore::with_root(dir.path(), "", Some(".pdf".to_string()));
        (dir, Arc::new(store))
    }

    fn source(store: Arc<dyn ObjectStore>) -> PdfSource {
        PdfSource::with_extractor(SourceId::new("reports").unwrap(), store, PATTERN, fake_extractor())
            .unwrap()
    }

    #[tokio::test]
    async fn test_page_per_chunk_and_named_captures() {
        let (_dir, store) = setup(&[
            ("a.pdf", "Parcel register\n101 512000.5 6200000.0\n102 512010 6200010\x0c103 1 2"),
            ("b.pdf", "201 5 6"),
            ("notes.txt", "999 1 1"),
        ]);
        let mut pdf = source(store);
        pdf.open().await.unwrap();

        let mut pages = Vec::new();
        while let Some(chunk) = pdf.next().await.unwrap() {
            pages.push((chunk.start.to_string(), pdf.decode(&chunk)));
        }

        let counts: Vec<usize> = pages.iter().map(|(_, r)| r.len()).collect();
        assert_eq!(counts, vec![2, 1, 1]);
        assert_eq!(pages[0].0, "doc:0:a.pdf:1");
        assert_eq!(pages[1].0, "doc:0:a.pdf:2");
        assert_eq!(pages[2].0, "doc:1:b.pdf:1");
        assert_eq!(pages[0].1[0].fields["parcel"], Value::String("101".to_string()));
        assert_eq!(pages[0].1[1].fields["x"], Value::String("512010".to_string()));
    }

    #[tokio::test]
    async fn test_resume_at_page() {
        let (_dir, store) = setup(&[("a.pdf", "101 1 1\x0c102 2 2\x0c103 3 3")]);
        let mut pdf = source(store);
        pdf.resume(SourceCursor::Document {
            doc_index: 0,
            path: "a.pdf".to_string(),
            page: 3,
        })
        .unwrap();
        pdf.open().await.unwrap();

        let chunk = pdf.next().await.unwrap().unwrap();
        assert_eq!(pdf.decode(&chunk)[0].fields["parcel"], Value::String("103".to_string()));
        assert!(pdf.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_document_is_fatal_and_position_kept() {
        let (_dir, store) = setup(&[("a.pdf", "BAD bytes")]);
        let mut pdf = source(store);
        pdf.open().await.unwrap();

        let err = pdf.next().await.unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(pdf.checkpoint().to_string(), "doc:0:a.pdf:1");
    }

    #[test]
    fn test_unmatched_lines_are_counted() {
        let (_dir, store) = setup(&[]);
        let pdf = source(store);

        let (rows, skipped) =
            pdf.match_lines("Parcel register\n\n101 512000.5 6200000.0\n  \nPage 1 of 3\n");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["parcel"], Value::String("101".to_string()));
        assert_eq!(skipped, 2);
    }

    #[test]
    fn test_lopdf_rejects_garbage() {
        assert!(extract_pages(b"definitely not a pdf").is_err());
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let (_dir, store) = setup(&[]);
        assert!(PdfSource::new(SourceId::new("r").unwrap(), store, "(?P<x").is_err());
    }
}
