//! Line-oriented files (NDJSON or CSV) read in byte ranges
//!
//! Shared by the SFTP and object storage sources. Files are taken from a
//! sorted listing and read in `chunk_bytes` ranges cut back to the last
//! newline, so every chunk holds whole lines. A line longer than
//! `chunk_bytes` makes the range grow until it fits.
//!
//! CSV files carry a header row. The header is kept per file and read
//! separately when a run resumes in the middle of a file.

use super::traits::{build_records, unsupported_cursor, DecodedItem, SourceAdapter};
use crate::adapters::storage::{ObjectInfo, ObjectStore};
use crate::config::LineFormat;
use crate::domain::{FieldMap, ProvisionalRecord, RawChunk, SourceCursor, SourceError, SourceId};
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Parsing options for line files
#[derive(Debug, Clone, Copy)]
pub struct LineOptions {
    pub format: LineFormat,
    pub csv_delimiter: u8,
    pub chunk_bytes: u64,
}

/// Current file and byte offset
#[derive(Debug, Clone, PartialEq, Eq)]
struct Position {
    file_index: usize,
    offset: u64,
}

pub struct LineFileSource {
    source_id: SourceId,
    kind: &'static str,
    store: Arc<dyn ObjectStore>,
    options: LineOptions,
    files: Option<Vec<ObjectInfo>>,
    position: Position,
    /// Cursor handed to `resume` before the listing was available
    pending_resume: Option<SourceCursor>,
    /// CSV header per file index
    headers: HashMap<usize, Vec<String>>,
}

impl LineFileSource {
    pub fn new(
        source_id: SourceId,
        kind: &'static str,
        store: Arc<dyn ObjectStore>,
        options: LineOptions,
    ) -> Self {
        Self {
            source_id,
            kind,
            store,
            options,
            files: None,
            position: Position {
                file_index: 0,
                offset: 0,
            },
            pending_resume: None,
            headers: HashMap::new(),
        }
    }

    /// Maps a stored cursor onto the current listing. If the file at
    /// `file_index` was renamed or removed, the file is looked up by path;
    /// a vanished file continues at the next path in sort order.
    fn resolve(&self, files: &[ObjectInfo], cursor: &SourceCursor) -> Result<Position, SourceError> {
        match cursor {
            SourceCursor::Start => Ok(Position {
                file_index: 0,
                offset: 0,
            }),
            SourceCursor::File {
                file_index,
                path,
                offset,
            } => {
                if files.get(*file_index).map(|f| &f.path) == Some(path) {
                    return Ok(Position {
                        file_index: *file_index,
                        offset: *offset,
                    });
                }
                if let Some(index) = files.iter().position(|f| &f.path == path) {
                    return Ok(Position {
                        file_index: index,
                        offset: *offset,
                    });
                }
                let next = files.iter().position(|f| f.path.as_str() > path.as_str());
                tracing::warn!(
                    source_id = %self.source_id,
                    path = %path,
                    "Checkpointed file is no longer listed, continuing with the next file"
                );
                Ok(Position {
                    file_index: next.unwrap_or(files.len()),
                    offset: 0,
                })
            }
            other => Err(unsupported_cursor(self.kind, other)),
        }
    }

    fn cursor_at(&self, position: &Position) -> SourceCursor {
        let path = self
            .files
            .as_ref()
            .and_then(|files| files.get(position.file_index))
            .map(|f| f.path.clone());
        match path {
            Some(path) => SourceCursor::File {
                file_index: position.file_index,
                path,
                offset: position.offset,
            },
            None if position.file_index == 0 && position.offset == 0 => SourceCursor::Start,
            None => SourceCursor::File {
                file_index: position.file_index,
                path: String::new(),
                offset: 0,
            },
        }
    }

    /// Reads whole lines starting at `offset`. Returns the bytes and
    /// whether the end of the file was reached.
    async fn read_lines(&self, file: &ObjectInfo, offset: u64) -> Result<(Bytes, bool), SourceError> {
        let mut want = self.options.chunk_bytes.max(1);
        loop {
            let bytes = self.store.read(&file.path, offset, want).await?;
            let reached_end = (bytes.len() as u64) < want || offset + want >= file.size;
            if reached_end {
                return Ok((bytes, true));
            }
            if let Some(last_newline) = bytes.iter().rposition(|b| *b == b'\n') {
                return Ok((bytes.slice(..=last_newline), false));
            }
            want = want.saturating_mul(2);
        }
    }

    async fn ensure_header(&mut self, file_index: usize, file: &ObjectInfo) -> Result<(), SourceError> {
        if self.options.format != LineFormat::Csv || self.headers.contains_key(&file_index) {
            return Ok(());
        }
        let (bytes, _) = self.read_lines(file, 0).await?;
        let first = bytes.split(|b| *b == b'\n').next().unwrap_or_default();
        let header = parse_csv_row(first, self.options.csv_delimiter)
            .map_err(|e| SourceError::fatal(format!("Unreadable CSV header in {}: {e}", file.path)))?;
        self.headers.insert(file_index, header);
        Ok(())
    }
}

#[async_trait]
impl SourceAdapter for LineFileSource {
    fn source_id(&self) -> &SourceId {
        &self.source_id
    }

    fn kind(&self) -> &'static str {
        self.kind
    }

    async fn open(&mut self) -> Result<(), SourceError> {
        let files = self.store.list().await?;
        tracing::info!(
            source_id = %self.source_id,
            location = %self.store.describe(),
            files = files.len(),
            "Listed source files"
        );
        if let Some(cursor) = self.pending_resume.take() {
            self.position = self.resolve(&files, &cursor)?;
        }
        self.files = Some(files);
        Ok(())
    }

    async fn next(&mut self) -> Result<Option<RawChunk>, SourceError> {
        let Some(files) = self.files.clone() else {
            return Err(SourceError::fatal("next() called before open()"));
        };

        loop {
            let Position { file_index, offset } = self.position.clone();
            let Some(file) = files.get(file_index) else {
                return Ok(None);
            };
            if offset >= file.size {
                self.position = Position {
                    file_index: file_index + 1,
                    offset: 0,
                };
                continue;
            }

            self.ensure_header(file_index, file).await?;
            let (bytes, reached_end) = self.read_lines(file, offset).await?;
            if bytes.is_empty() {
                // file shrank since the listing
                self.position = Position {
                    file_index: file_index + 1,
                    offset: 0,
                };
                continue;
            }

            let start = self.cursor_at(&self.position);
            let end_offset = if reached_end {
                file.size.max(offset + bytes.len() as u64)
            } else {
                offset + bytes.len() as u64
            };
            self.position = Position {
                file_index,
                offset: end_offset,
            };
            let end = self.cursor_at(&self.position);

            tracing::debug!(
                source_id = %self.source_id,
                path = %file.path,
                offset,
                bytes = bytes.len(),
                "Read file range"
            );
            return Ok(Some(RawChunk::new(self.source_id.clone(), start, end, bytes)));
        }
    }

    fn checkpoint(&self) -> SourceCursor {
        self.cursor_at(&self.position)
    }

    fn resume(&mut self, cursor: SourceCursor) -> Result<(), SourceError> {
        match &self.files {
            Some(files) => {
                self.position = self.resolve(files, &cursor)?;
            }
            None => {
                if !matches!(cursor, SourceCursor::Start | SourceCursor::File { .. }) {
                    return Err(unsupported_cursor(self.kind, &cursor));
                }
                self.pending_resume = Some(cursor);
            }
        }
        Ok(())
    }

    fn decode(&self, chunk: &RawChunk) -> Vec<ProvisionalRecord> {
        let (file_index, offset) = match &chunk.start {
            SourceCursor::File {
                file_index, offset, ..
            } => (*file_index, *offset),
            _ => (0, 0),
        };
        let items = match self.options.format {
            LineFormat::Ndjson => decode_ndjson(&chunk.bytes),
            LineFormat::Csv => {
                let header = self.headers.get(&file_index).map(Vec::as_slice).unwrap_or(&[]);
                decode_csv(&chunk.bytes, header, offset == 0, self.options.csv_delimiter)
            }
        };
        build_records(chunk, items)
    }
}

fn lines(bytes: &[u8]) -> impl Iterator<Item = &[u8]> {
    bytes
        .split(|b| *b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
        .filter(|line| !line.iter().all(u8::is_ascii_whitespace))
}

/// One JSON object per non-blank line
pub(crate) fn decode_ndjson(bytes: &[u8]) -> Vec<DecodedItem> {
    lines(bytes)
        .map(|line| match serde_json::from_slice::<Value>(line) {
            Ok(Value::Object(map)) => Ok(map.into_iter().collect()),
            Ok(other) => Err(format!("expected a JSON object, got {}", json_kind(&other))),
            Err(e) => Err(format!("invalid JSON: {e}")),
        })
        .collect()
}

/// Data rows of a CSV chunk. When the chunk starts the file its first line
/// is the header and is skipped.
pub(crate) fn decode_csv(bytes: &[u8], header: &[String], skip_header: bool, delimiter: u8) -> Vec<DecodedItem> {
    lines(bytes)
        .skip(usize::from(skip_header))
        .map(|line| {
            let row = parse_csv_row(line, delimiter).map_err(|e| format!("invalid CSV row: {e}"))?;
            if row.len() != header.len() {
                return Err(format!(
                    "expected {} columns, got {}",
                    header.len(),
                    row.len()
                ));
            }
            Ok(header
                .iter()
                .cloned()
                .zip(row.into_iter().map(Value::String))
                .collect::<FieldMap>())
        })
        .collect()
}

fn parse_csv_row(line: &[u8], delimiter: u8) -> Result<Vec<String>, String> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(line);
    match reader.records().next() {
        Some(Ok(record)) => Ok(record.iter().map(|f| f.trim().to_string()).collect()),
        Some(Err(e)) => Err(e.to_string()),
        None => Ok(Vec::new()),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
