//! The source adapter capability
//!
//! Every protocol implements [`SourceAdapter`]. An adapter is pulled chunk
//! by chunk with `next()` and never advances its position unless `next()`
//! succeeded, so a failed call can simply be repeated.

use crate::domain::{
    FieldMap, Provenance, ProvisionalRecord, RawChunk, SourceCursor, SourceError, SourceId,
};
use async_trait::async_trait;

#[async_trait]
pub trait SourceAdapter: Send {
    fn source_id(&self) -> &SourceId;

    /// Protocol name for logs ("soap", "sftp", ...)
    fn kind(&self) -> &'static str;

    /// Connect and, for directory-like sources, take the listing
    async fn open(&mut self) -> Result<(), SourceError>;

    /// Next chunk, or `None` at the end of the source
    async fn next(&mut self) -> Result<Option<RawChunk>, SourceError>;

    /// Position after the last chunk returned by `next()`
    fn checkpoint(&self) -> SourceCursor;

    /// Continue from a position previously returned by `checkpoint()` or
    /// stored as a chunk's start cursor
    fn resume(&mut self, cursor: SourceCursor) -> Result<(), SourceError>;

    /// Splits a chunk produced by this adapter into provisional records.
    /// Records that cannot be decoded carry a `decode_error`.
    fn decode(&self, chunk: &RawChunk) -> Vec<ProvisionalRecord>;

    /// Release connections
    async fn close(&mut self) {}
}

/// Decoded record content: fields, or the reason decoding failed
pub(crate) type DecodedItem = std::result::Result<FieldMap, String>;

/// Attaches provenance to the items decoded from `chunk`, in order
pub(crate) fn build_records(chunk: &RawChunk, items: Vec<DecodedItem>) -> Vec<ProvisionalRecord> {
    let chunk_records = items.len() as u64;
    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            let provenance = Provenance {
                source_id: chunk.source_id.clone(),
                chunk_start: chunk.start.clone(),
                chunk_end: chunk.end.clone(),
                index: index as u64,
                chunk_records,
            };
            match item {
                Ok(fields) => ProvisionalRecord {
                    fields,
                    provenance,
                    decode_error: None,
                },
                Err(error) => ProvisionalRecord {
                    fields: FieldMap::new(),
                    provenance,
                    decode_error: Some(error),
                },
            }
        })
        .collect()
}

/// Error for a cursor of the wrong kind handed to `resume`
pub(crate) fn unsupported_cursor(kind: &str, cursor: &SourceCursor) -> SourceError {
    SourceError::fatal(format!("{kind} source cannot resume from cursor '{cursor}'"))
}
