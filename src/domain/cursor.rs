//! Source cursors
//!
//! A cursor is an adapter's logical position in its source. The coordinator
//! treats it as opaque: it only stores cursors in checkpoints and hands them
//! back to `resume`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical position within a source
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceCursor {
    /// Nothing consumed yet
    #[default]
    Start,

    /// Record offset in a paged service
    Page { offset: u64 },

    /// Byte offset into the `file_index`-th file of a sorted listing
    File {
        file_index: usize,
        path: String,
        offset: u64,
    },

    /// Number of elements already emitted from a streamed body
    Stream { records: u64 },

    /// Next page (1-based) of the `doc_index`-th document of a sorted listing
    Document {
        doc_index: usize,
        path: String,
        page: u32,
    },
}

impl SourceCursor {
    /// Returns true if this is the initial position
    pub fn is_start(&self) -> bool {
        matches!(self, Self::Start)
    }
}

impl fmt::Display for SourceCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::Page { offset } => write!(f, "page:{}", offset),
            Self::File {
                file_index,
                path,
                offset,
            } => write!(f, "file:{}:{}:{}", file_index, path, offset),
            Self::Stream { records } => write!(f, "stream:{}", records),
            Self::Document {
                doc_index,
                path,
                page,
            } => write!(f, "doc:{}:{}:{}", doc_index, path, page),
        }
    }
}
