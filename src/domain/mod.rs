//! Domain models and types for Strata.
//!
//! # Overview
//!
//! The domain layer provides:
//! - **Strongly-typed identifiers** ([`SourceId`], [`RecordId`])
//! - **Source positions** ([`SourceCursor`])
//! - **Records** ([`RawChunk`], [`ProvisionalRecord`], [`CanonicalRecord`])
//! - **Geometry model** ([`Geometry`], [`Coord`])
//! - **Rejections** ([`RecordRejection`], [`FailureRecord`])
//! - **Error types** ([`StrataError`], [`SourceError`], [`SinkError`])
//! - **Result type alias** ([`Result`])
//!
//! # Error Handling
//!
//! ```rust
//! use strata::domain::{Result, SourceId, StrataError};
//!
//! fn parse_id(raw: &str) -> Result<SourceId> {
//!     SourceId::new(raw).map_err(StrataError::Validation)
//! }
//!
//! assert!(parse_id("chr_herds").is_ok());
//! assert!(parse_id("").is_err());
//! ```

pub mod cursor;
pub mod errors;
pub mod failure;
pub mod geometry;
pub mod ids;
pub mod record;
pub mod result;

pub use cursor::SourceCursor;
pub use errors::{SinkError, SourceError, StrataError};
pub use failure::{FailureRecord, FailureStage, RecordRejection, RejectionReason};
pub use geometry::{Coord, Geometry};
pub use ids::{RecordId, SourceId};
pub use record::{CanonicalRecord, FieldMap, FieldValue, Provenance, ProvisionalRecord, RawChunk};
pub use result::Result;
