//! Schema normalization
//!
//! Pure and I/O free: a provisional record either maps onto the canonical
//! attribute schema or yields exactly one [`RecordRejection`](crate::domain::RecordRejection).

pub mod coerce;
pub mod mapping;

pub use mapping::{NormalizedRecord, SchemaNormalizer};
