//! Source adapters
//!
//! One adapter per protocol, all behind [`SourceAdapter`]. Adapters are
//! created with [`create_source_adapter`]; the pipeline wraps each one in
//! [`RetryingSource`] so transient failures are retried with backoff.

pub mod factory;
pub mod json_stream;
pub mod lines;
pub mod object_storage;
pub mod pdf;
pub mod retrying;
pub mod sftp;
pub mod soap;
pub mod traits;

pub use factory::create_source_adapter;
pub use retrying::RetryingSource;
pub use traits::SourceAdapter;
