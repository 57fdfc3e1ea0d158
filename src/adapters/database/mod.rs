//! Storage abstraction layer
//!
//! Traits for the warehouse, the checkpoint store and the failure sink,
//! with in-memory, file and PostgreSQL implementations selected by
//! [`create_backends`].

pub mod factory;
pub mod file;
pub mod memory;
pub mod traits;

pub use factory::{create_backends, Backends};
pub use traits::{CheckpointStorage, CommitResult, FailureStorage, WarehouseClient};
