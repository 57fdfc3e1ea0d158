//! External system integrations
//!
//! - [`sources`] - source adapters (SOAP, SFTP, streaming JSON, PDF, object storage)
//! - [`storage`] - object store access (GCS, local directory)
//! - [`database`] - warehouse, checkpoint and failure storage traits and backends
//! - [`postgresql`] - PostgreSQL implementation of the storage traits

pub(crate) mod http;

pub mod database;
pub mod postgresql;
pub mod sources;
pub mod storage;
