// Strata - Multi-source geospatial ingestion pipeline
// Copyright (c) 2025 Strata Contributors
// Licensed under the MIT License

//! # Strata - multi-source geospatial ingestion
//!
//! Strata pulls records from heterogeneous government and agency sources
//! (SOAP services, SFTP drops, streamed JSON, PDF reports and object
//! storage), normalizes them against a per-source schema, reprojects every
//! geometry into one target CRS and writes bounded, idempotent batches to a
//! warehouse. Progress is checkpointed per source so an interrupted run
//! resumes without committing a record twice.
//!
//! ## Architecture
//!
//! - [`cli`] - Command-line interface and argument parsing
//! - [`core`] - Pipeline stages, coordinator, checkpoints and retry
//! - [`adapters`] - Source adapters, object stores and storage backends
//! - [`domain`] - Records, cursors, geometry model and error types
//! - [`config`] - Configuration management
//! - [`logging`] - Structured logging
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use strata::adapters::database::create_backends;
//! use strata::config::load_config;
//! use strata::core::pipeline::Coordinator;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = load_config("strata.toml")?;
//!     let backends = create_backends(&config).await?;
//!
//!     let coordinator = Coordinator::new(config.pipeline.clone(), backends);
//!     let handle = coordinator.start_run(config.selected_sources(&[]))?;
//!     let summary = handle.wait().await;
//!
//!     println!("Committed {} records", summary.total_committed());
//!     Ok(())
//! }
//! ```
//!
//! ## Error Handling
//!
//! Library code returns [`domain::Result`], an alias over
//! [`domain::StrataError`]. Adapter and warehouse failures carry their own
//! transient/fatal classification ([`domain::SourceError`],
//! [`domain::SinkError`]); rejected records are data, not errors, and go
//! to the failure store.
//!
//! ```rust,no_run
//! use strata::domain::StrataError;
//!
//! fn example() -> Result<(), StrataError> {
//!     let config = strata::config::load_config("strata.toml")?;
//!     assert!(!config.sources.is_empty());
//!     Ok(())
//! }
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod logging;
