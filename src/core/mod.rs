//! Core pipeline logic
//!
//! - [`normalize`] - declarative schema mapping onto the canonical model
//! - [`geometry`] - geometry parsing, validation and reprojection
//! - [`batch`] - batch assembly with size and age bounds
//! - [`sink`] - warehouse commits with retry
//! - [`staging`] - copies of raw chunks in object storage
//! - [`failures`] - failure records for rejected records
//! - [`state`] - per-source checkpoints
//! - [`pipeline`] - per-source pipelines and the run coordinator
//! - [`retry`] - exponential backoff shared by sources and the sink
//!
//! # Example
//!
//! ```rust,no_run
//! use strata::adapters::database::create_backends;
//! use strata::config::load_config;
//! use strata::core::pipeline::Coordinator;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config("strata.toml")?;
//! let backends = create_backends(&config).await?;
//! let coordinator = Coordinator::new(config.pipeline.clone(), backends);
//!
//! let handle = coordinator.start_run(config.selected_sources(&[]))?;
//! let summary = handle.wait().await;
//!
//! println!("Committed: {}", summary.total_committed());
//! println!("Rejected: {}", summary.total_failed_records());
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod failures;
pub mod geometry;
pub mod normalize;
pub mod pipeline;
pub mod retry;
pub mod sink;
pub mod staging;
pub mod state;
