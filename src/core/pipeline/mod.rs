//! Pipeline orchestration
//!
//! - [`coordinator`] - starts runs, one task per source
//! - [`source_pipeline`] - fetch and processing tasks of a single source
//! - [`status`] - per-source state machine and the run status registry
//! - [`summary`] - run results

pub mod coordinator;
pub(crate) mod source_pipeline;
pub mod status;
pub mod summary;

pub use coordinator::{Coordinator, RunHandle};
pub use status::{RunStatus, SourceState, SourceStatus, StateTransition, StatusRegistry};
pub use summary::{RunSummary, SourceOutcome, SourceSummary};
