//! Checkpoint tracking

pub mod checkpoint;
pub mod manager;

pub use checkpoint::{Checkpoint, CheckpointBuilder, CheckpointStatus, ResumePosition};
pub use manager::CheckpointManager;
