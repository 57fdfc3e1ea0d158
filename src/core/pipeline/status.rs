//! Run status registry
//!
//! Every source pipeline writes its own entry; `status()` callers read a
//! snapshot. Entries hold the current state, counters, the last error and
//! a bounded history of state transitions.

use crate::domain::{SourceCursor, SourceId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use uuid::Uuid;

const MAX_HISTORY: usize = 256;

/// Per-source pipeline state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceState {
    Idle,
    Fetching,
    Normalizing,
    Reprojecting,
    Batching,
    Committing,
    Checkpointing,
    Draining,
    Terminated,
    Failed,
}

impl SourceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Fetching => "fetching",
            Self::Normalizing => "normalizing",
            Self::Reprojecting => "reprojecting",
            Self::Batching => "batching",
            Self::Committing => "committing",
            Self::Checkpointing => "checkpointing",
            Self::Draining => "draining",
            Self::Terminated => "terminated",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminated | Self::Failed)
    }
}

impl fmt::Display for SourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateTransition {
    pub state: SourceState,
    pub at: DateTime<Utc>,
}

/// Status of one source in a run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceStatus {
    pub source_id: SourceId,
    pub kind: String,
    pub state: SourceState,
    pub records_fetched: u64,
    pub records_committed: u64,
    pub records_failed: u64,
    pub batches_committed: u64,
    pub last_committed_sequence: Option<u64>,
    pub cursor: SourceCursor,
    pub last_error: Option<String>,
    pub history: Vec<StateTransition>,
    pub updated_at: DateTime<Utc>,
}

impl SourceStatus {
    fn new(source_id: SourceId, kind: &str) -> Self {
        let now = Utc::now();
        Self {
            source_id,
            kind: kind.to_string(),
            state: SourceState::Idle,
            records_fetched: 0,
            records_committed: 0,
            records_failed: 0,
            batches_committed: 0,
            last_committed_sequence: None,
            cursor: SourceCursor::Start,
            last_error: None,
            history: vec![StateTransition {
                state: SourceState::Idle,
                at: now,
            }],
            updated_at: now,
        }
    }
}

/// Snapshot of a run
#[derive(Debug, Clone, Serialize)]
pub struct RunStatus {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub sources: Vec<SourceStatus>,
}

impl RunStatus {
    /// True once every source is terminated or failed
    pub fn is_finished(&self) -> bool {
        self.sources.iter().all(|s| s.state.is_terminal())
    }

    pub fn source(&self, source_id: &str) -> Option<&SourceStatus> {
        self.sources.iter().find(|s| s.source_id.as_str() == source_id)
    }
}

/// Shared status of all sources of a run
#[derive(Debug, Clone, Default)]
pub struct StatusRegistry {
    inner: Arc<RwLock<BTreeMap<String, SourceStatus>>>,
}

impl StatusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, source_id: &SourceId, kind: &str) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(source_id.to_string(), SourceStatus::new(source_id.clone(), kind));
    }

    /// Moves a source to `state`; repeated states are not added to the history
    pub fn transition(&self, source_id: &SourceId, state: SourceState) {
        self.update(source_id, |status| {
            if status.state == state {
                return;
            }
            status.state = state;
            if status.history.len() >= MAX_HISTORY {
                status.history.remove(0);
            }
            status.history.push(StateTransition {
                state,
                at: Utc::now(),
            });
        });
    }

    pub fn update(&self, source_id: &SourceId, f: impl FnOnce(&mut SourceStatus)) {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(status) = guard.get_mut(source_id.as_str()) {
            f(status);
            status.updated_at = Utc::now();
        }
    }

    pub fn get(&self, source_id: &SourceId) -> Option<SourceStatus> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(source_id.as_str())
            .cloned()
    }

    /// All sources ordered by id
    pub fn snapshot(&self) -> Vec<SourceStatus> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions_recorded_once() {
        let registry = StatusRegistry::new();
        let id = SourceId::new("chr").unwrap();
        registry.register(&id, "soap");

        registry.transition(&id, SourceState::Fetching);
        registry.transition(&id, SourceState::Fetching);
        registry.transition(&id, SourceState::Normalizing);
        registry.update(&id, |s| s.records_fetched += 10);

        let status = registry.get(&id).unwrap();
        let states: Vec<SourceState> = status.history.iter().map(|t| t.state).collect();
        assert_eq!(
            states,
            vec![SourceState::Idle, SourceState::Fetching, SourceState::Normalizing]
        );
        assert_eq!(status.records_fetched, 10);
    }

    #[test]
    fn test_history_is_bounded() {
        let registry = StatusRegistry::new();
        let id = SourceId::new("chr").unwrap();
        registry.register(&id, "soap");
        for _ in 0..MAX_HISTORY {
            registry.transition(&id, SourceState::Fetching);
            registry.transition(&id, SourceState::Committing);
        }
        assert_eq!(registry.get(&id).unwrap().history.len(), MAX_HISTORY);
    }

    #[test]
    fn test_run_finished_when_all_terminal() {
        let registry = StatusRegistry::new();
        let a = SourceId::new("a").unwrap();
        let b = SourceId::new("b").unwrap();
        registry.register(&a, "soap");
        registry.register(&b, "pdf");
        registry.transition(&a, SourceState::Terminated);

        let mut run = RunStatus {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            sources: registry.snapshot(),
        };
        assert!(!run.is_finished());

        registry.transition(&b, SourceState::Failed);
        run.sources = registry.snapshot();
        assert!(run.is_finished());
        assert_eq!(run.source("b").unwrap().state, SourceState::Failed);
    }
}
