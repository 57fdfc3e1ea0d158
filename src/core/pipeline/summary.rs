//! Run summary and reporting

use crate::domain::SourceId;
use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

/// How a source's run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceOutcome {
    /// End of stream reached and drained
    Completed,
    /// Stopped by a stop signal
    Interrupted,
    /// Fatal adapter, sink or state error
    Failed,
}

/// Result of one source in a run
#[derive(Debug, Clone, Serialize)]
pub struct SourceSummary {
    pub source_id: SourceId,
    pub outcome: SourceOutcome,

    /// Records fetched and decoded in this run
    pub records_fetched: u64,

    /// Records committed in this run
    pub records_committed: u64,

    /// New failure records in this run
    pub records_failed: u64,

    pub batches_committed: u64,
    pub last_committed_sequence: Option<u64>,
    pub duration: Duration,
    pub error: Option<String>,
}

impl SourceSummary {
    pub fn new(source_id: SourceId) -> Self {
        Self {
            source_id,
            outcome: SourceOutcome::Completed,
            records_fetched: 0,
            records_committed: 0,
            records_failed: 0,
            batches_committed: 0,
            last_committed_sequence: None,
            duration: Duration::ZERO,
            error: None,
        }
    }
}

/// Summary of a run over all sources
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub sources: Vec<SourceSummary>,
    pub duration: Duration,
}

impl RunSummary {
    pub fn total_committed(&self) -> u64 {
        self.sources.iter().map(|s| s.records_committed).sum()
    }

    pub fn total_failed_records(&self) -> u64 {
        self.sources.iter().map(|s| s.records_failed).sum()
    }

    pub fn failed_sources(&self) -> impl Iterator<Item = &SourceSummary> {
        self.sources
            .iter()
            .filter(|s| s.outcome == SourceOutcome::Failed)
    }

    /// True if any source was stopped before its end of stream
    pub fn was_interrupted(&self) -> bool {
        self.sources
            .iter()
            .any(|s| s.outcome == SourceOutcome::Interrupted)
    }

    /// True if no source failed. Rejected records do not count as failure.
    pub fn is_successful(&self) -> bool {
        self.failed_sources().next().is_none()
    }

    /// Share of fetched records that were committed, in percent
    pub fn commit_rate(&self) -> f64 {
        let fetched: u64 = self.sources.iter().map(|s| s.records_fetched).sum();
        if fetched == 0 {
            return 100.0;
        }
        (self.total_committed() as f64 / fetched as f64) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(id: &str, outcome: SourceOutcome, fetched: u64, committed: u64) -> SourceSummary {
        SourceSummary {
            outcome,
            records_fetched: fetched,
            records_committed: committed,
            ..SourceSummary::new(SourceId::new(id).unwrap())
        }
    }

    #[test]
    fn test_totals_and_success() {
        let summary = RunSummary {
            run_id: Uuid::new_v4(),
            sources: vec![
                source("a", SourceOutcome::Completed, 100, 99),
                source("b", SourceOutcome::Failed, 100, 1),
            ],
            duration: Duration::from_secs(3),
        };
        assert_eq!(summary.total_committed(), 100);
        assert!(!summary.is_successful());
        assert_eq!(summary.failed_sources().count(), 1);
        assert!((summary.commit_rate() - 50.0).abs() < 1e-9);
        assert!(!summary.was_interrupted());
    }

    #[test]
    fn test_empty_run_is_successful() {
        let summary = RunSummary {
            run_id: Uuid::new_v4(),
            sources: Vec::new(),
            duration: Duration::ZERO,
        };
        assert!(summary.is_successful());
        assert_eq!(summary.commit_rate(), 100.0);
    }
}
