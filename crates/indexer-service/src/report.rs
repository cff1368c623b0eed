//! Outcome of one build run.

use chrono::{DateTime, Utc};
use serde::Serialize;

use indexer_pipeline::PipelineStatusSnapshot;
use indexer_types::IndexType;

/// Whether a run covered every identifier or only recent changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildMode {
    Rebuild,
    Update,
}

/// Why a run became a full rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RebuildReason {
    /// No successful build on record
    NeverBuilt,
    /// The previous rebuild never reached `COMPLETE`
    Interrupted,
    /// The configured rebuild policy asked for it
    Policy,
    /// A rebuild notification was pending
    Notification,
}

/// Whether every item reached the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildOutcome {
    /// Everything indexed, deleted and committed; `last_build_date` advanced
    Complete,
    /// Some work was lost; the next run picks it up again
    Incomplete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildReport {
    pub index_type: IndexType,
    pub mode: BuildMode,
    pub rebuild_reason: Option<RebuildReason>,
    pub outcome: BuildOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub incoming: u64,
    pub completed: u64,
    pub filtered: u64,
    pub load_misses: u64,
    pub failed: u64,
    pub rejected: u64,
    /// Documents removed from the index
    pub deleted: u64,
    /// Removals the sink refused
    pub delete_failures: u64,
    /// Whether the final sink commit succeeded
    pub committed: bool,
}

impl BuildReport {
    pub(crate) fn new(
        index_type: IndexType,
        mode: BuildMode,
        rebuild_reason: Option<RebuildReason>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            index_type,
            mode,
            rebuild_reason,
            outcome: BuildOutcome::Incomplete,
            started_at,
            finished_at: started_at,
            incoming: 0,
            completed: 0,
            filtered: 0,
            load_misses: 0,
            failed: 0,
            rejected: 0,
            deleted: 0,
            delete_failures: 0,
            committed: false,
        }
    }

    pub(crate) fn absorb(&mut self, status: &PipelineStatusSnapshot) {
        self.incoming = status.incoming;
        self.completed = status.completed;
        self.filtered = status.filtered;
        self.load_misses = status.load_misses;
        self.failed = status.failed;
        self.rejected = status.rejected;
    }

    /// Outcome implied by the counters.
    pub(crate) fn judge(&self) -> BuildOutcome {
        if self.failed == 0 && self.rejected == 0 && self.delete_failures == 0 && self.committed {
            BuildOutcome::Complete
        } else {
            BuildOutcome::Incomplete
        }
    }

    pub fn is_complete(&self) -> bool {
        self.outcome == BuildOutcome::Complete
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

impl std::fmt::Display for BuildReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {:?} {:?}: in={} done={} filtered={} missing={} failed={} rejected={} deleted={} ({} ms)",
            self.index_type,
            self.mode,
            self.outcome,
            self.incoming,
            self.completed,
            self.filtered,
            self.load_misses,
            self.failed,
            self.rejected,
            self.deleted,
            self.duration().num_milliseconds()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_judge() {
        let mut report = BuildReport::new(IndexType::Product, BuildMode::Update, None, Utc::now());
        assert_eq!(report.judge(), BuildOutcome::Incomplete);

        report.committed = true;
        assert_eq!(report.judge(), BuildOutcome::Complete);

        report.absorb(&PipelineStatusSnapshot {
            incoming: 4,
            completed: 3,
            rejected: 1,
            ..Default::default()
        });
        assert_eq!(report.judge(), BuildOutcome::Incomplete);
    }

    #[test]
    fn test_serialize() {
        let report = BuildReport::new(
            IndexType::Category,
            BuildMode::Rebuild,
            Some(RebuildReason::NeverBuilt),
            Utc::now(),
        );
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"mode\":\"rebuild\""));
        assert!(json.contains("\"rebuild_reason\":\"never_built\""));
        assert!(json.contains("\"outcome\":\"incomplete\""));
    }
}
