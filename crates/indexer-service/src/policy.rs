//! Extra conditions that force a full rebuild.
//!
//! Independent of these, a rebuild always happens when the index was never
//! built, when the last rebuild was interrupted, or when a rebuild
//! notification is pending.

use chrono::{Duration, Utc};

use indexer_types::IndexBuildStatus;

pub trait RebuildPolicy: Send + Sync {
    fn rebuild_required(&self, status: &IndexBuildStatus) -> bool;
}

/// Only the built-in conditions apply.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverRebuild;

impl RebuildPolicy for NeverRebuild {
    fn rebuild_required(&self, _status: &IndexBuildStatus) -> bool {
        false
    }
}

/// Rebuild once the last successful build is older than `max_age`.
#[derive(Debug, Clone, Copy)]
pub struct MaxAgeRebuildPolicy {
    max_age: Duration,
}

impl MaxAgeRebuildPolicy {
    pub fn new(max_age: Duration) -> Self {
        Self { max_age }
    }
}

impl RebuildPolicy for MaxAgeRebuildPolicy {
    fn rebuild_required(&self, status: &IndexBuildStatus) -> bool {
        status
            .last_build_date
            .map(|last| Utc::now() - last > self.max_age)
            .unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexer_types::IndexType;

    #[test]
    fn test_never_rebuild() {
        let status = IndexBuildStatus::new(IndexType::Product);
        assert!(!NeverRebuild.rebuild_required(&status));
    }

    #[test]
    fn test_max_age() {
        let policy = MaxAgeRebuildPolicy::new(Duration::hours(24));
        let mut status = IndexBuildStatus::new(IndexType::Product);
        assert!(policy.rebuild_required(&status));

        status.last_build_date = Some(Utc::now() - Duration::hours(1));
        assert!(!policy.rebuild_required(&status));

        status.last_build_date = Some(Utc::now() - Duration::hours(25));
        assert!(policy.rebuild_required(&status));
    }
}
