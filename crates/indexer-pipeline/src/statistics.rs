//! Registry of status and performance data for every index type.
//!
//! One instance is shared between the build service and whatever surfaces
//! the data (admin CLI, logs). Entries are created on first lookup and live
//! as long as the registry.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;

use indexer_types::{IndexBuildStatus, IndexType};

use crate::error::PipelineError;
use crate::performance::PipelinePerformance;
use crate::status::PipelineStatus;

#[derive(Debug, Default)]
pub struct IndexingStatistics {
    pipeline_statuses: DashMap<IndexType, Arc<PipelineStatus>>,
    performances: DashMap<IndexType, Arc<PipelinePerformance>>,
    build_statuses: DashMap<IndexType, IndexBuildStatus>,
}

impl IndexingStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Status for the index type, created on first use.
    pub fn pipeline_status(&self, index_type: IndexType) -> Arc<PipelineStatus> {
        Arc::clone(
            &self
                .pipeline_statuses
                .entry(index_type)
                .or_insert_with(|| Arc::new(PipelineStatus::new(index_type))),
        )
    }

    /// Performance data for the index type, created on first use.
    pub fn performance(&self, index_type: IndexType) -> Arc<PipelinePerformance> {
        Arc::clone(
            &self
                .performances
                .entry(index_type)
                .or_insert_with(|| Arc::new(PipelinePerformance::new(index_type))),
        )
    }

    /// Record the latest build status for an index type.
    pub fn attach_build_status(
        &self,
        index_type: IndexType,
        status: IndexBuildStatus,
    ) -> Result<(), PipelineError> {
        if status.index_type != index_type {
            return Err(PipelineError::IndexTypeMismatch {
                expected: index_type,
                actual: status.index_type,
            });
        }
        self.build_statuses.insert(index_type, status);
        Ok(())
    }

    pub fn build_status(&self, index_type: IndexType) -> Option<IndexBuildStatus> {
        self.build_statuses.get(&index_type).map(|s| s.clone())
    }

    /// Current build state of the named index, or `"?"` if the name is
    /// unknown or no build status has been attached yet.
    pub fn index_status(&self, index_name: &str) -> String {
        index_name
            .parse::<IndexType>()
            .ok()
            .and_then(|t| self.build_statuses.get(&t).map(|s| s.status.to_string()))
            .unwrap_or_else(|| "?".to_string())
    }

    /// Clear every pipeline status and performance record. Build statuses
    /// are durable state and are left alone.
    pub fn reset(&self) {
        for status in self.pipeline_statuses.iter() {
            status.reset();
        }
        for performance in self.performances.iter() {
            performance.reset();
        }
    }

    /// Items in and out per pipeline.
    pub fn pipeline_statuses_table(&self) -> String {
        let sorted: BTreeMap<_, _> = self
            .pipeline_statuses
            .iter()
            .map(|e| (*e.key(), e.value().snapshot()))
            .collect();

        let mut out = format!(
            "{:<20} {:>10} {:>10} {:>10} {:>10} {:>10} {:>10}\n",
            "IndexType", "Items In", "Items Out", "Filtered", "Missing", "Failed", "Rejected"
        );
        for (index_type, s) in sorted {
            out.push_str(&format!(
                "{:<20} {:>10} {:>10} {:>10} {:>10} {:>10} {:>10}\n",
                index_type.to_string(),
                s.incoming,
                s.completed,
                s.filtered,
                s.load_misses,
                s.failed,
                s.rejected
            ));
        }
        out
    }

    /// Distributions and counters for every pipeline.
    pub fn performance_table(&self) -> String {
        let sorted: BTreeMap<_, _> = self
            .performances
            .iter()
            .map(|e| (*e.key(), e.value().snapshot()))
            .collect();

        let mut out = String::new();
        for (index_type, snapshot) in sorted {
            out.push_str(&format!("Index: {index_type}\n"));
            out.push_str(&format!(
                "{:<30} {:>12} {:>12} {:>12}\n",
                "Key", "Min", "Mean", "Max"
            ));
            for (name, stat) in &snapshot.statistics {
                out.push_str(&format!(
                    "{:<30} {:>12} {:>12.2} {:>12}\n",
                    name, stat.min, stat.mean, stat.max
                ));
            }
            out.push_str(&format!("{:<30} {:>12}\n", "Counter", "Value"));
            for (name, value) in &snapshot.counters {
                out.push_str(&format!("{:<30} {:>12}\n", name, value));
            }
            out.push('\n');
        }
        out
    }

    /// One line per attached build status.
    pub fn build_statuses_table(&self) -> String {
        let sorted: BTreeMap<_, _> = self
            .build_statuses
            .iter()
            .map(|e| (*e.key(), e.value().to_string()))
            .collect();

        sorted.into_values().fold(String::new(), |mut out, line| {
            out.push_str(&line);
            out.push('\n');
            out
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexer_types::IndexStatus;

    #[test]
    fn test_entries_are_shared() {
        let stats = IndexingStatistics::new();
        let a = stats.pipeline_status(IndexType::Product);
        let b = stats.pipeline_status(IndexType::Product);
        assert!(Arc::ptr_eq(&a, &b));

        let p = stats.performance(IndexType::Product);
        p.increment("x");
        assert_eq!(stats.performance(IndexType::Product).counter("x"), 1);
    }

    #[test]
    fn test_index_status() {
        let stats = IndexingStatistics::new();
        assert_eq!(stats.index_status("product"), "?");
        assert_eq!(stats.index_status("no_such_index"), "?");

        let mut status = IndexBuildStatus::new(IndexType::Product);
        status.status = IndexStatus::UpdateInProgress;
        stats.attach_build_status(IndexType::Product, status).unwrap();

        assert_eq!(stats.index_status("product"), "UPDATE_IN_PROGRESS");
        assert_eq!(stats.index_status("PRODUCT"), "UPDATE_IN_PROGRESS");
    }

    #[test]
    fn test_attach_rejects_mismatched_type() {
        let stats = IndexingStatistics::new();
        let result =
            stats.attach_build_status(IndexType::Category, IndexBuildStatus::new(IndexType::Sku));
        assert!(matches!(
            result,
            Err(PipelineError::IndexTypeMismatch {
                expected: IndexType::Category,
                actual: IndexType::Sku
            })
        ));
        assert!(stats.build_status(IndexType::Category).is_none());
    }

    #[test]
    fn test_reset_keeps_build_statuses() {
        let stats = IndexingStatistics::new();
        let status = stats.pipeline_status(IndexType::Product);
        status.add_incoming(4);
        stats.performance(IndexType::Product).increment("x");
        stats
            .attach_build_status(IndexType::Product, IndexBuildStatus::new(IndexType::Product))
            .unwrap();

        stats.reset();

        assert_eq!(status.incoming(), 0);
        assert_eq!(stats.performance(IndexType::Product).counter("x"), 0);
        assert_eq!(stats.index_status("product"), "COMPLETE");
    }

    #[test]
    fn test_tables() {
        let stats = IndexingStatistics::new();
        let status = stats.pipeline_status(IndexType::Sku);
        status.add_incoming(5);
        status.record_completed(3);
        let perf = stats.performance(IndexType::Sku);
        perf.record("loading.batch_size", 2);
        perf.increment("grouping.batches");
        stats
            .attach_build_status(IndexType::Sku, IndexBuildStatus::new(IndexType::Sku))
            .unwrap();

        let table = stats.pipeline_statuses_table();
        let row = table.lines().nth(1).unwrap();
        assert!(row.starts_with("sku"));
        assert!(row.contains(" 5 "));
        assert!(row.contains(" 3 "));

        let table = stats.performance_table();
        assert!(table.starts_with("Index: sku\n"));
        assert!(table.contains("loading.batch_size"));
        assert!(table.contains("grouping.batches"));

        let table = stats.build_statuses_table();
        assert_eq!(table.lines().count(), 1);
        assert!(table.contains("status=COMPLETE"));
    }
}
