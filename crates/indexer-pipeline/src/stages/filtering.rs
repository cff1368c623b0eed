//! Drops identifiers the filter authority says need no (re)indexing.
//!
//! A lookup failure fails the whole batch; identifiers are never dropped
//! silently because the authority could not be asked.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::trace;

use indexer_types::Identifier;

use crate::collaborators::IndexingFilter;
use crate::error::CollaboratorError;
use crate::performance::PipelinePerformance;
use crate::stage::{Stage, Task, TaskFactory};
use crate::status::PipelineStatus;

pub struct FilteringTaskFactory {
    filter: Arc<dyn IndexingFilter>,
    next: Stage<Vec<Identifier>>,
    status: Arc<PipelineStatus>,
    performance: Arc<PipelinePerformance>,
}

impl FilteringTaskFactory {
    pub fn new(
        filter: Arc<dyn IndexingFilter>,
        next: Stage<Vec<Identifier>>,
        status: Arc<PipelineStatus>,
        performance: Arc<PipelinePerformance>,
    ) -> Self {
        Self {
            filter,
            next,
            status,
            performance,
        }
    }
}

impl TaskFactory<Vec<Identifier>> for FilteringTaskFactory {
    fn create_task(&self, payload: Vec<Identifier>) -> Box<dyn Task> {
        Box::new(FilteringTask {
            batch: payload,
            filter: Arc::clone(&self.filter),
            next: self.next.clone(),
            status: Arc::clone(&self.status),
            performance: Arc::clone(&self.performance),
        })
    }

    fn item_count(&self, payload: &Vec<Identifier>) -> u64 {
        payload.len() as u64
    }
}

struct FilteringTask {
    batch: Vec<Identifier>,
    filter: Arc<dyn IndexingFilter>,
    next: Stage<Vec<Identifier>>,
    status: Arc<PipelineStatus>,
    performance: Arc<PipelinePerformance>,
}

#[async_trait]
impl Task for FilteringTask {
    async fn run(self: Box<Self>) -> Result<(), CollaboratorError> {
        let mut kept = Vec::with_capacity(self.batch.len());
        for &id in &self.batch {
            let required = self.filter.requires_indexing(id).await.map_err(|e| {
                CollaboratorError::new(
                    format!(
                        "filter lookup for id {} failed (batch of {} ids)",
                        id,
                        self.batch.len()
                    ),
                    e,
                )
            })?;
            if required {
                kept.push(id);
            }
        }

        let dropped = (self.batch.len() - kept.len()) as u64;
        if dropped > 0 {
            trace!(dropped, kept = kept.len(), "Filtered batch");
            self.performance.add("filtering.dropped", dropped);
            self.status.record_filtered(dropped);
        }
        if !kept.is_empty() {
            self.next.send(kept);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::test_support::{collector, pool, tracking, wait_idle};
    use indexer_types::IndexType;

    struct EvenOnly;

    #[async_trait]
    impl IndexingFilter for EvenOnly {
        async fn requires_indexing(&self, id: Identifier) -> Result<bool, CollaboratorError> {
            if id == 13 {
                return Err(CollaboratorError::msg("metadata store unavailable"));
            }
            Ok(id % 2 == 0)
        }
    }

    #[tokio::test]
    async fn test_filters_and_accounts() {
        let (status, performance) = tracking();
        let (next, received) = collector(&status, &performance);
        let filtering = Stage::new(
            "filtering",
            IndexType::Product,
            FilteringTaskFactory::new(
                Arc::new(EvenOnly),
                next.clone(),
                Arc::clone(&status),
                Arc::clone(&performance),
            ),
            &pool(),
            Arc::clone(&status),
            performance,
        )
        .unwrap();

        filtering.send(vec![1, 2, 3, 4]);
        // Nothing survives: no downstream send.
        filtering.send(vec![5, 7]);
        // Lookup failure fails the whole batch.
        filtering.send(vec![12, 13, 14]);
        wait_idle(&filtering, &next).await;

        assert_eq!(*received.lock().unwrap(), vec![vec![2, 4]]);
        let snapshot = status.snapshot();
        assert_eq!(snapshot.filtered, 4);
        assert_eq!(snapshot.failed, 3);
    }
}
