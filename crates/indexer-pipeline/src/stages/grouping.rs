//! Splits an identifier collection into fixed-size batches.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use indexer_types::Identifier;

use crate::error::CollaboratorError;
use crate::performance::PipelinePerformance;
use crate::stage::{Stage, Task, TaskFactory};

pub struct GroupingTaskFactory {
    batch_size: usize,
    next: Stage<Vec<Identifier>>,
    performance: Arc<PipelinePerformance>,
}

impl GroupingTaskFactory {
    /// `batch_size` must be non-zero; pipeline settings validation enforces it.
    pub fn new(
        batch_size: usize,
        next: Stage<Vec<Identifier>>,
        performance: Arc<PipelinePerformance>,
    ) -> Self {
        Self {
            batch_size: batch_size.max(1),
            next,
            performance,
        }
    }
}

impl TaskFactory<Vec<Identifier>> for GroupingTaskFactory {
    fn create_task(&self, payload: Vec<Identifier>) -> Box<dyn Task> {
        Box::new(GroupingTask {
            ids: payload,
            batch_size: self.batch_size,
            next: self.next.clone(),
            performance: Arc::clone(&self.performance),
        })
    }

    fn item_count(&self, payload: &Vec<Identifier>) -> u64 {
        payload.len() as u64
    }
}

struct GroupingTask {
    ids: Vec<Identifier>,
    batch_size: usize,
    next: Stage<Vec<Identifier>>,
    performance: Arc<PipelinePerformance>,
}

#[async_trait]
impl Task for GroupingTask {
    async fn run(self: Box<Self>) -> Result<(), CollaboratorError> {
        let mut batches = 0u64;
        for chunk in self.ids.chunks(self.batch_size) {
            self.next.send(chunk.to_vec());
            batches += 1;
        }
        self.performance.add("grouping.batches", batches);
        debug!(
            ids = self.ids.len(),
            batch_size = self.batch_size,
            batches,
            "Grouped identifiers"
        );
        Ok(())
    }
}
