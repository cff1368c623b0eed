//! Bulk-loads the entities of one batch and fans them out one by one.
//!
//! Identifiers the store cannot resolve are counted as load misses, not
//! errors. A failed bulk load fails every identifier in the batch.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, warn};

use indexer_types::Identifier;

use crate::collaborators::EntityLoader;
use crate::error::CollaboratorError;
use crate::performance::PipelinePerformance;
use crate::stage::{Stage, Task, TaskFactory};
use crate::status::PipelineStatus;

pub struct LoadingTaskFactory<E> {
    loader: Arc<dyn EntityLoader<E>>,
    next: Stage<E>,
    status: Arc<PipelineStatus>,
    performance: Arc<PipelinePerformance>,
}

impl<E> LoadingTaskFactory<E> {
    pub fn new(
        loader: Arc<dyn EntityLoader<E>>,
        next: Stage<E>,
        status: Arc<PipelineStatus>,
        performance: Arc<PipelinePerformance>,
    ) -> Self {
        Self {
            loader,
            next,
            status,
            performance,
        }
    }
}

impl<E: Send + 'static> TaskFactory<Vec<Identifier>> for LoadingTaskFactory<E> {
    fn create_task(&self, payload: Vec<Identifier>) -> Box<dyn Task> {
        Box::new(LoadingTask {
            batch: payload,
            loader: Arc::clone(&self.loader),
            next: self.next.clone(),
            status: Arc::clone(&self.status),
            performance: Arc::clone(&self.performance),
        })
    }

    fn item_count(&self, payload: &Vec<Identifier>) -> u64 {
        payload.len() as u64
    }
}

struct LoadingTask<E> {
    batch: Vec<Identifier>,
    loader: Arc<dyn EntityLoader<E>>,
    next: Stage<E>,
    status: Arc<PipelineStatus>,
    performance: Arc<PipelinePerformance>,
}

#[async_trait]
impl<E: Send + 'static> Task for LoadingTask<E> {
    async fn run(self: Box<Self>) -> Result<(), CollaboratorError> {
        let this = *self;
        let requested = this.batch.len();
        let first = this.batch.first().copied().unwrap_or_default();
        let last = this.batch.last().copied().unwrap_or_default();

        let started = Instant::now();
        let entities = this.loader.load_batch(&this.batch).await.map_err(|e| {
            CollaboratorError::new(
                format!("bulk load of {requested} ids ({first}..={last}) failed"),
                e,
            )
        })?;
        this.performance
            .record_duration("loading.load_us", started.elapsed());
        this.performance.record("loading.batch_size", requested as u64);

        let loaded = entities.len();
        if loaded > requested {
            warn!(
                requested,
                loaded,
                first,
                last,
                "Entity store returned more entities than requested"
            );
        }
        let misses = requested.saturating_sub(loaded) as u64;
        if misses > 0 {
            debug!(requested, loaded, first, last, "Skipping unresolved identifiers");
            this.performance.add("loading.misses", misses);
            this.status.record_load_misses(misses);
        }

        for entity in entities {
            this.next.send(entity);
        }
        Ok(())
    }
}
