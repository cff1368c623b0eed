//! Indexing pipeline orchestrator.
//!
//! Wires grouping, filtering, loading, document creation and commit stages
//! together, each on its own bounded pool, and turns the asynchronous flow
//! back into a single awaitable run for the build service.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use indexer_types::{Identifier, IndexType, PipelineSettings, SearchDocument};

use crate::collaborators::PipelineCollaborators;
use crate::error::PipelineError;
use crate::performance::PipelinePerformance;
use crate::stage::Stage;
use crate::stages::{
    CommitTaskFactory, DocumentTaskFactory, FilteringTaskFactory, GroupingTaskFactory,
    LoadingTaskFactory, COMMIT, DOCUMENT, FILTERING, GROUPING, LOADING,
};
use crate::status::PipelineStatus;

/// Object-safe view of a pipeline, independent of its entity type.
#[async_trait]
pub trait PipelineRunner: Send + Sync {
    fn index_type(&self) -> IndexType;

    /// Start a run over the given identifiers. Never fails; items that cannot
    /// be accepted are settled as rejected.
    fn start(&self, ids: Vec<Identifier>);

    /// Resolve once every started item has settled and all stages are idle.
    async fn wait_until_completed(&self);

    /// True while any stage has queued or running work.
    fn is_busy(&self) -> bool;

    fn status(&self) -> &Arc<PipelineStatus>;

    fn performance(&self) -> &Arc<PipelinePerformance>;

    /// Stop accepting work. Queued tasks still drain.
    fn shutdown(&self);
}

/// A chain of stages serving one index type.
pub struct IndexingPipeline<E> {
    index_type: IndexType,
    completion_poll: Duration,
    status: Arc<PipelineStatus>,
    performance: Arc<PipelinePerformance>,
    grouping: Stage<Vec<Identifier>>,
    filtering: Stage<Vec<Identifier>>,
    loading: Stage<Vec<Identifier>>,
    document: Stage<E>,
    commit: Stage<SearchDocument>,
}

impl<E: Send + 'static> IndexingPipeline<E> {
    /// Build the stage chain. Must be called inside a tokio runtime.
    ///
    /// Fails with [`PipelineError::Config`] on invalid settings, before any
    /// pool is created.
    pub fn new(
        index_type: IndexType,
        settings: &PipelineSettings,
        collaborators: PipelineCollaborators<E>,
        status: Arc<PipelineStatus>,
        performance: Arc<PipelinePerformance>,
    ) -> Result<Self, PipelineError> {
        settings
            .validate()
            .map_err(|e| PipelineError::Config(format!("{index_type} pipeline: {e}")))?;
        for actual in [status.index_type(), performance.index_type()] {
            if actual != index_type {
                return Err(PipelineError::IndexTypeMismatch {
                    expected: index_type,
                    actual,
                });
            }
        }

        let PipelineCollaborators {
            loader,
            filter,
            builder,
            sink,
        } = collaborators;

        // Built back to front so each factory can hold its successor.
        let commit = Stage::new(
            COMMIT,
            index_type,
            CommitTaskFactory::new(sink, Arc::clone(&status)),
            &settings.commit,
            Arc::clone(&status),
            Arc::clone(&performance),
        )?;
        let document = Stage::new(
            DOCUMENT,
            index_type,
            DocumentTaskFactory::new(builder, commit.clone(), Arc::clone(&performance)),
            &settings.document,
            Arc::clone(&status),
            Arc::clone(&performance),
        )?;
        let loading = Stage::new(
            LOADING,
            index_type,
            LoadingTaskFactory::new(
                loader,
                document.clone(),
                Arc::clone(&status),
                Arc::clone(&performance),
            ),
            &settings.loading,
            Arc::clone(&status),
            Arc::clone(&performance),
        )?;
        let filtering = Stage::new(
            FILTERING,
            index_type,
            FilteringTaskFactory::new(
                filter,
                loading.clone(),
                Arc::clone(&status),
                Arc::clone(&performance),
            ),
            &settings.filtering,
            Arc::clone(&status),
            Arc::clone(&performance),
        )?;
        let grouping = Stage::new(
            GROUPING,
            index_type,
            GroupingTaskFactory::new(
                settings.batch_size,
                filtering.clone(),
                Arc::clone(&performance),
            ),
            &settings.grouping,
            Arc::clone(&status),
            Arc::clone(&performance),
        )?;

        debug!(
            index_type = %index_type,
            batch_size = settings.batch_size,
            "Pipeline created"
        );

        Ok(Self {
            index_type,
            completion_poll: settings.completion_poll(),
            status,
            performance,
            grouping,
            filtering,
            loading,
            document,
            commit,
        })
    }

    fn busy_stages(&self) -> Vec<&'static str> {
        let stages = [
            (self.grouping.name(), self.grouping.is_busy()),
            (self.filtering.name(), self.filtering.is_busy()),
            (self.loading.name(), self.loading.is_busy()),
            (self.document.name(), self.document.is_busy()),
            (self.commit.name(), self.commit.is_busy()),
        ];
        stages
            .into_iter()
            .filter_map(|(name, busy)| busy.then_some(name))
            .collect()
    }

    fn is_quiescent(&self) -> bool {
        self.status.is_settled() && !PipelineRunner::is_busy(self)
    }
}

#[async_trait]
impl<E: Send + 'static> PipelineRunner for IndexingPipeline<E> {
    fn index_type(&self) -> IndexType {
        self.index_type
    }

    fn start(&self, ids: Vec<Identifier>) {
        self.status.notify_started();
        self.status.add_incoming(ids.len() as u64);
        self.performance.add("pipeline.incoming", ids.len() as u64);
        info!(index_type = %self.index_type, ids = ids.len(), "Pipeline started");
        self.grouping.send(ids);
    }

    async fn wait_until_completed(&self) {
        loop {
            if self.status.is_completed() {
                return;
            }

            if self.is_quiescent() {
                // A task may be between settling and fanning out; look again.
                tokio::time::sleep(self.completion_poll).await;
                if self.is_quiescent() {
                    self.status.mark_completed();
                    let s = self.status.snapshot();
                    info!(
                        index_type = %self.index_type,
                        incoming = s.incoming,
                        completed = s.completed,
                        filtered = s.filtered,
                        load_misses = s.load_misses,
                        failed = s.failed,
                        rejected = s.rejected,
                        "Pipeline completed"
                    );
                    return;
                }
                continue;
            }

            let _ = tokio::time::timeout(self.completion_poll, self.status.settled_signal()).await;
            debug!(
                index_type = %self.index_type,
                incoming = self.status.incoming(),
                settled = self.status.settled(),
                busy = ?self.busy_stages(),
                "Waiting for pipeline"
            );
        }
    }

    fn is_busy(&self) -> bool {
        !self.busy_stages().is_empty()
    }

    fn status(&self) -> &Arc<PipelineStatus> {
        &self.status
    }

    fn performance(&self) -> &Arc<PipelinePerformance> {
        &self.performance
    }

    fn shutdown(&self) {
        self.grouping.shutdown();
        self.filtering.shutdown();
        self.loading.shutdown();
        self.document.shutdown();
        self.commit.shutdown();
        info!(index_type = %self.index_type, "Pipeline shut down");
    }
}
