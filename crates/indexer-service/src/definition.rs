//! Wiring for one index type: where identifiers come from, which pipeline
//! indexes them, and when a full rebuild is forced.

use std::sync::Arc;

use indexer_pipeline::{
    CommitSink, IndexingPipeline, IndexingStatistics, PipelineCollaborators, PipelineRunner,
};
use indexer_types::{IndexType, PipelineSettings};

use crate::error::IndexBuildError;
use crate::policy::{NeverRebuild, RebuildPolicy};
use crate::source::IdentifierSource;

pub struct IndexDefinition {
    pub(crate) index_type: IndexType,
    pub(crate) source: Arc<dyn IdentifierSource>,
    pub(crate) pipeline: Arc<dyn PipelineRunner>,
    pub(crate) sink: Arc<dyn CommitSink>,
    pub(crate) rebuild_policy: Arc<dyn RebuildPolicy>,
}

impl IndexDefinition {
    pub fn builder(index_type: IndexType) -> IndexDefinitionBuilder {
        IndexDefinitionBuilder {
            index_type,
            source: None,
            pipeline: None,
            rebuild_policy: Arc::new(NeverRebuild),
        }
    }

    pub fn index_type(&self) -> IndexType {
        self.index_type
    }

    pub fn pipeline(&self) -> &Arc<dyn PipelineRunner> {
        &self.pipeline
    }
}

pub struct IndexDefinitionBuilder {
    index_type: IndexType,
    source: Option<Arc<dyn IdentifierSource>>,
    pipeline: Option<(Arc<dyn PipelineRunner>, Arc<dyn CommitSink>)>,
    rebuild_policy: Arc<dyn RebuildPolicy>,
}

impl IndexDefinitionBuilder {
    pub fn identifier_source(mut self, source: Arc<dyn IdentifierSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn rebuild_policy(mut self, policy: Arc<dyn RebuildPolicy>) -> Self {
        self.rebuild_policy = policy;
        self
    }

    /// Use an existing pipeline. `sink` must be the one the pipeline commits to.
    pub fn pipeline(mut self, pipeline: Arc<dyn PipelineRunner>, sink: Arc<dyn CommitSink>) -> Self {
        self.pipeline = Some((pipeline, sink));
        self
    }

    /// Build a pipeline from collaborators, tracked in `statistics`.
    ///
    /// Must be called inside a tokio runtime.
    pub fn entity_pipeline<E: Send + 'static>(
        mut self,
        settings: &PipelineSettings,
        statistics: &IndexingStatistics,
        collaborators: PipelineCollaborators<E>,
    ) -> Result<Self, IndexBuildError> {
        let sink = Arc::clone(&collaborators.sink);
        let pipeline = IndexingPipeline::new(
            self.index_type,
            settings,
            collaborators,
            statistics.pipeline_status(self.index_type),
            statistics.performance(self.index_type),
        )?;
        self.pipeline = Some((Arc::new(pipeline), sink));
        Ok(self)
    }

    pub fn build(self) -> Result<IndexDefinition, IndexBuildError> {
        let source = self.source.ok_or_else(|| {
            IndexBuildError::Config(format!("{}: no identifier source", self.index_type))
        })?;
        let (pipeline, sink) = self.pipeline.ok_or_else(|| {
            IndexBuildError::Config(format!("{}: no pipeline", self.index_type))
        })?;
        if pipeline.index_type() != self.index_type {
            return Err(IndexBuildError::Config(format!(
                "{}: pipeline serves {}",
                self.index_type,
                pipeline.index_type()
            )));
        }

        Ok(IndexDefinition {
            index_type: self.index_type,
            source,
            pipeline,
            sink,
            rebuild_policy: self.rebuild_policy,
        })
    }
}
