//! Interfaces to the systems the pipeline reads from and writes to.
//!
//! The pipeline never knows what an entity is; it only moves `E` values from
//! an [`EntityLoader`] to a [`DocumentBuilder`] and the resulting documents to
//! a [`CommitSink`].

use std::sync::Arc;

use async_trait::async_trait;

use indexer_types::{Identifier, SearchDocument};

use crate::error::CollaboratorError;

/// Bulk entity store.
#[async_trait]
pub trait EntityLoader<E>: Send + Sync {
    /// Load every entity in the batch with one call. Identifiers that no
    /// longer resolve are left out of the result rather than reported.
    async fn load_batch(&self, ids: &[Identifier]) -> Result<Vec<E>, CollaboratorError>;
}

/// Authority deciding whether an identifier needs (re)indexing.
#[async_trait]
pub trait IndexingFilter: Send + Sync {
    async fn requires_indexing(&self, id: Identifier) -> Result<bool, CollaboratorError>;
}

/// Filter that keeps every identifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

#[async_trait]
impl IndexingFilter for AcceptAll {
    async fn requires_indexing(&self, _id: Identifier) -> Result<bool, CollaboratorError> {
        Ok(true)
    }
}

/// Pure entity to document mapping. Called concurrently from many tasks.
pub trait DocumentBuilder<E>: Send + Sync {
    fn build(&self, entity: &E) -> Result<SearchDocument, CollaboratorError>;
}

/// Search engine client.
#[async_trait]
pub trait CommitSink: Send + Sync {
    async fn submit(&self, document: SearchDocument) -> Result<(), CollaboratorError>;

    async fn remove(&self, id: Identifier) -> Result<(), CollaboratorError>;

    /// Drop every document of the index. Issued before a full rebuild.
    async fn remove_all(&self) -> Result<(), CollaboratorError>;

    /// Make submitted and removed documents visible.
    async fn commit(&self) -> Result<(), CollaboratorError>;
}

/// Everything a pipeline calls out to.
pub struct PipelineCollaborators<E> {
    pub loader: Arc<dyn EntityLoader<E>>,
    pub filter: Arc<dyn IndexingFilter>,
    pub builder: Arc<dyn DocumentBuilder<E>>,
    pub sink: Arc<dyn CommitSink>,
}

impl<E> PipelineCollaborators<E> {
    /// Collaborators with the accept-all filter.
    pub fn new(
        loader: Arc<dyn EntityLoader<E>>,
        builder: Arc<dyn DocumentBuilder<E>>,
        sink: Arc<dyn CommitSink>,
    ) -> Self {
        Self {
            loader,
            filter: Arc::new(AcceptAll),
            builder,
            sink,
        }
    }

    pub fn with_filter(mut self, filter: Arc<dyn IndexingFilter>) -> Self {
        self.filter = filter;
        self
    }
}

impl<E> Clone for PipelineCollaborators<E> {
    fn clone(&self) -> Self {
        Self {
            loader: Arc::clone(&self.loader),
            filter: Arc::clone(&self.filter),
            builder: Arc::clone(&self.builder),
            sink: Arc::clone(&self.sink),
        }
    }
}
