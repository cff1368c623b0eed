//! Error types for index build orchestration.

use indexer_pipeline::{CollaboratorError, PipelineError};
use indexer_storage::StorageError;
use indexer_types::{IndexType, IndexerError};
use thiserror::Error;

/// Errors surfaced to the caller of a build.
#[derive(Error, Debug)]
pub enum IndexBuildError {
    /// Missing wiring or invalid settings
    #[error("Configuration error: {0}")]
    Config(String),

    /// Durable build status could not be read or written
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Pipeline construction or background submission failed
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Name does not match any index type
    #[error("Unknown index type: {0}")]
    UnknownIndexType(String),

    /// No definition registered for the index type
    #[error("Index type not registered: {0}")]
    NotRegistered(IndexType),

    /// Another build of the same index type is running
    #[error("Build already in progress for {0}")]
    BuildInProgress(IndexType),

    /// The service was shut down before or during the build
    #[error("Service shut down, build abandoned for {0}")]
    Shutdown(IndexType),

    /// Identifier source could not be queried
    #[error("Identifier source failed for {index_type}: {source}")]
    IdentifierSource {
        index_type: IndexType,
        #[source]
        source: CollaboratorError,
    },

    /// Commit sink refused an index-wide operation
    #[error("Commit sink failed for {index_type}: {source}")]
    Sink {
        index_type: IndexType,
        #[source]
        source: CollaboratorError,
    },
}

impl From<IndexerError> for IndexBuildError {
    fn from(err: IndexerError) -> Self {
        match err {
            IndexerError::UnknownIndexType(name) => IndexBuildError::UnknownIndexType(name),
            other => IndexBuildError::Config(other.to_string()),
        }
    }
}
