//! Error types for the indexing pipeline.

use std::error::Error as StdError;

use indexer_types::IndexType;
use thiserror::Error;

/// Errors that can occur while building or feeding a pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Invalid worker pool sizing, missing runtime or collaborator wiring
    #[error("Configuration error: {0}")]
    Config(String),

    /// Executor backlog is full; the work was not accepted
    #[error("Executor '{executor}' rejected work: backlog full")]
    Rejected { executor: String },

    /// Executor has been shut down
    #[error("Executor '{0}' is shut down")]
    Shutdown(String),

    /// A registry entry was attached under the wrong index type
    #[error("Index type mismatch: expected {expected}, got {actual}")]
    IndexTypeMismatch {
        expected: IndexType,
        actual: IndexType,
    },
}

/// Failure reported by an external collaborator (entity store, filter
/// authority, document builder, commit sink).
#[derive(Error, Debug)]
#[error("{context}")]
pub struct CollaboratorError {
    context: String,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl CollaboratorError {
    /// Error with a message only.
    pub fn msg(context: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            source: None,
        }
    }

    /// Wrap an underlying error with context.
    pub fn new(
        context: impl Into<String>,
        source: impl Into<Box<dyn StdError + Send + Sync>>,
    ) -> Self {
        Self {
            context: context.into(),
            source: Some(source.into()),
        }
    }

    /// Context message, without the underlying cause.
    pub fn context(&self) -> &str {
        &self.context
    }

    /// Context and cause chain on one line, for log fields.
    pub fn detail(&self) -> String {
        let mut out = self.context.clone();
        let mut cause = StdError::source(self);
        while let Some(err) = cause {
            out.push_str(": ");
            out.push_str(&err.to_string());
            cause = err.source();
        }
        out
    }
}
