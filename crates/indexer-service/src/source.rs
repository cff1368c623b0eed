//! Where a build gets its identifiers from.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use indexer_pipeline::CollaboratorError;
use indexer_types::Identifier;

/// Source of truth for which entities exist and which have changed.
#[async_trait]
pub trait IdentifierSource: Send + Sync {
    /// Every identifier eligible for the index. Used by full rebuilds.
    async fn find_all_identifiers(&self) -> Result<Vec<Identifier>, CollaboratorError>;

    /// Identifiers modified at or after `since`.
    async fn find_changed_identifiers_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<Identifier>, CollaboratorError>;

    /// Identifiers removed at or after `since`; these are deleted from the
    /// index rather than re-indexed.
    async fn find_deleted_identifiers_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<Identifier>, CollaboratorError>;
}
