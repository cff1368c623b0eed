//! Storage traits the index build service depends on.
//!
//! The service only needs these narrow operations, so it takes them as
//! trait objects and tests or alternative backends can supply their own.

use indexer_types::{IndexBuildStatus, IndexNotification, IndexType};

use crate::error::StorageError;

/// Durable home of the per-index build status.
pub trait BuildStatusStore: Send + Sync {
    /// Load the persisted status for an index, if any.
    fn load_build_status(
        &self,
        index_type: IndexType,
    ) -> Result<Option<IndexBuildStatus>, StorageError>;

    /// Persist the status, replacing any previous record for its index.
    fn save_build_status(&self, status: &IndexBuildStatus) -> Result<(), StorageError>;
}

/// Durable queue of pending notifications.
pub trait NotificationStore: Send + Sync {
    /// Record a notification.
    fn add_notification(&self, notification: &IndexNotification) -> Result<u64, StorageError>;

    /// Pending notifications for an index, in arrival order, with their sequence numbers.
    fn pending_notifications(
        &self,
        index_type: IndexType,
    ) -> Result<Vec<(u64, IndexNotification)>, StorageError>;

    /// Remove notifications for an index up to and including `up_to_sequence`.
    fn acknowledge_notifications(
        &self,
        index_type: IndexType,
        up_to_sequence: u64,
    ) -> Result<usize, StorageError>;
}
