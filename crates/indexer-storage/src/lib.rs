//! Storage layer for the catalog indexer.
//!
//! Provides RocksDB-backed storage with:
//! - One durable [`IndexBuildStatus`](indexer_types::IndexBuildStatus) record per index type
//! - A per-index queue of pending [`IndexNotification`](indexer_types::IndexNotification)s
//! - The [`BuildStatusStore`] and [`NotificationStore`] traits the build
//!   service depends on

pub mod column_families;
pub mod db;
pub mod error;
pub mod keys;
pub mod store;

pub use db::{Storage, StorageStats};
pub use error::StorageError;
pub use keys::NotificationKey;
pub use store::{BuildStatusStore, NotificationStore};
