//! RocksDB wrapper for indexer storage.
//!
//! Provides:
//! - Database open/close with column family setup
//! - Build status records keyed by index type
//! - A notification queue with a monotonic sequence counter

use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

use indexer_types::{IndexBuildStatus, IndexNotification, IndexType};

use crate::column_families::{
    build_cf_descriptors, ALL_CF_NAMES, CF_BUILD_STATUS, CF_NOTIFICATIONS,
};
use crate::error::StorageError;
use crate::keys::NotificationKey;
use crate::store::{BuildStatusStore, NotificationStore};

/// Main storage interface for the indexer
pub struct Storage {
    db: DB,
    /// Notification sequence counter for arrival ordering
    notification_sequence: AtomicU64,
}

impl Storage {
    /// Open storage at the given path, creating if necessary
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        info!("Opening storage at {:?}", path);

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors = build_cf_descriptors();
        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        let notification_sequence = Self::load_notification_sequence(&db)?;

        Ok(Self {
            db,
            notification_sequence: AtomicU64::new(notification_sequence),
        })
    }

    /// Next free notification sequence: one past the highest stored.
    ///
    /// Keys are ordered by index name first, so every key is visited.
    fn load_notification_sequence(db: &DB) -> Result<u64, StorageError> {
        let cf = db
            .cf_handle(CF_NOTIFICATIONS)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(CF_NOTIFICATIONS.to_string()))?;

        let mut next = 0;
        for item in db.iterator_cf(&cf, IteratorMode::Start) {
            let (key, _) = item?;
            let key = NotificationKey::from_bytes(&key)?;
            next = next.max(key.sequence + 1);
        }
        Ok(next)
    }

    fn next_notification_sequence(&self) -> u64 {
        self.notification_sequence.fetch_add(1, Ordering::SeqCst)
    }

    /// Every persisted build status, in index name order.
    pub fn list_build_statuses(&self) -> Result<Vec<IndexBuildStatus>, StorageError> {
        let cf = self
            .db
            .cf_handle(CF_BUILD_STATUS)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(CF_BUILD_STATUS.to_string()))?;

        let mut statuses = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_, value) = item?;
            statuses.push(IndexBuildStatus::from_bytes(&value)?);
        }
        Ok(statuses)
    }

    /// Flush all column families to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        for cf_name in ALL_CF_NAMES {
            if let Some(cf) = self.db.cf_handle(cf_name) {
                self.db.flush_cf(&cf)?;
            }
        }
        Ok(())
    }

    /// Get database statistics.
    pub fn get_stats(&self) -> Result<StorageStats, StorageError> {
        let mut stats = StorageStats::default();

        if let Some(cf) = self.db.cf_handle(CF_BUILD_STATUS) {
            stats.build_status_count = self.count_cf_entries(cf)?;
        }

        if let Some(cf) = self.db.cf_handle(CF_NOTIFICATIONS) {
            stats.notification_count = self.count_cf_entries(cf)?;
        }

        stats.disk_usage_bytes = self.get_disk_usage();

        Ok(stats)
    }

    fn count_cf_entries(&self, cf: &rocksdb::ColumnFamily) -> Result<u64, StorageError> {
        let mut count = 0u64;
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            item?;
            count += 1;
        }
        Ok(count)
    }

    fn get_disk_usage(&self) -> u64 {
        std::fs::read_dir(self.db.path())
            .map(|entries| {
                entries
                    .flatten()
                    .filter_map(|e| e.metadata().ok())
                    .map(|m| m.len())
                    .sum()
            })
            .unwrap_or(0)
    }
}

impl BuildStatusStore for Storage {
    fn load_build_status(
        &self,
        index_type: IndexType,
    ) -> Result<Option<IndexBuildStatus>, StorageError> {
        let cf = self
            .db
            .cf_handle(CF_BUILD_STATUS)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(CF_BUILD_STATUS.to_string()))?;

        match self.db.get_cf(&cf, index_type.status_key())? {
            Some(bytes) => Ok(Some(IndexBuildStatus::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    fn save_build_status(&self, status: &IndexBuildStatus) -> Result<(), StorageError> {
        let cf = self
            .db
            .cf_handle(CF_BUILD_STATUS)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(CF_BUILD_STATUS.to_string()))?;

        self.db
            .put_cf(&cf, status.index_type.status_key(), status.to_bytes()?)?;
        debug!(
            index_type = %status.index_type,
            status = %status.status,
            "Saved build status"
        );
        Ok(())
    }
}

impl NotificationStore for Storage {
    fn add_notification(&self, notification: &IndexNotification) -> Result<u64, StorageError> {
        let cf = self
            .db
            .cf_handle(CF_NOTIFICATIONS)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(CF_NOTIFICATIONS.to_string()))?;

        let key = NotificationKey::new(notification.index_type, self.next_notification_sequence());
        self.db.put_cf(&cf, key.to_bytes(), notification.to_bytes()?)?;
        debug!(
            index_type = %notification.index_type,
            sequence = key.sequence,
            "Stored notification"
        );
        Ok(key.sequence)
    }

    fn pending_notifications(
        &self,
        index_type: IndexType,
    ) -> Result<Vec<(u64, IndexNotification)>, StorageError> {
        let cf = self
            .db
            .cf_handle(CF_NOTIFICATIONS)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(CF_NOTIFICATIONS.to_string()))?;

        let prefix = NotificationKey::prefix(index_type);
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(&prefix, Direction::Forward));

        let mut results = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            let key = NotificationKey::from_bytes(&key)?;
            results.push((key.sequence, IndexNotification::from_bytes(&value)?));
        }
        Ok(results)
    }

    fn acknowledge_notifications(
        &self,
        index_type: IndexType,
        up_to_sequence: u64,
    ) -> Result<usize, StorageError> {
        let cf = self
            .db
            .cf_handle(CF_NOTIFICATIONS)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(CF_NOTIFICATIONS.to_string()))?;

        let prefix = NotificationKey::prefix(index_type);
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(&prefix, Direction::Forward));

        let mut batch = WriteBatch::default();
        let mut count = 0;
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            if NotificationKey::from_bytes(&key)?.sequence > up_to_sequence {
                break;
            }
            batch.delete_cf(&cf, &key);
            count += 1;
        }

        if count > 0 {
            self.db.write(batch)?;
            debug!(
                index_type = %index_type,
                up_to_sequence,
                count,
                "Acknowledged notifications"
            );
        }
        Ok(count)
    }
}

/// Statistics about the storage.
#[derive(Debug, Default)]
pub struct StorageStats {
    /// Number of persisted build status records
    pub build_status_count: u64,
    /// Number of pending notifications
    pub notification_count: u64,
    /// Total disk usage in bytes
    pub disk_usage_bytes: u64,
}
