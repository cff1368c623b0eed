//! Column family definitions for RocksDB.
//!
//! - build_status: one record per index type, rewritten on every transition
//! - notifications: pending per-index notifications, consumed after a build

use rocksdb::{ColumnFamilyDescriptor, Options};

/// Column family name for index build status records
pub const CF_BUILD_STATUS: &str = "build_status";

/// Column family name for pending index notifications
pub const CF_NOTIFICATIONS: &str = "notifications";

/// All column family names
pub const ALL_CF_NAMES: &[&str] = &[CF_BUILD_STATUS, CF_NOTIFICATIONS];

/// Build all column family descriptors
pub fn build_cf_descriptors() -> Vec<ColumnFamilyDescriptor> {
    vec![
        ColumnFamilyDescriptor::new(CF_BUILD_STATUS, Options::default()),
        ColumnFamilyDescriptor::new(CF_NOTIFICATIONS, Options::default()),
    ]
}
