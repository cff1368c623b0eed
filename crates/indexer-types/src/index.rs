//! Index identity and build status bookkeeping.
//!
//! Exactly one [`IndexBuildStatus`] exists per [`IndexType`]. It records the
//! start time of the last successful build so incremental updates can pick up
//! everything changed since, and the in-progress state so an interrupted
//! rebuild is detectable on the next trigger.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::IndexerError;

/// Opaque key referencing one domain entity eligible for indexing.
pub type Identifier = u64;

/// Logical search index served by one pipeline instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexType {
    /// Catalog products
    Product,
    /// Catalog categories
    Category,
    /// Storefront customers
    Customer,
    /// Promotion rules
    Promotion,
    /// Shipping service levels
    ShippingOption,
    /// Commerce manager users
    CmUser,
    /// Product SKUs
    Sku,
}

impl IndexType {
    /// Every index type, in a stable order.
    pub const ALL: [IndexType; 7] = [
        IndexType::Product,
        IndexType::Category,
        IndexType::Customer,
        IndexType::Promotion,
        IndexType::ShippingOption,
        IndexType::CmUser,
        IndexType::Sku,
    ];

    /// Name of the index as used in configuration and on the command line.
    pub fn index_name(&self) -> &'static str {
        match self {
            IndexType::Product => "product",
            IndexType::Category => "category",
            IndexType::Customer => "customer",
            IndexType::Promotion => "promotion",
            IndexType::ShippingOption => "shipping_option",
            IndexType::CmUser => "cm_user",
            IndexType::Sku => "sku",
        }
    }

    /// Storage key for the persisted build status of this index.
    pub fn status_key(&self) -> String {
        format!("build_status:{}", self.index_name())
    }
}

impl std::fmt::Display for IndexType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.index_name())
    }
}

impl FromStr for IndexType {
    type Err = IndexerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        IndexType::ALL
            .into_iter()
            .find(|t| t.index_name() == normalized)
            .ok_or_else(|| IndexerError::UnknownIndexType(s.to_string()))
    }
}

/// State of the most recent build run for an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IndexStatus {
    /// No run in progress
    #[default]
    Complete,
    /// An incremental update is running
    UpdateInProgress,
    /// A full rebuild is running
    RebuildInProgress,
}

impl IndexStatus {
    /// True for either in-progress state.
    pub fn is_in_progress(&self) -> bool {
        !matches!(self, IndexStatus::Complete)
    }
}

impl std::fmt::Display for IndexStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexStatus::Complete => write!(f, "COMPLETE"),
            IndexStatus::UpdateInProgress => write!(f, "UPDATE_IN_PROGRESS"),
            IndexStatus::RebuildInProgress => write!(f, "REBUILD_IN_PROGRESS"),
        }
    }
}

/// Persisted build record for one index type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexBuildStatus {
    /// Index this record belongs to
    pub index_type: IndexType,

    /// Start time of the last successfully completed build
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub last_build_date: Option<DateTime<Utc>>,

    /// Start time of the current (or most recent) run
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub operation_start_date: Option<DateTime<Utc>>,

    /// Current run state
    pub status: IndexStatus,
}

impl IndexBuildStatus {
    /// Fresh record for an index that has never been built.
    pub fn new(index_type: IndexType) -> Self {
        Self {
            index_type,
            last_build_date: None,
            operation_start_date: None,
            status: IndexStatus::Complete,
        }
    }

    /// True when the persisted state shows a rebuild that never reached `COMPLETE`.
    pub fn was_rebuild_interrupted(&self) -> bool {
        self.status == IndexStatus::RebuildInProgress
    }

    /// Serialize to JSON bytes for storage
    pub fn to_bytes(&self) -> Result<Vec<u8>, IndexerError> {
        serde_json::to_vec(self).map_err(IndexerError::from)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IndexerError> {
        serde_json::from_slice(bytes).map_err(IndexerError::from)
    }
}

impl std::fmt::Display for IndexBuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let fmt_date = |d: &Option<DateTime<Utc>>| {
            d.map(|d| d.to_rfc3339()).unwrap_or_else(|| "never".to_string())
        };
        write!(
            f,
            "IndexBuildStatus[{}: status={}, lastBuildDate={}, operationStartDate={}]",
            self.index_type,
            self.status,
            fmt_date(&self.last_build_date),
            fmt_date(&self.operation_start_date)
        )
    }
}
