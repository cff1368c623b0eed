//! # indexer-types
//!
//! Shared domain types for the catalog search indexer.
//!
//! This crate defines the core data structures used throughout the system:
//! - [`IndexType`]: Which logical search index a pipeline serves
//! - [`IndexBuildStatus`]: Durable per-index build bookkeeping
//! - [`SearchDocument`]: The field/value document handed to the search engine
//! - [`IndexNotification`]: Explicit update/delete/rebuild requests
//! - [`Settings`]: Layered configuration
//!
//! ## Usage
//!
//! ```rust
//! use indexer_types::{IndexBuildStatus, IndexType};
//!
//! let status = IndexBuildStatus::new(IndexType::Product);
//! assert!(status.last_build_date.is_none());
//! ```

pub mod config;
pub mod document;
pub mod error;
pub mod index;
pub mod notification;

pub use config::{ExecutorSettings, PipelineSettings, ScheduleSettings, Settings};
pub use document::{FieldValue, SearchDocument};
pub use error::IndexerError;
pub use index::{Identifier, IndexBuildStatus, IndexStatus, IndexType};
pub use notification::{IndexNotification, UpdateType};
