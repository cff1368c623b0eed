//! Multi-stage indexing pipeline for the catalog search indexer.
//!
//! Turns a collection of changed entity identifiers into documents committed
//! to a search engine.
//!
//! ## Key Components
//!
//! - [`BoundedExecutor`]: Worker pool with a bounded backlog and counted rejections
//! - [`Stage`] / [`TaskFactory`] / [`Task`]: One pipeline step on its own pool
//! - [`IndexingPipeline`]: Grouping -> filtering -> loading -> document -> commit
//! - [`PipelineStatus`]: Per-run counters and completion detection
//! - [`PipelinePerformance`]: Named counters and min/mean/max distributions
//! - [`IndexingStatistics`]: Registry of the above per index type
//!
//! ## Example
//!
//! ```ignore
//! use indexer_pipeline::{IndexingPipeline, PipelineCollaborators, PipelineRunner};
//!
//! let pipeline = IndexingPipeline::new(
//!     IndexType::Product,
//!     &settings.pipeline,
//!     PipelineCollaborators::new(loader, builder, sink),
//!     stats.pipeline_status(IndexType::Product),
//!     stats.performance(IndexType::Product),
//! )?;
//!
//! pipeline.start(ids);
//! pipeline.wait_until_completed().await;
//! ```

pub mod collaborators;
pub mod error;
pub mod executor;
pub mod performance;
pub mod pipeline;
pub mod stage;
pub mod stages;
pub mod statistics;
pub mod status;

pub use collaborators::{
    AcceptAll, CommitSink, DocumentBuilder, EntityLoader, IndexingFilter, PipelineCollaborators,
};
pub use error::{CollaboratorError, PipelineError};
pub use executor::{BoundedExecutor, ExecutorStats};
pub use performance::{PerformanceSnapshot, PipelinePerformance, StatisticSnapshot};
pub use pipeline::{IndexingPipeline, PipelineRunner};
pub use stage::{Stage, Task, TaskFactory};
pub use statistics::IndexingStatistics;
pub use status::{PipelineStatus, PipelineStatusSnapshot};
