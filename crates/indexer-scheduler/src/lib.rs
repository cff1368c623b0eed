//! Cron scheduling of index builds.
//!
//! Wraps `tokio-cron-scheduler` with timezone support, an overlap guard per
//! job, a status registry, and graceful shutdown.
//!
//! # Example
//!
//! ```ignore
//! use indexer_scheduler::{create_index_build_jobs, SchedulerConfig, SchedulerService};
//!
//! let scheduler = SchedulerService::new(SchedulerConfig::default()).await?;
//! create_index_build_jobs(&scheduler, service, &settings.schedule).await?;
//! scheduler.start().await?;
//!
//! let status = scheduler.registry().get_status("index-build-product");
//! ```

mod config;
mod error;
mod overlap;
mod registry;
mod scheduler;

#[cfg(feature = "jobs")]
pub mod jobs;

pub use config::SchedulerConfig;
pub use error::SchedulerError;
pub use overlap::{OverlapGuard, OverlapPolicy, RunGuard};
pub use registry::{JobOutput, JobRegistry, JobResult, JobStatus};
pub use scheduler::{validate_cron_expression, SchedulerService};

#[cfg(feature = "jobs")]
pub use jobs::{create_index_build_jobs, index_build_job_name};
