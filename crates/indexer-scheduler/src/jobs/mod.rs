//! Scheduled jobs. The application embedding the build service registers them.

pub mod index_build;

pub use index_build::{create_index_build_jobs, index_build_job_name};
