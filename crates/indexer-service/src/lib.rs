//! Index build orchestration for the catalog search indexer.
//!
//! Decides per trigger whether an index needs a full rebuild or an
//! incremental update, feeds the right identifiers into its pipeline, and
//! keeps the durable build status in step.

pub mod definition;
pub mod error;
pub mod policy;
pub mod report;
pub mod service;
pub mod source;

pub use definition::{IndexDefinition, IndexDefinitionBuilder};
pub use error::IndexBuildError;
pub use policy::{MaxAgeRebuildPolicy, NeverRebuild, RebuildPolicy};
pub use report::{BuildMode, BuildOutcome, BuildReport, RebuildReason};
pub use service::IndexBuildService;
pub use source::IdentifierSource;
