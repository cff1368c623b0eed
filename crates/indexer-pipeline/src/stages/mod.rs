//! The concrete pipeline stages, in flow order.
//!
//! ```text
//! Vec<Id> -> grouping -> batch -> filtering -> batch -> loading -> E
//!         -> document -> SearchDocument -> commit -> sink
//! ```

pub mod commit;
pub mod document;
pub mod filtering;
pub mod grouping;
pub mod loading;

pub use commit::CommitTaskFactory;
pub use document::DocumentTaskFactory;
pub use filtering::FilteringTaskFactory;
pub use grouping::GroupingTaskFactory;
pub use loading::LoadingTaskFactory;

pub const GROUPING: &str = "grouping";
pub const FILTERING: &str = "filtering";
pub const LOADING: &str = "loading";
pub const DOCUMENT: &str = "document";
pub const COMMIT: &str = "commit";
