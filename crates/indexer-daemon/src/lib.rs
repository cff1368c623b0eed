//! Operator tooling for the catalog indexer.
//!
//! # Modules
//!
//! - `cli`: Command-line argument parsing with clap
//! - `commands`: Command implementations against the build status store

pub mod cli;
pub mod commands;

pub use cli::{Cli, Commands};
pub use commands::{
    force_rebuild, init_logging, load_settings, notify, open_storage, render_config,
    render_status,
};
