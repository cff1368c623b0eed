//! CLI argument parsing for `indexer-admin`.
//!
//! Flags override every other configuration source.

use clap::{Parser, Subcommand};

use indexer_types::{Identifier, IndexType, UpdateType};

/// Catalog indexer administration
///
/// Inspects and adjusts the durable build state while the indexers using it
/// are stopped.
#[derive(Parser, Debug)]
#[command(name = "indexer-admin")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default ~/.config/catalog-indexer/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Override database path
    #[arg(long, global = true)]
    pub db_path: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show build status and pending notifications for every index
    Status,

    /// Make the next build of an index a full rebuild
    ForceRebuild {
        /// Index type (category, product, sku, ...)
        index_type: IndexType,
    },

    /// Queue an index notification
    Notify {
        index_type: IndexType,

        /// update, delete, or rebuild
        update_type: UpdateType,

        /// Affected entity; required for update and delete
        id: Option<Identifier>,
    },

    /// Print the effective configuration
    Config,
}
