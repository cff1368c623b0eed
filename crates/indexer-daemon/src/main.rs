//! Catalog indexer administration
//!
//! # Usage
//!
//! ```bash
//! indexer-admin status
//! indexer-admin force-rebuild product
//! indexer-admin notify product update 42
//! indexer-admin config
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/catalog-indexer/config.toml)
//! 3. Environment variables (INDEXER_*)
//! 4. CLI flags

use anyhow::Result;
use clap::Parser;

use indexer_daemon::{
    force_rebuild, init_logging, load_settings, notify, open_storage, render_config,
    render_status, Cli, Commands,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(
        cli.config.as_deref(),
        cli.db_path.as_deref(),
        cli.log_level.as_deref(),
    )?;
    init_logging(&settings)?;

    match cli.command {
        Commands::Status => {
            let storage = open_storage(&settings)?;
            print!("{}", render_status(&storage)?);
        }
        Commands::ForceRebuild { index_type } => {
            let storage = open_storage(&settings)?;
            let status = force_rebuild(&storage, index_type)?;
            println!("{status}");
        }
        Commands::Notify {
            index_type,
            update_type,
            id,
        } => {
            let storage = open_storage(&settings)?;
            let sequence = notify(&storage, index_type, update_type, id)?;
            println!("Queued notification #{sequence} for {index_type}");
        }
        Commands::Config => {
            print!("{}", render_config(&settings)?);
        }
    }

    Ok(())
}
