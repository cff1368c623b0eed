//! Command implementations for `indexer-admin`.
//!
//! Everything here works directly on the RocksDB build status store. RocksDB
//! allows one process per store, so these commands need the indexers that
//! use it to be stopped. A running service takes rebuild requests through
//! `IndexBuildService::request_rebuild` instead.

use std::fs;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use indexer_storage::{BuildStatusStore, NotificationStore, Storage};
use indexer_types::{
    Identifier, IndexBuildStatus, IndexNotification, IndexType, Settings, UpdateType,
};

/// Load configuration (defaults -> file -> env) and apply CLI overrides.
pub fn load_settings(
    config_path: Option<&str>,
    db_path_override: Option<&str>,
    log_level_override: Option<&str>,
) -> Result<Settings> {
    let mut settings = Settings::load(config_path).context("Failed to load configuration")?;
    if let Some(db_path) = db_path_override {
        settings.db_path = db_path.to_string();
    }
    if let Some(log_level) = log_level_override {
        settings.log_level = log_level.to_string();
    }
    Ok(settings)
}

/// Install the fmt subscriber. `RUST_LOG` wins over the configured level.
pub fn init_logging(settings: &Settings) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&settings.log_level)),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;
    Ok(())
}

pub fn open_storage(settings: &Settings) -> Result<Storage> {
    let db_path = settings.expanded_db_path();
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent).context("Failed to create database directory")?;
    }
    info!("Opening storage at {:?}", db_path);
    Storage::open(&db_path)
        .with_context(|| format!("Failed to open storage at {db_path:?} (is an indexer using it?)"))
}

/// One line per index type plus store totals.
pub fn render_status(storage: &Storage) -> Result<String> {
    let mut out = format!(
        "{:<12} {:<20} {:<32} {:>8}\n",
        "Index", "Status", "Last build", "Pending"
    );
    for index_type in IndexType::ALL {
        let status = storage.load_build_status(index_type)?;
        let pending = storage.pending_notifications(index_type)?.len();
        let (state, last_build) = match status {
            Some(s) => (
                s.status.to_string(),
                s.last_build_date
                    .map(|d| d.to_rfc3339())
                    .unwrap_or_else(|| "never".to_string()),
            ),
            None => ("-".to_string(), "never".to_string()),
        };
        out.push_str(&format!(
            "{:<12} {:<20} {:<32} {:>8}\n",
            index_type.index_name(),
            state,
            last_build,
            pending
        ));
    }

    let stats = storage.get_stats()?;
    out.push_str(&format!(
        "\n{} build status records, {} pending notifications, {} bytes on disk\n",
        stats.build_status_count, stats.notification_count, stats.disk_usage_bytes
    ));
    Ok(out)
}

/// Clear `last_build_date` so the next trigger runs a full rebuild.
///
/// An in-progress record can only be left over from a crashed run here; the
/// next trigger releases it.
pub fn force_rebuild(storage: &Storage, index_type: IndexType) -> Result<IndexBuildStatus> {
    let mut status = storage
        .load_build_status(index_type)?
        .unwrap_or_else(|| IndexBuildStatus::new(index_type));

    if status.status.is_in_progress() {
        warn!(index_type = %index_type, status = %status.status, "Found status of an interrupted build");
    }

    status.last_build_date = None;
    storage.save_build_status(&status)?;
    info!(index_type = %index_type, "Marked for full rebuild");
    Ok(status)
}

/// Queue a notification. Returns its sequence number.
pub fn notify(
    storage: &Storage,
    index_type: IndexType,
    update_type: UpdateType,
    id: Option<Identifier>,
) -> Result<u64> {
    let notification = match (update_type, id) {
        (UpdateType::Update, Some(id)) => IndexNotification::update(index_type, id),
        (UpdateType::Delete, Some(id)) => IndexNotification::delete(index_type, id),
        (UpdateType::Update | UpdateType::Delete, None) => {
            bail!("{:?} notifications need an entity id", update_type)
        }
        (UpdateType::Rebuild, id) => {
            if id.is_some() {
                warn!("Rebuild notifications apply to the whole index; id ignored");
            }
            IndexNotification::rebuild(index_type)
        }
    };

    let sequence = storage.add_notification(&notification)?;
    info!(index_type = %index_type, update_type = ?update_type, sequence, "Notification queued");
    Ok(sequence)
}

pub fn render_config(settings: &Settings) -> Result<String> {
    toml::to_string_pretty(settings).context("Failed to render configuration")
}
