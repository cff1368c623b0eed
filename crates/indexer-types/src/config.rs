//! Configuration loading for the catalog indexer.
//!
//! Layered config: defaults -> config file -> env vars -> CLI flags.
//! The default config file lives at ~/.config/catalog-indexer/config.toml.

use std::path::PathBuf;
use std::time::Duration;

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::IndexerError;
use crate::index::IndexType;

/// Sizing for one bounded worker pool.
///
/// Work is admitted while fewer than `max_workers + queue_capacity` jobs are
/// queued or running; anything beyond that is rejected and counted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorSettings {
    /// Workers kept alive for the lifetime of the pool.
    #[serde(default = "default_core_workers")]
    pub core_workers: usize,

    /// Upper bound on workers, including temporary ones.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Jobs that may wait for a worker.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Idle time after which a worker above `core_workers` exits (ms).
    #[serde(default = "default_keep_alive_ms")]
    pub keep_alive_ms: u64,
}

fn default_core_workers() -> usize {
    4
}

fn default_max_workers() -> usize {
    8
}

fn default_queue_capacity() -> usize {
    1_000
}

fn default_keep_alive_ms() -> u64 {
    30_000
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            core_workers: default_core_workers(),
            max_workers: default_max_workers(),
            queue_capacity: default_queue_capacity(),
            keep_alive_ms: default_keep_alive_ms(),
        }
    }
}

impl ExecutorSettings {
    /// Pool with the given core/max workers and queue capacity.
    pub fn new(core_workers: usize, max_workers: usize, queue_capacity: usize) -> Self {
        Self {
            core_workers,
            max_workers,
            queue_capacity,
            keep_alive_ms: default_keep_alive_ms(),
        }
    }

    /// Set the keep-alive for workers above the core count.
    pub fn with_keep_alive_ms(mut self, keep_alive_ms: u64) -> Self {
        self.keep_alive_ms = keep_alive_ms;
        self
    }

    /// Keep-alive as a [`Duration`].
    pub fn keep_alive(&self) -> Duration {
        Duration::from_millis(self.keep_alive_ms)
    }

    /// Total jobs the pool accepts before rejecting.
    pub fn capacity(&self) -> usize {
        self.max_workers + self.queue_capacity
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.core_workers == 0 {
            return Err("core_workers must be > 0".to_string());
        }
        if self.max_workers < self.core_workers {
            return Err(format!(
                "max_workers ({}) must be >= core_workers ({})",
                self.max_workers, self.core_workers
            ));
        }
        Ok(())
    }
}

/// Pipeline tuning: batching, completion polling and per-stage pools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Maximum identifiers per batch handed to the loader.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Re-check interval while waiting for a run to complete (ms).
    #[serde(default = "default_completion_poll_ms")]
    pub completion_poll_ms: u64,

    #[serde(default = "default_grouping_pool")]
    pub grouping: ExecutorSettings,

    #[serde(default = "default_filtering_pool")]
    pub filtering: ExecutorSettings,

    #[serde(default = "default_loading_pool")]
    pub loading: ExecutorSettings,

    #[serde(default = "default_document_pool")]
    pub document: ExecutorSettings,

    #[serde(default = "default_commit_pool")]
    pub commit: ExecutorSettings,
}

fn default_batch_size() -> usize {
    100
}

fn default_completion_poll_ms() -> u64 {
    250
}

fn default_grouping_pool() -> ExecutorSettings {
    ExecutorSettings::new(1, 1, 16)
}

fn default_filtering_pool() -> ExecutorSettings {
    ExecutorSettings::new(4, 8, 1_000)
}

fn default_loading_pool() -> ExecutorSettings {
    ExecutorSettings::new(4, 8, 1_000)
}

fn default_document_pool() -> ExecutorSettings {
    ExecutorSettings::new(8, 16, 10_000)
}

fn default_commit_pool() -> ExecutorSettings {
    ExecutorSettings::new(4, 4, 10_000)
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            completion_poll_ms: default_completion_poll_ms(),
            grouping: default_grouping_pool(),
            filtering: default_filtering_pool(),
            loading: default_loading_pool(),
            document: default_document_pool(),
            commit: default_commit_pool(),
        }
    }
}

impl PipelineSettings {
    /// Set the batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the completion poll interval.
    pub fn with_completion_poll_ms(mut self, poll_ms: u64) -> Self {
        self.completion_poll_ms = poll_ms;
        self
    }

    /// Use the same pool sizing for every stage.
    pub fn with_uniform_pools(mut self, pool: ExecutorSettings) -> Self {
        self.grouping = pool.clone();
        self.filtering = pool.clone();
        self.loading = pool.clone();
        self.document = pool.clone();
        self.commit = pool;
        self
    }

    /// Completion poll interval as a [`Duration`].
    pub fn completion_poll(&self) -> Duration {
        Duration::from_millis(self.completion_poll_ms)
    }

    /// Validate batching and every stage pool.
    pub fn validate(&self) -> Result<(), String> {
        if self.batch_size == 0 {
            return Err("batch_size must be > 0".to_string());
        }
        if self.completion_poll_ms == 0 {
            return Err("completion_poll_ms must be > 0".to_string());
        }
        for (name, pool) in [
            ("grouping", &self.grouping),
            ("filtering", &self.filtering),
            ("loading", &self.loading),
            ("document", &self.document),
            ("commit", &self.commit),
        ] {
            pool.validate().map_err(|e| format!("{} pool: {}", name, e))?;
        }
        Ok(())
    }
}

/// When scheduled builds run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSettings {
    /// Cron expression, 6-field (sec min hour day month weekday)
    #[serde(default = "default_cron")]
    pub cron: String,

    /// IANA timezone for the cron expression
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Index types with a scheduled build job
    #[serde(default = "default_scheduled_indexes")]
    pub index_types: Vec<IndexType>,
}

fn default_cron() -> String {
    "0 */5 * * * *".to_string()
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_scheduled_indexes() -> Vec<IndexType> {
    IndexType::ALL.to_vec()
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            cron: default_cron(),
            timezone: default_timezone(),
            index_types: default_scheduled_indexes(),
        }
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Path to RocksDB storage directory holding build statuses
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Pipeline tuning
    #[serde(default)]
    pub pipeline: PipelineSettings,

    /// General-purpose executor for fire-and-forget background work
    #[serde(default = "default_background_pool")]
    pub background: ExecutorSettings,

    /// Scheduled build settings
    #[serde(default)]
    pub schedule: ScheduleSettings,
}

fn default_db_path() -> String {
    ProjectDirs::from("", "", "catalog-indexer")
        .map(|p| p.data_local_dir().join("db"))
        .unwrap_or_else(|| PathBuf::from("./data"))
        .to_string_lossy()
        .to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_background_pool() -> ExecutorSettings {
    ExecutorSettings::new(2, 8, 1_000)
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            log_level: default_log_level(),
            pipeline: PipelineSettings::default(),
            background: default_background_pool(),
            schedule: ScheduleSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (~/.config/catalog-indexer/config.toml)
    /// 3. CLI-specified config file (optional)
    /// 4. Environment variables (INDEXER_*, nested keys joined by `__`)
    ///
    /// The result is validated; CLI flags should be applied by the caller.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, IndexerError> {
        let config_dir = ProjectDirs::from("", "", "catalog-indexer")
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let default_config_path = config_dir.join("config");

        let mut builder = Config::builder()
            .set_default("db_path", default_db_path())
            .map_err(|e| IndexerError::Config(e.to_string()))?
            .set_default("log_level", default_log_level())
            .map_err(|e| IndexerError::Config(e.to_string()))?
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // INDEXER_DB_PATH, INDEXER_PIPELINE__BATCH_SIZE, INDEXER_PIPELINE__LOADING__MAX_WORKERS
        builder = builder.add_source(
            Environment::with_prefix("INDEXER")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let settings: Settings = builder
            .build()
            .map_err(|e| IndexerError::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| IndexerError::Config(e.to_string()))?;

        settings.validate()?;
        Ok(settings)
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<(), IndexerError> {
        self.pipeline.validate().map_err(IndexerError::Config)?;
        self.background
            .validate()
            .map_err(|e| IndexerError::Config(format!("background pool: {}", e)))?;
        Ok(())
    }

    /// Expand ~ in db_path to the home directory
    pub fn expanded_db_path(&self) -> PathBuf {
        if let Some(rest) = self.db_path.strip_prefix("~/") {
            if let Some(home) = std::env::var_os("HOME") {
                return PathBuf::from(home).join(rest);
            }
        }
        PathBuf::from(&self.db_path)
    }
}
