//! Per-job execution history.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum JobResult {
    Success,
    Failed(String),
    /// Not run, e.g. because the previous run was still active.
    Skipped(String),
}

/// Key-value facts a job reports about its run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobOutput {
    pub metadata: HashMap<String, String>,
}

impl JobOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.metadata.insert(key.into(), value.to_string());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_name: String,
    pub cron_expr: String,
    /// When the last run (or skip) was recorded
    pub last_run: Option<DateTime<Utc>>,
    pub last_duration_ms: Option<u64>,
    pub last_result: Option<JobResult>,
    pub run_count: u64,
    pub error_count: u64,
    pub skip_count: u64,
    pub is_running: bool,
    #[serde(default)]
    pub last_run_metadata: HashMap<String, String>,
}

impl JobStatus {
    pub fn new(job_name: String, cron_expr: String) -> Self {
        Self {
            job_name,
            cron_expr,
            last_run: None,
            last_duration_ms: None,
            last_result: None,
            run_count: 0,
            error_count: 0,
            skip_count: 0,
            is_running: false,
            last_run_metadata: HashMap::new(),
        }
    }
}

/// Thread-safe job status table. Updates for unknown job names are ignored.
///
/// ```
/// use indexer_scheduler::{JobRegistry, JobResult};
///
/// let registry = JobRegistry::new();
/// registry.register("index-build-product", "0 */5 * * * *");
///
/// registry.record_start("index-build-product");
/// assert!(registry.is_running("index-build-product"));
///
/// registry.record_complete("index-build-product", JobResult::Success, 1500);
/// assert!(!registry.is_running("index-build-product"));
/// ```
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: DashMap<String, JobStatus>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job, replacing any previous entry with the same name.
    pub fn register(&self, job_name: &str, cron_expr: &str) {
        self.jobs.insert(
            job_name.to_string(),
            JobStatus::new(job_name.to_string(), cron_expr.to_string()),
        );
    }

    pub fn record_start(&self, job_name: &str) {
        if let Some(mut status) = self.jobs.get_mut(job_name) {
            status.is_running = true;
        }
    }

    pub fn record_complete(&self, job_name: &str, result: JobResult, duration_ms: u64) {
        self.record_complete_with_output(job_name, result, duration_ms, JobOutput::new());
    }

    /// Record a finished run. Skips do not count as runs.
    pub fn record_complete_with_output(
        &self,
        job_name: &str,
        result: JobResult,
        duration_ms: u64,
        output: JobOutput,
    ) {
        let Some(mut status) = self.jobs.get_mut(job_name) else {
            return;
        };
        status.last_run = Some(Utc::now());
        match &result {
            JobResult::Skipped(_) => status.skip_count += 1,
            JobResult::Failed(_) => {
                status.is_running = false;
                status.run_count += 1;
                status.error_count += 1;
                status.last_duration_ms = Some(duration_ms);
            }
            JobResult::Success => {
                status.is_running = false;
                status.run_count += 1;
                status.last_duration_ms = Some(duration_ms);
            }
        }
        status.last_result = Some(result);
        status.last_run_metadata = output.metadata;
    }

    pub fn get_status(&self, job_name: &str) -> Option<JobStatus> {
        self.jobs.get(job_name).map(|s| s.clone())
    }

    /// All job statuses, sorted by name.
    pub fn get_all_status(&self) -> Vec<JobStatus> {
        let mut all: Vec<_> = self.jobs.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.job_name.cmp(&b.job_name));
        all
    }

    pub fn is_running(&self, job_name: &str) -> bool {
        self.jobs
            .get(job_name)
            .map(|s| s.is_running)
            .unwrap_or(false)
    }

    /// Number of jobs currently executing.
    pub fn running_count(&self) -> usize {
        self.jobs.iter().filter(|e| e.is_running).count()
    }

    pub fn is_registered(&self, job_name: &str) -> bool {
        self.jobs.contains_key(job_name)
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }
}
