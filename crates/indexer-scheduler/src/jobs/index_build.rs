//! Periodic index builds, one cron job per index type.
//!
//! Each firing runs [`IndexBuildService::build_index_by_name`], which picks a
//! full rebuild or an incremental update on its own. Jobs use
//! [`OverlapPolicy::Skip`] so a slow build never queues up behind itself.

use std::sync::Arc;

use tracing::{info, warn};

use indexer_service::{BuildReport, IndexBuildError, IndexBuildService};
use indexer_types::{IndexType, ScheduleSettings};

use crate::{JobOutput, OverlapPolicy, SchedulerError, SchedulerService};

pub fn index_build_job_name(index_type: IndexType) -> String {
    format!("index-build-{}", index_type.index_name())
}

/// Register a build job for every scheduled index type the service knows.
///
/// Types listed in `settings` but not registered with the service are
/// skipped with a warning. Returns the scheduled types.
pub async fn create_index_build_jobs(
    scheduler: &SchedulerService,
    service: Arc<IndexBuildService>,
    settings: &ScheduleSettings,
) -> Result<Vec<IndexType>, SchedulerError> {
    let registered = service.index_types();
    let mut scheduled = Vec::new();

    for &index_type in &settings.index_types {
        if !registered.contains(&index_type) {
            warn!(index_type = %index_type, "Scheduled index type is not registered, no job created");
            continue;
        }

        let service = Arc::clone(&service);
        scheduler
            .register_job(
                &index_build_job_name(index_type),
                &settings.cron,
                Some(&settings.timezone),
                OverlapPolicy::Skip,
                move || {
                    let service = Arc::clone(&service);
                    async move { run_index_build(&service, index_type).await }
                },
            )
            .await?;
        scheduled.push(index_type);
    }

    info!(count = scheduled.len(), cron = %settings.cron, "Registered index build jobs");
    Ok(scheduled)
}

/// An incomplete run is reported as a job failure; a build already running
/// outside the scheduler is not.
async fn run_index_build(
    service: &IndexBuildService,
    index_type: IndexType,
) -> Result<JobOutput, String> {
    match service.build_index_by_name(index_type.index_name()).await {
        Ok(report) if report.is_complete() => Ok(report_output(&report)),
        Ok(report) => Err(format!("incomplete build: {report}")),
        Err(IndexBuildError::BuildInProgress(_)) => {
            Ok(JobOutput::new().with_metadata("skipped", "build already in progress"))
        }
        Err(e) => Err(e.to_string()),
    }
}

fn report_output(report: &BuildReport) -> JobOutput {
    JobOutput::new()
        .with_metadata("mode", format!("{:?}", report.mode).to_lowercase())
        .with_metadata("incoming", report.incoming)
        .with_metadata("completed", report.completed)
        .with_metadata("deleted", report.deleted)
        .with_metadata("duration_ms", report.duration().num_milliseconds())
}
