//! Bounded async executor.
//!
//! Each pipeline stage owns one of these, and the build service keeps a
//! separate one for fire-and-forget background work. The discipline is the
//! same everywhere:
//!
//! - at most `max_workers` jobs run concurrently
//! - at most `max_workers + queue_capacity` jobs are admitted (running or queued)
//! - core workers are spawned on demand and live until shutdown
//! - workers above `core_workers` are spawned only when the queue is saturated
//!   and exit after `keep_alive` without work
//! - work over capacity is rejected, counted and logged; the caller gets an
//!   `Err` back instead of blocking or panicking

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_channel as chan;
use futures::FutureExt;
use tokio::runtime::Handle;
use tracing::{debug, error, trace, warn};

use indexer_types::ExecutorSettings;

use crate::error::PipelineError;

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Point-in-time view of an executor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutorStats {
    /// Jobs admitted and not yet finished (queued + running)
    pub in_flight: usize,
    /// Workers currently alive
    pub live_workers: usize,
    /// Jobs that ran to the end, including ones that panicked
    pub completed: u64,
    /// Jobs refused because the backlog was full
    pub rejected: u64,
    /// Jobs that panicked
    pub panicked: u64,
}

struct Shared {
    name: String,
    core_workers: usize,
    max_workers: usize,
    queue_capacity: usize,
    keep_alive: Duration,
    jobs_rx: chan::Receiver<Job>,
    in_flight: AtomicUsize,
    live_workers: AtomicUsize,
    completed: AtomicU64,
    rejected: AtomicU64,
    panicked: AtomicU64,
}

/// Worker pool with a bounded backlog and counted rejections.
///
/// Cheap to clone; clones share the same pool.
#[derive(Clone)]
pub struct BoundedExecutor {
    shared: Arc<Shared>,
    jobs_tx: chan::Sender<Job>,
    runtime: Handle,
}

impl BoundedExecutor {
    /// Create an executor on the current tokio runtime.
    ///
    /// Fails with [`PipelineError::Config`] if the settings are invalid or no
    /// runtime is available.
    pub fn new(name: impl Into<String>, settings: &ExecutorSettings) -> Result<Self, PipelineError> {
        let name = name.into();
        settings
            .validate()
            .map_err(|e| PipelineError::Config(format!("{name}: {e}")))?;
        let runtime = Handle::try_current().map_err(|e| {
            PipelineError::Config(format!("{name}: no tokio runtime available: {e}"))
        })?;

        // Admission control bounds the channel, so try_send only fails once closed.
        let (jobs_tx, jobs_rx) = chan::bounded(settings.capacity());

        Ok(Self {
            shared: Arc::new(Shared {
                name,
                core_workers: settings.core_workers,
                max_workers: settings.max_workers,
                queue_capacity: settings.queue_capacity,
                keep_alive: settings.keep_alive(),
                jobs_rx,
                in_flight: AtomicUsize::new(0),
                live_workers: AtomicUsize::new(0),
                completed: AtomicU64::new(0),
                rejected: AtomicU64::new(0),
                panicked: AtomicU64::new(0),
            }),
            jobs_tx,
            runtime,
        })
    }

    /// Executor name used in logs.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Submit a job.
    ///
    /// Never blocks. Returns [`PipelineError::Rejected`] when the backlog is
    /// full and [`PipelineError::Shutdown`] after [`shutdown`](Self::shutdown).
    pub fn execute<F>(&self, job: F) -> Result<(), PipelineError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let shared = &self.shared;
        let capacity = shared.max_workers + shared.queue_capacity;

        let admitted = shared
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < capacity).then_some(n + 1)
            });
        let in_flight = match admitted {
            Ok(previous) => previous + 1,
            Err(current) => {
                let rejected = shared.rejected.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    executor = %shared.name,
                    in_flight = current,
                    capacity,
                    rejected,
                    "Rejected job: backlog full"
                );
                return Err(PipelineError::Rejected {
                    executor: shared.name.clone(),
                });
            }
        };

        if self.jobs_tx.try_send(Box::pin(job)).is_err() {
            shared.in_flight.fetch_sub(1, Ordering::AcqRel);
            return Err(PipelineError::Shutdown(shared.name.clone()));
        }

        self.ensure_workers(in_flight);
        Ok(())
    }

    fn ensure_workers(&self, in_flight: usize) {
        let shared = &self.shared;

        let core_slot = shared
            .live_workers
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                (live < shared.core_workers).then_some(live + 1)
            });
        if core_slot.is_ok() {
            self.spawn_worker(true);
            return;
        }

        // Overflow workers only once the queue portion is saturated.
        let overflow_slot = shared
            .live_workers
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                (live < shared.max_workers && in_flight > live + shared.queue_capacity)
                    .then_some(live + 1)
            });
        if overflow_slot.is_ok() {
            self.spawn_worker(false);
        }
    }

    fn spawn_worker(&self, core: bool) {
        let shared = Arc::clone(&self.shared);
        trace!(executor = %shared.name, core, "Spawning worker");
        self.runtime.spawn(run_worker(shared, core));
    }

    /// True while any job is queued or running.
    pub fn is_busy(&self) -> bool {
        self.shared.in_flight.load(Ordering::Acquire) > 0
    }

    /// Total jobs rejected since creation.
    pub fn rejected_count(&self) -> u64 {
        self.shared.rejected.load(Ordering::Relaxed)
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> ExecutorStats {
        let shared = &self.shared;
        ExecutorStats {
            in_flight: shared.in_flight.load(Ordering::Acquire),
            live_workers: shared.live_workers.load(Ordering::Acquire),
            completed: shared.completed.load(Ordering::Relaxed),
            rejected: shared.rejected.load(Ordering::Relaxed),
            panicked: shared.panicked.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting work. Already queued jobs still run, then workers exit.
    pub fn shutdown(&self) {
        if self.jobs_tx.close() {
            debug!(executor = %self.shared.name, "Executor shut down");
        }
    }

    /// True once [`shutdown`](Self::shutdown) has been called.
    pub fn is_shutdown(&self) -> bool {
        self.jobs_tx.is_closed()
    }
}

async fn run_worker(shared: Arc<Shared>, core: bool) {
    loop {
        let job = if core {
            shared.jobs_rx.recv().await.ok()
        } else {
            match tokio::time::timeout(shared.keep_alive, shared.jobs_rx.recv()).await {
                Ok(received) => received.ok(),
                Err(_) => None,
            }
        };

        let Some(job) = job else {
            break;
        };

        if AssertUnwindSafe(job).catch_unwind().await.is_err() {
            shared.panicked.fetch_add(1, Ordering::Relaxed);
            error!(executor = %shared.name, "Job panicked");
        }
        shared.completed.fetch_add(1, Ordering::Relaxed);
        shared.in_flight.fetch_sub(1, Ordering::AcqRel);
    }

    shared.live_workers.fetch_sub(1, Ordering::AcqRel);
    trace!(executor = %shared.name, core, "Worker exited");
}
