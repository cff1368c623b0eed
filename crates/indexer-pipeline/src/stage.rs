//! Stage and task factory abstraction.
//!
//! A [`Stage`] asks its [`TaskFactory`] for a task bound to each payload and
//! runs it on the stage's own [`BoundedExecutor`]. Tasks forward their output
//! by calling [`Stage::send`] on the next stage, which they receive from the
//! factory at construction time; a stage whose tasks forward nowhere is
//! terminal.
//!
//! `send` never fails towards the caller. Rejections and task failures are
//! settled on the [`PipelineStatus`] with the payload's item count, so the
//! completion check still balances.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{error, trace, warn};

use indexer_types::{ExecutorSettings, IndexType};

use crate::error::{CollaboratorError, PipelineError};
use crate::executor::BoundedExecutor;
use crate::performance::PipelinePerformance;
use crate::status::PipelineStatus;

/// One unit of stage work with its payload already bound.
#[async_trait]
pub trait Task: Send {
    /// Perform the transformation and forward any output.
    ///
    /// An `Err` settles every item of the payload as failed.
    async fn run(self: Box<Self>) -> Result<(), CollaboratorError>;
}

/// Vends one independent [`Task`] per payload. Shared by all sends of a
/// stage, so implementations must be thread-safe.
pub trait TaskFactory<I>: Send + Sync {
    fn create_task(&self, payload: I) -> Box<dyn Task>;

    /// Number of pipeline items the payload stands for. Batches count each
    /// identifier; single entities and documents count one.
    fn item_count(&self, _payload: &I) -> u64 {
        1
    }
}

struct StageInner<I> {
    name: &'static str,
    index_type: IndexType,
    factory: Box<dyn TaskFactory<I>>,
    executor: BoundedExecutor,
    status: Arc<PipelineStatus>,
    performance: Arc<PipelinePerformance>,
}

/// Handle to a pipeline stage. Clones share the same pool.
pub struct Stage<I> {
    inner: Arc<StageInner<I>>,
}

impl<I> Clone for Stage<I> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<I: Send + 'static> Stage<I> {
    /// Build a stage with its own worker pool.
    pub fn new(
        name: &'static str,
        index_type: IndexType,
        factory: impl TaskFactory<I> + 'static,
        pool: &ExecutorSettings,
        status: Arc<PipelineStatus>,
        performance: Arc<PipelinePerformance>,
    ) -> Result<Self, PipelineError> {
        let executor = BoundedExecutor::new(format!("{index_type}.{name}"), pool)?;
        Ok(Self {
            inner: Arc::new(StageInner {
                name,
                index_type,
                factory: Box::new(factory),
                executor,
                status,
                performance,
            }),
        })
    }

    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    /// Hand a payload to this stage.
    pub fn send(&self, payload: I) {
        let inner = &self.inner;
        let items = inner.factory.item_count(&payload);
        let task = inner.factory.create_task(payload);
        inner.performance.increment(&format!("{}.tasks", inner.name));

        let job = {
            let inner = Arc::clone(inner);
            async move {
                let started = Instant::now();
                let outcome = AssertUnwindSafe(task.run()).catch_unwind().await;
                inner
                    .performance
                    .record_duration(&format!("{}.task_us", inner.name), started.elapsed());

                match outcome {
                    Ok(Ok(())) => {
                        trace!(index_type = %inner.index_type, stage = inner.name, items, "Task done");
                    }
                    Ok(Err(e)) => {
                        error!(
                            index_type = %inner.index_type,
                            stage = inner.name,
                            items,
                            error = %e.detail(),
                            "Task failed"
                        );
                        inner.performance.increment(&format!("{}.failed", inner.name));
                        inner.status.record_failed(items);
                    }
                    Err(_) => {
                        error!(
                            index_type = %inner.index_type,
                            stage = inner.name,
                            items,
                            "Task panicked"
                        );
                        inner.performance.increment(&format!("{}.failed", inner.name));
                        inner.status.record_failed(items);
                    }
                }
            }
        };

        if let Err(e) = inner.executor.execute(job) {
            warn!(
                index_type = %inner.index_type,
                stage = inner.name,
                items,
                error = %e,
                "Stage did not accept work"
            );
            inner.performance.add(&format!("{}.rejected", inner.name), items);
            inner.status.record_rejected(items);
        }
    }

    /// True while this stage has queued or running tasks.
    pub fn is_busy(&self) -> bool {
        self.inner.executor.is_busy()
    }

    pub fn executor(&self) -> &BoundedExecutor {
        &self.inner.executor
    }

    /// Stop accepting work; queued tasks still run.
    pub fn shutdown(&self) {
        self.inner.executor.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::Semaphore;

    struct RecordingFactory {
        seen: Arc<Mutex<Vec<u32>>>,
        gate: Option<Arc<Semaphore>>,
    }

    struct RecordingTask {
        value: u32,
        seen: Arc<Mutex<Vec<u32>>>,
        gate: Option<Arc<Semaphore>>,
    }

    #[async_trait]
    impl Task for RecordingTask {
        async fn run(self: Box<Self>) -> Result<(), CollaboratorError> {
            if let Some(gate) = &self.gate {
                let _permit = gate.acquire().await;
            }
            match self.value {
                0 => Err(CollaboratorError::msg("zero is not allowed")),
                99 => panic!("task blew up"),
                v => {
                    self.seen.lock().unwrap().push(v);
                    Ok(())
                }
            }
        }
    }

    impl TaskFactory<u32> for RecordingFactory {
        fn create_task(&self, payload: u32) -> Box<dyn Task> {
            Box::new(RecordingTask {
                value: payload,
                seen: Arc::clone(&self.seen),
                gate: self.gate.clone(),
            })
        }
    }

    fn stage(
        pool: ExecutorSettings,
        gate: Option<Arc<Semaphore>>,
    ) -> (Stage<u32>, Arc<Mutex<Vec<u32>>>, Arc<PipelineStatus>, Arc<PipelinePerformance>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let status = Arc::new(PipelineStatus::new(IndexType::Product));
        let performance = Arc::new(PipelinePerformance::new(IndexType::Product));
        let stage = Stage::new(
            "test",
            IndexType::Product,
            RecordingFactory {
                seen: Arc::clone(&seen),
                gate,
            },
            &pool,
            Arc::clone(&status),
            Arc::clone(&performance),
        )
        .unwrap();
        (stage, seen, status, performance)
    }

    async fn wait_idle(stage: &Stage<u32>) {
        for _ in 0..200 {
            if !stage.is_busy() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("stage never became idle");
    }

    #[tokio::test]
    async fn test_send_runs_tasks() {
        let (stage, seen, _status, performance) = stage(ExecutorSettings::new(2, 2, 10), None);
        for v in 1..=3 {
            stage.send(v);
        }
        wait_idle(&stage).await;

        let mut seen = seen.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, vec![1, 2, 3]);
        assert_eq!(performance.counter("test.tasks"), 3);
        assert_eq!(performance.statistic("test.task_us").unwrap().count, 3);
    }

    #[tokio::test]
    async fn test_failures_are_contained_and_counted() {
        let (stage, seen, status, performance) = stage(ExecutorSettings::new(1, 1, 10), None);
        stage.send(0);
        stage.send(99);
        stage.send(7);
        wait_idle(&stage).await;

        assert_eq!(*seen.lock().unwrap(), vec![7]);
        assert_eq!(status.snapshot().failed, 2);
        assert_eq!(performance.counter("test.failed"), 2);
    }

    #[tokio::test]
    async fn test_rejections_settle_without_error() {
        let gate = Arc::new(Semaphore::new(0));
        let (stage, _seen, status, performance) =
            stage(ExecutorSettings::new(1, 1, 2), Some(Arc::clone(&gate)));

        for v in 1..=5 {
            stage.send(v);
        }
        assert_eq!(status.rejected(), 2);
        assert_eq!(performance.counter("test.rejected"), 2);
        assert_eq!(stage.executor().rejected_count(), 2);

        gate.add_permits(3);
        wait_idle(&stage).await;
    }
}
