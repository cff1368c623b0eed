//! Index build orchestration.
//!
//! Each trigger moves an index type from `COMPLETE` into
//! `REBUILD_IN_PROGRESS` or `UPDATE_IN_PROGRESS`, runs the pipeline to
//! completion, and moves it back to `COMPLETE`. Both transitions are
//! persisted before anything else happens, so a crash mid-rebuild is visible
//! on the next trigger and forces another full rebuild.
//!
//! `last_build_date` is set to the *start* of a complete run. Changes made
//! while the run was executing are therefore picked up by the next update.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use indexer_pipeline::{BoundedExecutor, CommitSink, IndexingStatistics, PipelineRunner};
use indexer_storage::{BuildStatusStore, NotificationStore};
use indexer_types::{
    ExecutorSettings, Identifier, IndexBuildStatus, IndexNotification, IndexStatus, IndexType,
    UpdateType,
};

use crate::definition::IndexDefinition;
use crate::error::IndexBuildError;
use crate::policy::RebuildPolicy;
use crate::report::{BuildMode, BuildOutcome, BuildReport, RebuildReason};
use crate::source::IdentifierSource;

struct RegisteredIndex {
    definition: IndexDefinition,
    /// Held for the whole run; a second trigger fails fast instead of queuing.
    run_lock: Mutex<()>,
}

/// Work derived from the change source and pending notifications.
struct RunPlan {
    reindex: Vec<Identifier>,
    delete: Vec<Identifier>,
}

pub struct IndexBuildService {
    status_store: Arc<dyn BuildStatusStore>,
    notifications: Arc<dyn NotificationStore>,
    statistics: Arc<IndexingStatistics>,
    background: BoundedExecutor,
    indexes: HashMap<IndexType, RegisteredIndex>,
    shut_down: AtomicBool,
}

impl IndexBuildService {
    /// Create a service with no registered indexes.
    ///
    /// `background` sizes the executor used by [`trigger_build`](Self::trigger_build).
    /// Must be called inside a tokio runtime.
    pub fn new(
        status_store: Arc<dyn BuildStatusStore>,
        notifications: Arc<dyn NotificationStore>,
        statistics: Arc<IndexingStatistics>,
        background: &ExecutorSettings,
    ) -> Result<Self, IndexBuildError> {
        Ok(Self {
            status_store,
            notifications,
            statistics,
            background: BoundedExecutor::new("index-build-background", background)?,
            indexes: HashMap::new(),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Add an index definition. Each index type may be registered once.
    pub fn register(&mut self, definition: IndexDefinition) -> Result<(), IndexBuildError> {
        let index_type = definition.index_type();
        if self.indexes.contains_key(&index_type) {
            return Err(IndexBuildError::Config(format!(
                "{index_type} is already registered"
            )));
        }
        self.indexes.insert(
            index_type,
            RegisteredIndex {
                definition,
                run_lock: Mutex::new(()),
            },
        );
        info!(index_type = %index_type, "Registered index");
        Ok(())
    }

    /// Registered index types, sorted.
    pub fn index_types(&self) -> Vec<IndexType> {
        let mut types: Vec<_> = self.indexes.keys().copied().collect();
        types.sort();
        types
    }

    pub fn statistics(&self) -> &Arc<IndexingStatistics> {
        &self.statistics
    }

    /// Build an index by name, logging start and duration.
    pub async fn build_index_by_name(&self, name: &str) -> Result<BuildReport, IndexBuildError> {
        let index_type: IndexType = name.parse()?;
        let timer = Instant::now();
        info!(index_type = %index_type, "Index build job started");

        let result = self.build_index(index_type).await;
        match &result {
            Ok(report) => info!(
                index_type = %index_type,
                outcome = ?report.outcome,
                elapsed_ms = timer.elapsed().as_millis() as u64,
                "Index build job finished"
            ),
            Err(e) => warn!(
                index_type = %index_type,
                error = %e,
                elapsed_ms = timer.elapsed().as_millis() as u64,
                "Index build job failed"
            ),
        }
        result
    }

    /// Queue a `Rebuild` notification for the index type.
    ///
    /// Safe while a build runs: that build only acknowledges notifications it
    /// read at its start, so the request is picked up by the next trigger.
    /// Returns the notification's sequence number.
    pub fn request_rebuild(&self, index_type: IndexType) -> Result<u64, IndexBuildError> {
        if !self.indexes.contains_key(&index_type) {
            return Err(IndexBuildError::NotRegistered(index_type));
        }
        let sequence = self
            .notifications
            .add_notification(&IndexNotification::rebuild(index_type))?;
        info!(index_type = %index_type, sequence, "Rebuild requested");
        Ok(sequence)
    }

    /// Submit a build to the background executor and return immediately.
    pub fn trigger_build(self: &Arc<Self>, index_type: IndexType) -> Result<(), IndexBuildError> {
        if !self.indexes.contains_key(&index_type) {
            return Err(IndexBuildError::NotRegistered(index_type));
        }
        let service = Arc::clone(self);
        self.background.execute(async move {
            if let Err(e) = service.build_index(index_type).await {
                warn!(index_type = %index_type, error = %e, "Background build failed");
            }
        })?;
        Ok(())
    }

    /// Run one build for the index type and wait for it to finish.
    pub async fn build_index(&self, index_type: IndexType) -> Result<BuildReport, IndexBuildError> {
        let registered = self
            .indexes
            .get(&index_type)
            .ok_or(IndexBuildError::NotRegistered(index_type))?;
        let _running = registered
            .run_lock
            .try_lock()
            .map_err(|_| IndexBuildError::BuildInProgress(index_type))?;
        if self.is_shutdown() {
            return Err(IndexBuildError::Shutdown(index_type));
        }
        let definition = &registered.definition;

        let started_at = Utc::now();
        let mut status = self.load_status(index_type)?;
        status.operation_start_date = Some(started_at);

        let pending = self.notifications.pending_notifications(index_type)?;
        let acknowledge_up_to = pending.last().map(|(seq, _)| *seq);
        let notifications: Vec<IndexNotification> = pending.into_iter().map(|(_, n)| n).collect();

        let rebuild_reason = rebuild_reason(&status, &notifications, definition);
        let mode = match rebuild_reason {
            Some(_) => BuildMode::Rebuild,
            None => BuildMode::Update,
        };
        let since = status.last_build_date;

        status.status = match mode {
            BuildMode::Rebuild => IndexStatus::RebuildInProgress,
            BuildMode::Update => IndexStatus::UpdateInProgress,
        };
        self.persist(&status)?;
        info!(
            index_type = %index_type,
            mode = ?mode,
            reason = ?rebuild_reason,
            since = ?since,
            notifications = notifications.len(),
            "Index build started"
        );

        let mut report = BuildReport::new(index_type, mode, rebuild_reason, started_at);

        let plan = match self.plan_run(definition, mode, since, &notifications).await {
            Ok(plan) => plan,
            Err(e) => {
                self.finish(&mut status, &mut report)?;
                return Err(e);
            }
        };

        // Nothing has touched the index yet; leave it as it is.
        if self.is_shutdown() {
            self.finish(&mut status, &mut report)?;
            return Err(IndexBuildError::Shutdown(index_type));
        }

        if mode == BuildMode::Rebuild {
            if let Err(e) = definition.sink.remove_all().await {
                self.finish(&mut status, &mut report)?;
                return Err(IndexBuildError::Sink {
                    index_type,
                    source: e,
                });
            }
        }

        for &id in &plan.delete {
            match definition.sink.remove(id).await {
                Ok(()) => report.deleted += 1,
                Err(e) => {
                    report.delete_failures += 1;
                    error!(index_type = %index_type, id, error = %e.detail(), "Failed to remove document");
                }
            }
        }

        let pipeline = &definition.pipeline;
        pipeline.start(plan.reindex);
        pipeline.wait_until_completed().await;
        report.absorb(&pipeline.status().snapshot());

        // Stages refused work because of shutdown; publishing would expose a
        // partial index.
        if report.rejected > 0 && self.is_shutdown() {
            warn!(
                index_type = %index_type,
                rejected = report.rejected,
                "Shutdown during build, skipping commit"
            );
            report.outcome = report.judge();
            self.finish(&mut status, &mut report)?;
            return Err(IndexBuildError::Shutdown(index_type));
        }

        match definition.sink.commit().await {
            Ok(()) => report.committed = true,
            Err(e) => error!(index_type = %index_type, error = %e.detail(), "Commit failed"),
        }

        report.outcome = report.judge();
        self.finish(&mut status, &mut report)?;

        if report.is_complete() {
            if let Some(up_to) = acknowledge_up_to {
                let removed = self
                    .notifications
                    .acknowledge_notifications(index_type, up_to)?;
                info!(index_type = %index_type, removed, "Acknowledged notifications");
            }
        }

        Ok(report)
    }

    /// Stop the background executor and every pipeline.
    ///
    /// Builds that have not started yet are refused with
    /// [`IndexBuildError::Shutdown`], including ones still queued on the
    /// background executor. A running build is abandoned without a commit.
    pub fn shutdown(&self) {
        self.shut_down.store(true, Ordering::Release);
        self.background.shutdown();
        for registered in self.indexes.values() {
            registered.definition.pipeline.shutdown();
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    fn load_status(&self, index_type: IndexType) -> Result<IndexBuildStatus, IndexBuildError> {
        Ok(self
            .status_store
            .load_build_status(index_type)?
            .unwrap_or_else(|| IndexBuildStatus::new(index_type)))
    }

    fn persist(&self, status: &IndexBuildStatus) -> Result<(), IndexBuildError> {
        self.status_store.save_build_status(status)?;
        self.statistics
            .attach_build_status(status.index_type, status.clone())?;
        Ok(())
    }

    async fn plan_run(
        &self,
        definition: &IndexDefinition,
        mode: BuildMode,
        since: Option<DateTime<Utc>>,
        notifications: &[IndexNotification],
    ) -> Result<RunPlan, IndexBuildError> {
        let index_type = definition.index_type;
        let source_error = |source| IndexBuildError::IdentifierSource { index_type, source };
        let source = &definition.source;

        let since = match (mode, since) {
            (BuildMode::Update, Some(since)) => since,
            _ => {
                let reindex = source.find_all_identifiers().await.map_err(source_error)?;
                return Ok(RunPlan {
                    reindex: dedup(reindex),
                    delete: Vec::new(),
                });
            }
        };

        let mut reindex: BTreeSet<Identifier> = source
            .find_changed_identifiers_since(since)
            .await
            .map_err(source_error)?
            .into_iter()
            .collect();
        let mut delete: BTreeSet<Identifier> = source
            .find_deleted_identifiers_since(since)
            .await
            .map_err(source_error)?
            .into_iter()
            .collect();

        for notification in notifications {
            match (notification.update_type, notification.affected_id) {
                (UpdateType::Update, Some(id)) => {
                    reindex.insert(id);
                }
                (UpdateType::Delete, Some(id)) => {
                    delete.insert(id);
                }
                _ => {}
            }
        }

        // Deleted wins over changed.
        reindex.retain(|id| !delete.contains(id));

        Ok(RunPlan {
            reindex: reindex.into_iter().collect(),
            delete: delete.into_iter().collect(),
        })
    }

    /// Release the in-progress state and record the run's effect on
    /// `last_build_date`.
    fn finish(
        &self,
        status: &mut IndexBuildStatus,
        report: &mut BuildReport,
    ) -> Result<(), IndexBuildError> {
        report.finished_at = Utc::now();
        match (report.outcome, report.mode) {
            (BuildOutcome::Complete, _) => status.last_build_date = Some(report.started_at),
            // Keep the old date so the next update re-derives the same changes.
            (BuildOutcome::Incomplete, BuildMode::Update) => {}
            // Force the next run to be a full rebuild again.
            (BuildOutcome::Incomplete, BuildMode::Rebuild) => status.last_build_date = None,
        }
        status.status = IndexStatus::Complete;
        self.persist(status)?;

        if report.is_complete() {
            info!(index_type = %report.index_type, report = %report, "Index build complete");
        } else {
            warn!(index_type = %report.index_type, report = %report, "Index build incomplete");
        }
        Ok(())
    }
}

fn rebuild_reason(
    status: &IndexBuildStatus,
    notifications: &[IndexNotification],
    definition: &IndexDefinition,
) -> Option<RebuildReason> {
    if status.last_build_date.is_none() {
        Some(RebuildReason::NeverBuilt)
    } else if status.was_rebuild_interrupted() {
        Some(RebuildReason::Interrupted)
    } else if notifications
        .iter()
        .any(|n| n.update_type == UpdateType::Rebuild)
    {
        Some(RebuildReason::Notification)
    } else if definition.rebuild_policy.rebuild_required(status) {
        Some(RebuildReason::Policy)
    } else {
        None
    }
}

fn dedup(ids: Vec<Identifier>) -> Vec<Identifier> {
    ids.into_iter()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::MaxAgeRebuildPolicy;
    use crate::source::IdentifierSource;
    use async_trait::async_trait;
    use indexer_pipeline::{
        CollaboratorError, DocumentBuilder, EntityLoader, PipelineCollaborators,
    };
    use indexer_storage::Storage;
    use indexer_types::{PipelineSettings, SearchDocument};
    use std::collections::BTreeMap;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::Semaphore;

    /// Entities with modification times, plus tombstones.
    #[derive(Default)]
    struct Catalog {
        modified: StdMutex<BTreeMap<Identifier, DateTime<Utc>>>,
        deleted: StdMutex<BTreeMap<Identifier, DateTime<Utc>>>,
        poisoned: StdMutex<BTreeSet<Identifier>>,
        calls: StdMutex<Vec<&'static str>>,
        fail: AtomicBool,
        gate: StdMutex<Option<Arc<Semaphore>>>,
        observe: StdMutex<Option<Arc<Storage>>>,
        observed: StdMutex<Vec<IndexStatus>>,
    }

    impl Catalog {
        fn with_ids(ids: impl IntoIterator<Item = Identifier>) -> Self {
            let long_ago = Utc::now() - chrono::Duration::hours(1);
            let catalog = Catalog::default();
            catalog
                .modified
                .lock()
                .unwrap()
                .extend(ids.into_iter().map(|id| (id, long_ago)));
            catalog
        }

        fn touch(&self, id: Identifier) {
            self.modified.lock().unwrap().insert(id, Utc::now());
        }

        fn delete(&self, id: Identifier) {
            self.modified.lock().unwrap().remove(&id);
            self.deleted.lock().unwrap().insert(id, Utc::now());
        }

        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: &'static str) -> Result<(), CollaboratorError> {
            self.calls.lock().unwrap().push(call);
            if let Some(storage) = self.observe.lock().unwrap().as_ref() {
                if let Ok(Some(status)) = storage.load_build_status(IndexType::Product) {
                    self.observed.lock().unwrap().push(status.status);
                }
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(CollaboratorError::msg("catalog database unavailable"));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl IdentifierSource for Catalog {
        async fn find_all_identifiers(&self) -> Result<Vec<Identifier>, CollaboratorError> {
            self.record("all")?;
            let gate = self.gate.lock().unwrap().clone();
            if let Some(gate) = gate {
                let _permit = gate.acquire().await;
            }
            Ok(self.modified.lock().unwrap().keys().copied().collect())
        }

        async fn find_changed_identifiers_since(
            &self,
            since: DateTime<Utc>,
        ) -> Result<Vec<Identifier>, CollaboratorError> {
            self.record("changed")?;
            Ok(self
                .modified
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, at)| **at >= since)
                .map(|(id, _)| *id)
                .collect())
        }

        async fn find_deleted_identifiers_since(
            &self,
            since: DateTime<Utc>,
        ) -> Result<Vec<Identifier>, CollaboratorError> {
            self.record("deleted")?;
            Ok(self
                .deleted
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, at)| **at >= since)
                .map(|(id, _)| *id)
                .collect())
        }
    }

    struct CatalogLoader(Arc<Catalog>);

    #[async_trait]
    impl EntityLoader<Identifier> for CatalogLoader {
        async fn load_batch(&self, ids: &[Identifier]) -> Result<Vec<Identifier>, CollaboratorError> {
            let modified = self.0.modified.lock().unwrap();
            Ok(ids.iter().copied().filter(|id| modified.contains_key(id)).collect())
        }
    }

    struct IdBuilder(Arc<Catalog>);

    impl DocumentBuilder<Identifier> for IdBuilder {
        fn build(&self, id: &Identifier) -> Result<SearchDocument, CollaboratorError> {
            if self.0.poisoned.lock().unwrap().contains(id) {
                return Err(CollaboratorError::msg("cannot map entity"));
            }
            Ok(SearchDocument::new(IndexType::Product, *id).with_field("code", format!("P{id}")))
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        documents: StdMutex<BTreeMap<Identifier, SearchDocument>>,
        removed: StdMutex<Vec<Identifier>>,
        cleared: StdMutex<usize>,
        commits: StdMutex<usize>,
    }

    impl RecordingSink {
        fn ids(&self) -> Vec<Identifier> {
            self.documents.lock().unwrap().keys().copied().collect()
        }
    }

    #[async_trait]
    impl CommitSink for RecordingSink {
        async fn submit(&self, document: SearchDocument) -> Result<(), CollaboratorError> {
            self.documents.lock().unwrap().insert(document.id, document);
            Ok(())
        }

        async fn remove(&self, id: Identifier) -> Result<(), CollaboratorError> {
            self.removed.lock().unwrap().push(id);
            self.documents.lock().unwrap().remove(&id);
            Ok(())
        }

        async fn remove_all(&self) -> Result<(), CollaboratorError> {
            *self.cleared.lock().unwrap() += 1;
            self.documents.lock().unwrap().clear();
            Ok(())
        }

        async fn commit(&self) -> Result<(), CollaboratorError> {
            *self.commits.lock().unwrap() += 1;
            Ok(())
        }
    }

    struct Fixture {
        service: Arc<IndexBuildService>,
        storage: Arc<Storage>,
        catalog: Arc<Catalog>,
        sink: Arc<RecordingSink>,
        _temp_dir: TempDir,
    }

    impl Fixture {
        fn stored_status(&self) -> IndexBuildStatus {
            self.storage
                .load_build_status(IndexType::Product)
                .unwrap()
                .unwrap()
        }
    }

    fn fixture(ids: impl IntoIterator<Item = Identifier>) -> Fixture {
        fixture_with_policy(ids, None)
    }

    fn fixture_with_policy(
        ids: impl IntoIterator<Item = Identifier>,
        policy: Option<Arc<dyn RebuildPolicy>>,
    ) -> Fixture {
        let temp_dir = TempDir::new().unwrap();
        let storage = Arc::new(Storage::open(temp_dir.path()).unwrap());
        let statistics = Arc::new(IndexingStatistics::new());
        let catalog = Arc::new(Catalog::with_ids(ids));
        let sink = Arc::new(RecordingSink::default());

        let settings = PipelineSettings::default()
            .with_batch_size(2)
            .with_completion_poll_ms(10)
            .with_uniform_pools(ExecutorSettings::new(2, 4, 100));
        let mut builder = IndexDefinition::builder(IndexType::Product)
            .identifier_source(catalog.clone())
            .entity_pipeline(
                &settings,
                &statistics,
                PipelineCollaborators::<Identifier>::new(
                    Arc::new(CatalogLoader(Arc::clone(&catalog))),
                    Arc::new(IdBuilder(Arc::clone(&catalog))),
                    sink.clone(),
                ),
            )
            .unwrap();
        if let Some(policy) = policy {
            builder = builder.rebuild_policy(policy);
        }

        let mut service = IndexBuildService::new(
            storage.clone(),
            storage.clone(),
            statistics,
            &ExecutorSettings::new(1, 1, 4),
        )
        .unwrap();
        service.register(builder.build().unwrap()).unwrap();

        Fixture {
            service: Arc::new(service),
            storage,
            catalog,
            sink,
            _temp_dir: temp_dir,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_first_build_is_full_rebuild() {
        let f = fixture([1, 2, 3]);

        let report = f.service.build_index(IndexType::Product).await.unwrap();

        assert_eq!(report.mode, BuildMode::Rebuild);
        assert_eq!(report.rebuild_reason, Some(RebuildReason::NeverBuilt));
        assert_eq!(report.outcome, BuildOutcome::Complete);
        assert_eq!(report.incoming, 3);
        assert_eq!(report.completed, 3);
        assert_eq!(f.catalog.calls(), vec!["all"]);
        assert_eq!(f.sink.ids(), vec![1, 2, 3]);
        assert_eq!(*f.sink.cleared.lock().unwrap(), 1);
        assert_eq!(*f.sink.commits.lock().unwrap(), 1);

        let stored = f.stored_status();
        assert_eq!(stored.status, IndexStatus::Complete);
        // Run start, not completion
        assert_eq!(
            stored.last_build_date.unwrap().timestamp_millis(),
            report.started_at.timestamp_millis()
        );
        assert!(report.started_at <= report.finished_at);
        assert_eq!(f.service.statistics().index_status("product"), "COMPLETE");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_second_build_is_incremental() {
        let f = fixture([1, 2, 3]);
        let first = f.service.build_index(IndexType::Product).await.unwrap();

        f.catalog.touch(2);
        f.catalog.delete(3);
        let second = f.service.build_index(IndexType::Product).await.unwrap();

        assert_eq!(second.mode, BuildMode::Update);
        assert_eq!(second.rebuild_reason, None);
        assert!(second.is_complete());
        assert_eq!(second.incoming, 1);
        assert_eq!(second.completed, 1);
        assert_eq!(second.deleted, 1);
        assert_eq!(f.catalog.calls(), vec!["all", "changed", "deleted"]);
        assert_eq!(*f.sink.removed.lock().unwrap(), vec![3]);
        assert_eq!(f.sink.ids(), vec![1, 2]);
        // Only the first run clears the index
        assert_eq!(*f.sink.cleared.lock().unwrap(), 1);

        let stored = f.stored_status();
        assert!(stored.last_build_date.unwrap() > first.started_at);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_interrupted_rebuild_forces_full_rebuild() {
        let f = fixture([1, 2]);
        let mut crashed = IndexBuildStatus::new(IndexType::Product);
        crashed.status = IndexStatus::RebuildInProgress;
        crashed.last_build_date = Some(Utc::now() - chrono::Duration::days(1));
        f.storage.save_build_status(&crashed).unwrap();

        let report = f.service.build_index(IndexType::Product).await.unwrap();
        assert_eq!(report.mode, BuildMode::Rebuild);
        assert_eq!(report.rebuild_reason, Some(RebuildReason::Interrupted));
        assert_eq!(f.catalog.calls(), vec!["all"]);
        assert_eq!(f.stored_status().status, IndexStatus::Complete);

        // Back to incremental once the rebuild went through
        let report = f.service.build_index(IndexType::Product).await.unwrap();
        assert_eq!(report.mode, BuildMode::Update);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_interrupted_update_stays_incremental() {
        let f = fixture([1, 2]);
        let mut crashed = IndexBuildStatus::new(IndexType::Product);
        crashed.status = IndexStatus::UpdateInProgress;
        crashed.last_build_date = Some(Utc::now() - chrono::Duration::minutes(5));
        f.storage.save_build_status(&crashed).unwrap();

        let report = f.service.build_index(IndexType::Product).await.unwrap();
        assert_eq!(report.mode, BuildMode::Update);
        assert_eq!(f.catalog.calls(), vec!["changed", "deleted"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_in_progress_status_persisted_before_dispatch() {
        let f = fixture([1]);
        *f.catalog.observe.lock().unwrap() = Some(Arc::clone(&f.storage));

        f.service.build_index(IndexType::Product).await.unwrap();
        f.catalog.touch(1);
        f.service.build_index(IndexType::Product).await.unwrap();

        assert_eq!(
            *f.catalog.observed.lock().unwrap(),
            vec![
                IndexStatus::RebuildInProgress,
                IndexStatus::UpdateInProgress,
                IndexStatus::UpdateInProgress
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_rebuild_notification_forces_rebuild() {
        let f = fixture([1, 2]);
        f.service.build_index(IndexType::Product).await.unwrap();

        f.storage
            .add_notification(&IndexNotification::rebuild(IndexType::Product))
            .unwrap();
        let report = f.service.build_index(IndexType::Product).await.unwrap();

        assert_eq!(report.rebuild_reason, Some(RebuildReason::Notification));
        assert!(f
            .storage
            .pending_notifications(IndexType::Product)
            .unwrap()
            .is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_update_and_delete_notifications() {
        let f = fixture([1, 2, 3]);
        f.service.build_index(IndexType::Product).await.unwrap();

        f.storage
            .add_notification(&IndexNotification::update(IndexType::Product, 1))
            .unwrap();
        f.storage
            .add_notification(&IndexNotification::delete(IndexType::Product, 2))
            .unwrap();
        // Notifications for other indexes are not consumed
        f.storage
            .add_notification(&IndexNotification::rebuild(IndexType::Category))
            .unwrap();

        let report = f.service.build_index(IndexType::Product).await.unwrap();
        assert_eq!(report.mode, BuildMode::Update);
        assert_eq!(report.completed, 1);
        assert_eq!(report.deleted, 1);
        assert_eq!(*f.sink.removed.lock().unwrap(), vec![2]);
        assert!(f
            .storage
            .pending_notifications(IndexType::Product)
            .unwrap()
            .is_empty());
        assert_eq!(
            f.storage
                .pending_notifications(IndexType::Category)
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_incomplete_update_keeps_last_build_date() {
        let f = fixture([1, 2, 3]);
        f.service.build_index(IndexType::Product).await.unwrap();
        let before = f.stored_status().last_build_date;

        f.catalog.poisoned.lock().unwrap().insert(2);
        f.catalog.touch(1);
        f.catalog.touch(2);
        f.storage
            .add_notification(&IndexNotification::update(IndexType::Product, 3))
            .unwrap();

        let report = f.service.build_index(IndexType::Product).await.unwrap();
        assert_eq!(report.outcome, BuildOutcome::Incomplete);
        assert_eq!(report.failed, 1);
        assert_eq!(report.completed, 2);

        let stored = f.stored_status();
        assert_eq!(stored.status, IndexStatus::Complete);
        assert_eq!(stored.last_build_date, before);
        // Kept for the next attempt
        assert_eq!(
            f.storage
                .pending_notifications(IndexType::Product)
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_incomplete_rebuild_clears_last_build_date() {
        let f = fixture([1, 2, 3]);
        f.catalog.poisoned.lock().unwrap().insert(1);

        let report = f.service.build_index(IndexType::Product).await.unwrap();
        assert_eq!(report.mode, BuildMode::Rebuild);
        assert_eq!(report.outcome, BuildOutcome::Incomplete);
        assert!(f.stored_status().last_build_date.is_none());

        f.catalog.poisoned.lock().unwrap().clear();
        let report = f.service.build_index(IndexType::Product).await.unwrap();
        assert_eq!(report.rebuild_reason, Some(RebuildReason::NeverBuilt));
        assert!(report.is_complete());
        assert_eq!(f.sink.ids(), vec![1, 2, 3]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_build_is_refused() {
        let f = fixture([1, 2]);
        let gate = Arc::new(Semaphore::new(0));
        *f.catalog.gate.lock().unwrap() = Some(Arc::clone(&gate));

        let service = Arc::clone(&f.service);
        let running = tokio::spawn(async move { service.build_index(IndexType::Product).await });

        tokio::time::timeout(Duration::from_secs(5), async {
            while f.catalog.calls().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let second = f.service.build_index(IndexType::Product).await;
        assert!(matches!(
            second,
            Err(IndexBuildError::BuildInProgress(IndexType::Product))
        ));

        gate.add_permits(1);
        let first = running.await.unwrap().unwrap();
        assert!(first.is_complete());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_source_failure_releases_in_progress_state() {
        let f = fixture([1]);
        f.catalog.fail.store(true, Ordering::SeqCst);

        let result = f.service.build_index(IndexType::Product).await;
        assert!(matches!(
            result,
            Err(IndexBuildError::IdentifierSource { .. })
        ));

        let stored = f.stored_status();
        assert_eq!(stored.status, IndexStatus::Complete);
        assert!(stored.last_build_date.is_none());
        assert!(f.sink.ids().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_rebuild_policy() {
        let f = fixture_with_policy(
            [1],
            Some(Arc::new(MaxAgeRebuildPolicy::new(chrono::Duration::zero()))),
        );
        f.service.build_index(IndexType::Product).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let report = f.service.build_index(IndexType::Product).await.unwrap();
        assert_eq!(report.rebuild_reason, Some(RebuildReason::Policy));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_unknown_and_unregistered_indexes() {
        let f = fixture([1]);
        assert!(matches!(
            f.service.build_index_by_name("widgets").await,
            Err(IndexBuildError::UnknownIndexType(_))
        ));
        assert!(matches!(
            f.service.build_index(IndexType::Category).await,
            Err(IndexBuildError::NotRegistered(IndexType::Category))
        ));
        assert!(matches!(
            f.service.trigger_build(IndexType::Category),
            Err(IndexBuildError::NotRegistered(_))
        ));

        let report = f.service.build_index_by_name("PRODUCT").await.unwrap();
        assert!(report.is_complete());
        assert_eq!(f.service.index_types(), vec![IndexType::Product]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_trigger_build_runs_in_background() {
        let f = fixture([1, 2, 3]);
        f.service.trigger_build(IndexType::Product).unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let done = f
                    .storage
                    .load_build_status(IndexType::Product)
                    .unwrap()
                    .map(|s| s.last_build_date.is_some())
                    .unwrap_or(false);
                if done {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(f.sink.ids(), vec![1, 2, 3]);
        f.service.shutdown();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_rebuild_requested_during_build_survives_it() {
        let f = fixture([1, 2]);
        f.service.build_index(IndexType::Product).await.unwrap();

        // Full rebuild so the gated `all` query holds the run open
        f.service.request_rebuild(IndexType::Product).unwrap();
        let gate = Arc::new(Semaphore::new(0));
        *f.catalog.gate.lock().unwrap() = Some(Arc::clone(&gate));

        let service = Arc::clone(&f.service);
        let running = tokio::spawn(async move { service.build_index(IndexType::Product).await });
        tokio::time::timeout(Duration::from_secs(5), async {
            while f.catalog.calls().len() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        f.service.request_rebuild(IndexType::Product).unwrap();
        gate.add_permits(2);
        let during = running.await.unwrap().unwrap();
        assert_eq!(during.rebuild_reason, Some(RebuildReason::Notification));
        assert!(during.is_complete());
        assert_eq!(
            f.storage.pending_notifications(IndexType::Product).unwrap().len(),
            1
        );

        let next = f.service.build_index(IndexType::Product).await.unwrap();
        assert_eq!(next.rebuild_reason, Some(RebuildReason::Notification));
        assert!(f
            .storage
            .pending_notifications(IndexType::Product)
            .unwrap()
            .is_empty());

        assert!(matches!(
            f.service.request_rebuild(IndexType::Sku),
            Err(IndexBuildError::NotRegistered(IndexType::Sku))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_build_after_shutdown_is_refused() {
        let f = fixture([1, 2, 3]);
        f.service.shutdown();
        assert!(f.service.is_shutdown());

        let result = f.service.build_index(IndexType::Product).await;
        assert!(matches!(
            result,
            Err(IndexBuildError::Shutdown(IndexType::Product))
        ));
        assert!(f.catalog.calls().is_empty());
        assert_eq!(*f.sink.cleared.lock().unwrap(), 0);
        assert_eq!(*f.sink.commits.lock().unwrap(), 0);
        assert!(f
            .storage
            .load_build_status(IndexType::Product)
            .unwrap()
            .is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_shutdown_during_rebuild_leaves_index_untouched() {
        let f = fixture([1, 2, 3]);
        let gate = Arc::new(Semaphore::new(0));
        *f.catalog.gate.lock().unwrap() = Some(Arc::clone(&gate));

        let service = Arc::clone(&f.service);
        let running = tokio::spawn(async move { service.build_index(IndexType::Product).await });

        tokio::time::timeout(Duration::from_secs(5), async {
            while f.catalog.calls().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        f.service.shutdown();
        gate.add_permits(1);

        let result = running.await.unwrap();
        assert!(matches!(
            result,
            Err(IndexBuildError::Shutdown(IndexType::Product))
        ));
        assert_eq!(*f.sink.cleared.lock().unwrap(), 0);
        assert_eq!(*f.sink.commits.lock().unwrap(), 0);
        assert!(f.sink.ids().is_empty());

        // Released, and the next start rebuilds from scratch
        let stored = f.stored_status();
        assert_eq!(stored.status, IndexStatus::Complete);
        assert!(stored.last_build_date.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_queued_trigger_after_shutdown_does_not_publish() {
        let f = fixture([1, 2]);
        let gate = Arc::new(Semaphore::new(0));
        *f.catalog.gate.lock().unwrap() = Some(Arc::clone(&gate));

        // The first build holds the only background worker; the second one queues.
        f.service.trigger_build(IndexType::Product).unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while f.catalog.calls().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        f.service.trigger_build(IndexType::Product).unwrap();

        f.service.shutdown();
        gate.add_permits(2);

        tokio::time::timeout(Duration::from_secs(5), async {
            while f.service.background.is_busy() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(f.catalog.calls(), vec!["all"]);
        assert_eq!(*f.sink.cleared.lock().unwrap(), 0);
        assert_eq!(*f.sink.commits.lock().unwrap(), 0);
        assert_eq!(f.stored_status().status, IndexStatus::Complete);
    }

    #[tokio::test]
    async fn test_register_twice_is_a_config_error() {
        let f = fixture([1]);
        let statistics = IndexingStatistics::new();
        let definition = IndexDefinition::builder(IndexType::Product)
            .identifier_source(f.catalog.clone())
            .entity_pipeline(
                &PipelineSettings::default(),
                &statistics,
                PipelineCollaborators::<Identifier>::new(
                    Arc::new(CatalogLoader(Arc::clone(&f.catalog))),
                    Arc::new(IdBuilder(Arc::clone(&f.catalog))),
                    f.sink.clone(),
                ),
            )
            .unwrap()
            .build()
            .unwrap();

        let Fixture { service, .. } = f;
        let mut service = Arc::try_unwrap(service).ok().unwrap();
        assert!(matches!(
            service.register(definition),
            Err(IndexBuildError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_definition_requires_source_and_pipeline() {
        let result = IndexDefinition::builder(IndexType::Sku).build();
        assert!(matches!(result, Err(IndexBuildError::Config(_))));
    }
}
