//! End-to-end test infrastructure for the catalog indexer.
//!
//! Provides a [`TestHarness`] that wires a real [`IndexBuildService`] and
//! pipeline over RocksDB storage in a temp dir, with an in-memory product
//! catalog and a recording commit sink standing in for the database and the
//! search engine.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Semaphore;

use indexer_pipeline::{
    CollaboratorError, CommitSink, DocumentBuilder, EntityLoader, IndexingStatistics,
    PipelineCollaborators,
};
use indexer_service::{IdentifierSource, IndexDefinition, IndexBuildService};
use indexer_storage::Storage;
use indexer_types::{
    ExecutorSettings, Identifier, IndexType, PipelineSettings, SearchDocument,
};

/// Catalog entity used by the scenarios.
#[derive(Debug, Clone, PartialEq)]
pub struct Product {
    pub id: Identifier,
    pub name: String,
    pub version: i64,
}

#[derive(Debug, Clone)]
struct Row {
    product: Product,
    modified_at: DateTime<Utc>,
}

/// In-memory product table with change tracking.
///
/// Doubles as identifier source and entity loader. Rows can be made
/// invisible to the loader (as if deleted between the id query and the
/// load), and an edit can be scheduled to land while a batch is loading.
#[derive(Default)]
pub struct InMemoryCatalog {
    rows: Mutex<BTreeMap<Identifier, Row>>,
    tombstones: Mutex<BTreeMap<Identifier, DateTime<Utc>>>,
    invisible: Mutex<BTreeSet<Identifier>>,
    edit_during_load: Mutex<Option<Identifier>>,
    load_gate: Mutex<Option<Arc<Semaphore>>>,
    loaded_batches: Mutex<Vec<Vec<Identifier>>>,
}

impl InMemoryCatalog {
    /// Products `ids`, all last modified an hour ago.
    pub fn with_products(ids: impl IntoIterator<Item = Identifier>) -> Self {
        let catalog = Self::default();
        let long_ago = Utc::now() - Duration::hours(1);
        {
            let mut rows = catalog.rows.lock().unwrap();
            for id in ids {
                rows.insert(
                    id,
                    Row {
                        product: Product {
                            id,
                            name: format!("Product {id}"),
                            version: 1,
                        },
                        modified_at: long_ago,
                    },
                );
            }
        }
        catalog
    }

    /// Rename a product now, bumping its version.
    pub fn edit(&self, id: Identifier, name: &str) {
        let mut rows = self.rows.lock().unwrap();
        if let Some(row) = rows.get_mut(&id) {
            row.product.name = name.to_string();
            row.product.version += 1;
            row.modified_at = Utc::now();
        }
    }

    pub fn insert(&self, id: Identifier, name: &str) {
        self.rows.lock().unwrap().insert(
            id,
            Row {
                product: Product {
                    id,
                    name: name.to_string(),
                    version: 1,
                },
                modified_at: Utc::now(),
            },
        );
    }

    pub fn delete(&self, id: Identifier) {
        self.rows.lock().unwrap().remove(&id);
        self.tombstones.lock().unwrap().insert(id, Utc::now());
    }

    /// Listed by the identifier source but not returned by the loader.
    pub fn hide_from_loader(&self, id: Identifier) {
        self.invisible.lock().unwrap().insert(id);
    }

    /// The next load of a batch containing `id` returns the current row and
    /// then edits it, as if a writer committed right after the read.
    pub fn edit_while_loading(&self, id: Identifier) {
        *self.edit_during_load.lock().unwrap() = Some(id);
    }

    /// Make every load wait for a permit on the returned semaphore.
    pub fn gate_loads(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.load_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    /// Batches passed to the loader so far, each sorted.
    pub fn loaded_batches(&self) -> Vec<Vec<Identifier>> {
        self.loaded_batches.lock().unwrap().clone()
    }

    pub fn clear_loaded_batches(&self) {
        self.loaded_batches.lock().unwrap().clear();
    }
}

#[async_trait]
impl IdentifierSource for InMemoryCatalog {
    async fn find_all_identifiers(&self) -> Result<Vec<Identifier>, CollaboratorError> {
        Ok(self.rows.lock().unwrap().keys().copied().collect())
    }

    async fn find_changed_identifiers_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<Identifier>, CollaboratorError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|row| row.modified_at >= since)
            .map(|row| row.product.id)
            .collect())
    }

    async fn find_deleted_identifiers_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<Identifier>, CollaboratorError> {
        Ok(self
            .tombstones
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, at)| **at >= since)
            .map(|(id, _)| *id)
            .collect())
    }
}

#[async_trait]
impl EntityLoader<Product> for InMemoryCatalog {
    async fn load_batch(&self, ids: &[Identifier]) -> Result<Vec<Product>, CollaboratorError> {
        let mut batch = ids.to_vec();
        batch.sort_unstable();
        self.loaded_batches.lock().unwrap().push(batch);

        let gate = self.load_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            let _permit = gate
                .acquire()
                .await
                .map_err(|e| CollaboratorError::new("load gate closed", e))?;
        }

        let loaded: Vec<Product> = {
            let rows = self.rows.lock().unwrap();
            let invisible = self.invisible.lock().unwrap();
            ids.iter()
                .filter(|id| !invisible.contains(id))
                .filter_map(|id| rows.get(id).map(|row| row.product.clone()))
                .collect()
        };

        let pending_edit = {
            let mut edit = self.edit_during_load.lock().unwrap();
            match *edit {
                Some(id) if ids.contains(&id) => edit.take(),
                _ => None,
            }
        };
        if let Some(id) = pending_edit {
            self.edit(id, "Edited during load");
        }

        Ok(loaded)
    }
}

/// Maps a product to its search document.
pub struct ProductDocuments;

impl DocumentBuilder<Product> for ProductDocuments {
    fn build(&self, product: &Product) -> Result<SearchDocument, CollaboratorError> {
        Ok(SearchDocument::new(IndexType::Product, product.id)
            .with_field("name", product.name.as_str())
            .with_field("version", product.version))
    }
}

/// Search engine stand-in that keeps the committed view and every call.
#[derive(Default)]
pub struct RecordingSink {
    staged: Mutex<BTreeMap<Identifier, SearchDocument>>,
    committed: Mutex<BTreeMap<Identifier, SearchDocument>>,
    submissions: Mutex<Vec<Identifier>>,
    removals: Mutex<Vec<Identifier>>,
    clears: Mutex<usize>,
    commits: Mutex<usize>,
}

impl RecordingSink {
    /// Documents visible after the last commit.
    pub fn committed(&self) -> BTreeMap<Identifier, SearchDocument> {
        self.committed.lock().unwrap().clone()
    }

    pub fn committed_ids(&self) -> Vec<Identifier> {
        self.committed.lock().unwrap().keys().copied().collect()
    }

    /// Every submitted id, in arrival order.
    pub fn submissions(&self) -> Vec<Identifier> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn removals(&self) -> Vec<Identifier> {
        self.removals.lock().unwrap().clone()
    }

    pub fn clear_count(&self) -> usize {
        *self.clears.lock().unwrap()
    }

    pub fn commit_count(&self) -> usize {
        *self.commits.lock().unwrap()
    }

    pub fn reset_calls(&self) {
        self.submissions.lock().unwrap().clear();
        self.removals.lock().unwrap().clear();
    }
}

#[async_trait]
impl CommitSink for RecordingSink {
    async fn submit(&self, document: SearchDocument) -> Result<(), CollaboratorError> {
        self.submissions.lock().unwrap().push(document.id);
        self.staged.lock().unwrap().insert(document.id, document);
        Ok(())
    }

    async fn remove(&self, id: Identifier) -> Result<(), CollaboratorError> {
        self.removals.lock().unwrap().push(id);
        self.staged.lock().unwrap().remove(&id);
        Ok(())
    }

    async fn remove_all(&self) -> Result<(), CollaboratorError> {
        *self.clears.lock().unwrap() += 1;
        self.staged.lock().unwrap().clear();
        Ok(())
    }

    async fn commit(&self) -> Result<(), CollaboratorError> {
        *self.commits.lock().unwrap() += 1;
        let staged = self.staged.lock().unwrap().clone();
        *self.committed.lock().unwrap() = staged;
        Ok(())
    }
}

/// Pipeline settings for scenarios: small batches, fast completion polling.
pub fn test_pipeline_settings(batch_size: usize) -> PipelineSettings {
    PipelineSettings::default()
        .with_batch_size(batch_size)
        .with_completion_poll_ms(10)
        .with_uniform_pools(ExecutorSettings::new(2, 4, 100))
}

/// Shared test harness for E2E tests.
pub struct TestHarness {
    /// Keeps temp dir alive for the lifetime of the harness
    pub _temp_dir: tempfile::TempDir,
    pub storage: Arc<Storage>,
    pub catalog: Arc<InMemoryCatalog>,
    pub sink: Arc<RecordingSink>,
    pub statistics: Arc<IndexingStatistics>,
    pub service: Arc<IndexBuildService>,
    settings: PipelineSettings,
}

impl TestHarness {
    /// PRODUCT index over `ids` with the given batch size.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(ids: impl IntoIterator<Item = Identifier>, batch_size: usize) -> Self {
        Self::with_settings(ids, test_pipeline_settings(batch_size))
    }

    pub fn with_settings(
        ids: impl IntoIterator<Item = Identifier>,
        settings: PipelineSettings,
    ) -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let storage =
            Arc::new(Storage::open(temp_dir.path()).expect("Failed to open test storage"));
        Self::open(
            temp_dir,
            storage,
            Arc::new(InMemoryCatalog::with_products(ids)),
            Arc::new(RecordingSink::default()),
            settings,
        )
    }

    /// Simulate a process restart: fresh service, pipeline and statistics
    /// over the same storage, catalog and search engine.
    pub fn restart(self) -> Self {
        self.service.shutdown();
        let TestHarness {
            _temp_dir,
            storage,
            catalog,
            sink,
            settings,
            ..
        } = self;
        Self::open(_temp_dir, storage, catalog, sink, settings)
    }

    fn open(
        temp_dir: tempfile::TempDir,
        storage: Arc<Storage>,
        catalog: Arc<InMemoryCatalog>,
        sink: Arc<RecordingSink>,
        settings: PipelineSettings,
    ) -> Self {
        let statistics = Arc::new(IndexingStatistics::new());
        let service = build_service(&storage, &catalog, &sink, &statistics, &settings);
        Self {
            _temp_dir: temp_dir,
            storage,
            catalog,
            sink,
            statistics,
            service,
            settings,
        }
    }
}

fn build_service(
    storage: &Arc<Storage>,
    catalog: &Arc<InMemoryCatalog>,
    sink: &Arc<RecordingSink>,
    statistics: &Arc<IndexingStatistics>,
    settings: &PipelineSettings,
) -> Arc<IndexBuildService> {
    let definition = IndexDefinition::builder(IndexType::Product)
        .identifier_source(catalog.clone())
        .entity_pipeline(
            settings,
            statistics,
            PipelineCollaborators::<Product>::new(
                catalog.clone(),
                Arc::new(ProductDocuments),
                sink.clone(),
            ),
        )
        .expect("Failed to build pipeline")
        .build()
        .expect("Failed to build index definition");

    let mut service = IndexBuildService::new(
        storage.clone(),
        storage.clone(),
        Arc::clone(statistics),
        &ExecutorSettings::new(1, 2, 8),
    )
    .expect("Failed to create build service");
    service
        .register(definition)
        .expect("Failed to register index");
    Arc::new(service)
}
