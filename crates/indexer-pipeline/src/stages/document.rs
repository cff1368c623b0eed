//! Converts one entity into one search document.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use indexer_types::SearchDocument;

use crate::collaborators::DocumentBuilder;
use crate::error::CollaboratorError;
use crate::performance::PipelinePerformance;
use crate::stage::{Stage, Task, TaskFactory};

pub struct DocumentTaskFactory<E> {
    builder: Arc<dyn DocumentBuilder<E>>,
    next: Stage<SearchDocument>,
    performance: Arc<PipelinePerformance>,
}

impl<E> DocumentTaskFactory<E> {
    pub fn new(
        builder: Arc<dyn DocumentBuilder<E>>,
        next: Stage<SearchDocument>,
        performance: Arc<PipelinePerformance>,
    ) -> Self {
        Self {
            builder,
            next,
            performance,
        }
    }
}

impl<E: Send + 'static> TaskFactory<E> for DocumentTaskFactory<E> {
    fn create_task(&self, payload: E) -> Box<dyn Task> {
        Box::new(DocumentTask {
            entity: payload,
            builder: Arc::clone(&self.builder),
            next: self.next.clone(),
            performance: Arc::clone(&self.performance),
        })
    }
}

struct DocumentTask<E> {
    entity: E,
    builder: Arc<dyn DocumentBuilder<E>>,
    next: Stage<SearchDocument>,
    performance: Arc<PipelinePerformance>,
}

#[async_trait]
impl<E: Send + 'static> Task for DocumentTask<E> {
    async fn run(self: Box<Self>) -> Result<(), CollaboratorError> {
        let started = Instant::now();
        let document = self
            .builder
            .build(&self.entity)
            .map_err(|e| CollaboratorError::new("document creation failed", e))?;
        self.performance
            .record_duration("document.build_us", started.elapsed());
        self.next.send(document);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::test_support::{collector, pool, tracking, wait_idle};
    use indexer_types::{FieldValue, IndexType};

    struct NameBuilder;

    impl DocumentBuilder<(u64, &'static str)> for NameBuilder {
        fn build(&self, entity: &(u64, &'static str)) -> Result<SearchDocument, CollaboratorError> {
            if entity.1.is_empty() {
                return Err(CollaboratorError::msg("entity has no name"));
            }
            Ok(SearchDocument::new(IndexType::Product, entity.0).with_field("name", entity.1))
        }
    }

    #[tokio::test]
    async fn test_one_document_per_entity() {
        let (status, performance) = tracking();
        let (next, received) = collector::<SearchDocument>(&status, &performance);
        let document = Stage::new(
            "document",
            IndexType::Product,
            DocumentTaskFactory::<(u64, &'static str)>::new(
                Arc::new(NameBuilder),
                next.clone(),
                Arc::clone(&performance),
            ),
            &pool(),
            Arc::clone(&status),
            performance,
        )
        .unwrap();

        document.send((1, "kettle"));
        document.send((2, ""));
        document.send((3, "toaster"));
        wait_idle(&document, &next).await;

        let mut docs = received.lock().unwrap().clone();
        docs.sort_by_key(|d| d.id);
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].field("name"), Some(&FieldValue::from("kettle")));
        assert_eq!(docs[1].id, 3);
        // The bad entity is dropped and counted, the others still go through
        assert_eq!(status.snapshot().failed, 1);
    }
}
