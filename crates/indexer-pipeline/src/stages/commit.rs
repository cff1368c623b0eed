//! Terminal stage: hands documents to the search engine.

use std::sync::Arc;

use async_trait::async_trait;

use indexer_types::SearchDocument;

use crate::collaborators::CommitSink;
use crate::error::CollaboratorError;
use crate::stage::{Task, TaskFactory};
use crate::status::PipelineStatus;

pub struct CommitTaskFactory {
    sink: Arc<dyn CommitSink>,
    status: Arc<PipelineStatus>,
}

impl CommitTaskFactory {
    pub fn new(sink: Arc<dyn CommitSink>, status: Arc<PipelineStatus>) -> Self {
        Self { sink, status }
    }
}

impl TaskFactory<SearchDocument> for CommitTaskFactory {
    fn create_task(&self, payload: SearchDocument) -> Box<dyn Task> {
        Box::new(CommitTask {
            document: payload,
            sink: Arc::clone(&self.sink),
            status: Arc::clone(&self.status),
        })
    }
}

struct CommitTask {
    document: SearchDocument,
    sink: Arc<dyn CommitSink>,
    status: Arc<PipelineStatus>,
}

#[async_trait]
impl Task for CommitTask {
    async fn run(self: Box<Self>) -> Result<(), CollaboratorError> {
        let id = self.document.id;
        self.sink
            .submit(self.document)
            .await
            .map_err(|e| CollaboratorError::new(format!("submit of document {id} failed"), e))?;
        self.status.record_completed(1);
        Ok(())
    }
}
