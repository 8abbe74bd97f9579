use async_trait::async_trait;
use cmsfeed_core::Period;
use tokio::sync::Mutex;

use super::types::{RunRecord, RunRequest, RunResult, StateDoc};
use super::PipelineState;
use crate::error::StateError;

/// Non-persistent state.
#[derive(Debug, Default)]
pub struct MemoryState {
    doc: Mutex<StateDoc>,
}

impl MemoryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing document, e.g. a loaded state file for a dry run.
    pub fn with_doc(doc: StateDoc) -> Self {
        Self { doc: Mutex::new(doc) }
    }

    pub async fn snapshot(&self) -> StateDoc {
        self.doc.lock().await.clone()
    }
}

#[async_trait]
impl PipelineState for MemoryState {
    async fn cursor(&self) -> Result<Option<Period>, StateError> {
        Ok(self.doc.lock().await.cursor)
    }

    async fn commit_cursor(&self, expected: Option<Period>, new: Period) -> Result<(), StateError> {
        self.doc.lock().await.commit_cursor(expected, new)
    }

    async fn register_partition(&self, period: Period) -> Result<bool, StateError> {
        Ok(self.doc.lock().await.register_partition(period))
    }

    async fn has_partition(&self, period: &Period) -> Result<bool, StateError> {
        Ok(self.doc.lock().await.partitions.contains(period))
    }

    async fn partitions(&self) -> Result<Vec<Period>, StateError> {
        Ok(self.doc.lock().await.partitions.iter().copied().collect())
    }

    async fn request_run(&self, request: RunRequest) -> Result<bool, StateError> {
        Ok(self.doc.lock().await.request_run(request))
    }

    async fn pending_runs(&self) -> Result<Vec<RunRecord>, StateError> {
        Ok(self.doc.lock().await.pending_runs())
    }

    async fn mark_running(&self, run_key: &str) -> Result<RunRecord, StateError> {
        self.doc.lock().await.mark_running(run_key)
    }

    async fn finish_run(&self, run_key: &str, result: RunResult) -> Result<RunRecord, StateError> {
        self.doc.lock().await.finish_run(run_key, result)
    }

    async fn fail_interrupted(&self) -> Result<Vec<RunRecord>, StateError> {
        Ok(self.doc.lock().await.fail_interrupted())
    }

    async fn runs(&self) -> Result<Vec<RunRecord>, StateError> {
        Ok(self.doc.lock().await.runs.values().cloned().collect())
    }
}
