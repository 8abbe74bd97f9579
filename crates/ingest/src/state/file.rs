use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use cmsfeed_core::Period;
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::types::{RunRecord, RunRequest, RunResult, StateDoc};
use super::PipelineState;
use crate::error::StateError;

/// Filesystem-backed pipeline state.
///
/// One JSON document per pipeline:
/// ```text
/// <state_dir>/
///   medicare_advantage_enrollment_by_state_county_contract.json
/// ```
/// Every mutation rewrites the document through a temp file in the same
/// directory followed by a rename, so a crash leaves either the old or the
/// new document on disk. The in-memory copy only changes once the write
/// has landed.
pub struct FileState {
    path: PathBuf,
    doc: Mutex<StateDoc>,
}

impl FileState {
    /// Open (or start) the state for `pipeline` under `state_dir`.
    pub fn open(state_dir: impl AsRef<Path>, pipeline: &str) -> Result<Self, StateError> {
        let state_dir = state_dir.as_ref();
        std::fs::create_dir_all(state_dir)?;
        let path = state_dir.join(format!("{pipeline}.json"));

        let doc = if path.exists() {
            let json = std::fs::read_to_string(&path)?;
            let doc: StateDoc = serde_json::from_str(&json)?;
            info!(
                path = %path.display(),
                cursor = ?doc.cursor.map(|p| p.to_string()),
                partitions = doc.partitions.len(),
                runs = doc.runs.len(),
                "loaded pipeline state"
            );
            doc
        } else {
            debug!(path = %path.display(), "no pipeline state yet, starting empty");
            StateDoc::default()
        };

        Ok(Self { path, doc: Mutex::new(doc) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn snapshot(&self) -> StateDoc {
        self.doc.lock().await.clone()
    }

    /// Apply `f` to a copy of the document, persist the copy, then publish it.
    /// Nothing is written when `f` fails or reports no change.
    async fn update<T>(
        &self,
        f: impl FnOnce(&mut StateDoc) -> Result<(T, bool), StateError> + Send,
    ) -> Result<T, StateError> {
        let mut doc = self.doc.lock().await;
        let mut next = doc.clone();
        let (out, changed) = f(&mut next)?;
        if changed {
            write_atomic(&self.path, &next)?;
            *doc = next;
        }
        Ok(out)
    }
}

fn write_atomic(path: &Path, doc: &StateDoc) -> Result<(), StateError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let json = serde_json::to_vec_pretty(doc)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(&json)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[async_trait]
impl PipelineState for FileState {
    async fn cursor(&self) -> Result<Option<Period>, StateError> {
        Ok(self.doc.lock().await.cursor)
    }

    async fn commit_cursor(&self, expected: Option<Period>, new: Period) -> Result<(), StateError> {
        self.update(|doc| doc.commit_cursor(expected, new).map(|()| ((), true)))
            .await
    }

    async fn register_partition(&self, period: Period) -> Result<bool, StateError> {
        self.update(|doc| {
            let added = doc.register_partition(period);
            Ok((added, added))
        })
        .await
    }

    async fn has_partition(&self, period: &Period) -> Result<bool, StateError> {
        Ok(self.doc.lock().await.partitions.contains(period))
    }

    async fn partitions(&self) -> Result<Vec<Period>, StateError> {
        Ok(self.doc.lock().await.partitions.iter().copied().collect())
    }

    async fn request_run(&self, request: RunRequest) -> Result<bool, StateError> {
        self.update(|doc| {
            let queued = doc.request_run(request);
            Ok((queued, queued))
        })
        .await
    }

    async fn pending_runs(&self) -> Result<Vec<RunRecord>, StateError> {
        Ok(self.doc.lock().await.pending_runs())
    }

    async fn mark_running(&self, run_key: &str) -> Result<RunRecord, StateError> {
        self.update(|doc| doc.mark_running(run_key).map(|r| (r, true)))
            .await
    }

    async fn finish_run(&self, run_key: &str, result: RunResult) -> Result<RunRecord, StateError> {
        self.update(|doc| doc.finish_run(run_key, result).map(|r| (r, true)))
            .await
    }

    async fn fail_interrupted(&self) -> Result<Vec<RunRecord>, StateError> {
        self.update(|doc| {
            let failed = doc.fail_interrupted();
            let changed = !failed.is_empty();
            Ok((failed, changed))
        })
        .await
    }

    async fn runs(&self) -> Result<Vec<RunRecord>, StateError> {
        Ok(self.doc.lock().await.runs.values().cloned().collect())
    }
}
