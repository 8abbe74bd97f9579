use chrono::{DateTime, Utc};
use cmsfeed_core::Period;
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::StateError;

// ── Run request ─────────────────────────────────────────────────────

/// Per-run configuration forwarded to the ingestion task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Resolved source URL. `None` falls back to the configured template.
    pub url: Option<String>,
}

impl RunConfig {
    /// The nested `{"ops": {asset: {"config": {...}}}}` form used in the run log.
    pub fn to_ops(&self, asset: &str) -> Value {
        let mut assets = Map::new();
        assets.insert(asset.to_string(), json!({ "config": self }));
        json!({ "ops": assets })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
    /// Dedup key: at most one run is ever requested per key.
    pub run_key: String,
    pub partition_key: Period,
    pub config: RunConfig,
}

impl RunRequest {
    /// Request issued by the sensor on discovery, keyed by the period text.
    pub fn discovered(period: Period, url: impl Into<String>) -> Self {
        Self {
            run_key: period.to_string(),
            partition_key: period,
            config: RunConfig { url: Some(url.into()) },
        }
    }
}

// ── Run record ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunResult {
    Succeeded { url: String, row_count: usize },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_key: String,
    pub partition_key: Period,
    pub config: RunConfig,
    pub status: RunStatus,
    pub requested_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    /// URL actually downloaded, once the run has succeeded.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub row_count: Option<usize>,
    #[serde(default)]
    pub error: Option<String>,
}

impl RunRecord {
    fn queued(request: RunRequest) -> Self {
        Self {
            run_key: request.run_key,
            partition_key: request.partition_key,
            config: request.config,
            status: RunStatus::Queued,
            requested_at: Utc::now(),
            started_at: None,
            finished_at: None,
            url: None,
            row_count: None,
            error: None,
        }
    }

    pub fn request(&self) -> RunRequest {
        RunRequest {
            run_key: self.run_key.clone(),
            partition_key: self.partition_key,
            config: self.config.clone(),
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.status, RunStatus::Succeeded | RunStatus::Failed)
    }
}

/// Error recorded on runs found `Running` with no runner left to finish them.
pub const INTERRUPTED: &str = "interrupted";

// ── State document ──────────────────────────────────────────────────

/// Everything one pipeline persists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateDoc {
    #[serde(default)]
    pub cursor: Option<Period>,
    #[serde(default)]
    pub partitions: IndexSet<Period>,
    #[serde(default)]
    pub runs: IndexMap<String, RunRecord>,
}

impl StateDoc {
    pub(crate) fn commit_cursor(&mut self, expected: Option<Period>, new: Period) -> Result<(), StateError> {
        if self.cursor != expected {
            return Err(StateError::CursorConflict { expected, found: self.cursor });
        }
        self.cursor = Some(new);
        Ok(())
    }

    pub(crate) fn register_partition(&mut self, period: Period) -> bool {
        self.partitions.insert(period)
    }

    pub(crate) fn request_run(&mut self, request: RunRequest) -> bool {
        if self.runs.contains_key(&request.run_key) {
            return false;
        }
        self.runs.insert(request.run_key.clone(), RunRecord::queued(request));
        true
    }

    pub(crate) fn pending_runs(&self) -> Vec<RunRecord> {
        self.runs
            .values()
            .filter(|r| r.status == RunStatus::Queued)
            .cloned()
            .collect()
    }

    pub(crate) fn mark_running(&mut self, run_key: &str) -> Result<RunRecord, StateError> {
        let run = self
            .runs
            .get_mut(run_key)
            .ok_or_else(|| StateError::UnknownRun(run_key.to_string()))?;
        run.status = RunStatus::Running;
        run.started_at = Some(Utc::now());
        Ok(run.clone())
    }

    pub(crate) fn finish_run(&mut self, run_key: &str, result: RunResult) -> Result<RunRecord, StateError> {
        let run = self
            .runs
            .get_mut(run_key)
            .ok_or_else(|| StateError::UnknownRun(run_key.to_string()))?;
        run.finished_at = Some(Utc::now());
        match result {
            RunResult::Succeeded { url, row_count } => {
                run.status = RunStatus::Succeeded;
                run.url = Some(url);
                run.row_count = Some(row_count);
                run.error = None;
            }
            RunResult::Failed { error } => {
                run.status = RunStatus::Failed;
                run.error = Some(error);
            }
        }
        Ok(run.clone())
    }

    /// Fail every run still marked running. Returns the records it changed.
    pub(crate) fn fail_interrupted(&mut self) -> Vec<RunRecord> {
        let now = Utc::now();
        self.runs
            .values_mut()
            .filter(|r| r.status == RunStatus::Running)
            .map(|run| {
                run.status = RunStatus::Failed;
                run.finished_at = Some(now);
                run.error = Some(INTERRUPTED.to_string());
                run.clone()
            })
            .collect()
    }
}
