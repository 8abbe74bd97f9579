//! Pipeline state: the discovery cursor, the partition registry and the
//! run queue.
//!
//! Two backends share one document model ([`StateDoc`]):
//! - [`MemoryState`] keeps it in memory (tests, dry runs).
//! - [`FileState`] persists it as `<state_dir>/<pipeline>.json`.

mod file;
mod memory;
mod types;

use async_trait::async_trait;
use cmsfeed_core::Period;

use crate::error::StateError;

pub use file::FileState;
pub use memory::MemoryState;
pub use types::{RunConfig, RunRecord, RunRequest, RunResult, RunStatus, StateDoc, INTERRUPTED};

/// Persisted state the discovery loop and the runner work against.
///
/// Mutations are single-writer: only the sensor moves the cursor, registers
/// partitions and requests runs; only the runner moves runs through their
/// statuses.
#[async_trait]
pub trait PipelineState: Send + Sync {
    /// Last discovered period, `None` before the first discovery.
    async fn cursor(&self) -> Result<Option<Period>, StateError>;

    /// Compare-and-set: moves the cursor to `new` only if it still holds
    /// `expected`, otherwise fails with [`StateError::CursorConflict`].
    async fn commit_cursor(&self, expected: Option<Period>, new: Period) -> Result<(), StateError>;

    /// Add a partition. `false` if it was already registered.
    async fn register_partition(&self, period: Period) -> Result<bool, StateError>;

    async fn has_partition(&self, period: &Period) -> Result<bool, StateError>;

    /// Registered partitions in registration order.
    async fn partitions(&self) -> Result<Vec<Period>, StateError>;

    /// Queue a run unless one with the same run key was ever requested.
    /// `false` when deduplicated.
    async fn request_run(&self, request: RunRequest) -> Result<bool, StateError>;

    /// Queued runs in request order.
    async fn pending_runs(&self) -> Result<Vec<RunRecord>, StateError>;

    async fn mark_running(&self, run_key: &str) -> Result<RunRecord, StateError>;

    async fn finish_run(&self, run_key: &str, result: RunResult) -> Result<RunRecord, StateError>;

    /// Mark every run left `Running` (its runner died or was cancelled) as
    /// failed with [`INTERRUPTED`]. Returns the records it changed.
    async fn fail_interrupted(&self) -> Result<Vec<RunRecord>, StateError>;

    /// Every run ever requested, in request order.
    async fn runs(&self) -> Result<Vec<RunRecord>, StateError>;
}
