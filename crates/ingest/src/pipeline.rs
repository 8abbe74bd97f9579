//! Pipeline runner: drives the sensor and executes queued runs.

use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cmsfeed_core::Period;
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::PipelineError;
use crate::sensor::{Sensor, SensorOutcome};
use crate::state::{PipelineState, RunConfig, RunRecord, RunRequest, RunResult, RunStatus};
use crate::task::{IngestionRequest, IngestionTask};

/// `tokio::time::interval` panics on a zero period.
const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Outcome of one tick: the sensor evaluation and the runs it drained.
#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    pub sensor: SensorOutcome,
    pub runs: Vec<RunRecord>,
}

/// Snapshot for `status`.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    pub pipeline: String,
    pub cursor: Option<Period>,
    pub next_period: Period,
    pub partitions: Vec<Period>,
    pub runs: Vec<RunRecord>,
}

pub struct Pipeline {
    name: String,
    state: Arc<dyn PipelineState>,
    sensor: Sensor,
    task: IngestionTask,
    run_log_dir: Option<PathBuf>,
}

impl Pipeline {
    pub fn new(
        name: impl Into<String>,
        state: Arc<dyn PipelineState>,
        sensor: Sensor,
        task: IngestionTask,
    ) -> Self {
        Self {
            name: name.into(),
            state,
            sensor,
            task,
            run_log_dir: None,
        }
    }

    /// Append finished runs to `<dir>/runs.jsonl`.
    pub fn with_run_log(mut self, dir: impl Into<PathBuf>) -> Self {
        self.run_log_dir = Some(dir.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> &Arc<dyn PipelineState> {
        &self.state
    }

    /// Evaluate the sensor once.
    pub async fn tick(&self) -> Result<SensorOutcome, PipelineError> {
        let outcome = self.sensor.evaluate(self.state.as_ref()).await?;
        if let SensorOutcome::Skipped { reason, .. } = &outcome {
            info!(pipeline = %self.name, reason = %reason, "sensor skipped");
        }
        Ok(outcome)
    }

    /// Tick, then drain.
    pub async fn tick_and_drain(&self) -> Result<TickReport, PipelineError> {
        let sensor = self.tick().await?;
        let runs = self.drain().await?;
        Ok(TickReport { sensor, runs })
    }

    /// Execute every queued run in request order.
    ///
    /// Runs a previous process left `Running` are failed first (see
    /// [`Pipeline::recover_interrupted`]). A failed run is recorded as failed
    /// and does not stop the others.
    pub async fn drain(&self) -> Result<Vec<RunRecord>, PipelineError> {
        self.recover_interrupted().await?;
        let pending = self.state.pending_runs().await?;
        let mut finished = Vec::with_capacity(pending.len());
        for run in pending {
            finished.push(self.execute(&run.run_key, run.partition_key, run.config.url.clone()).await?);
        }
        Ok(finished)
    }

    /// Fail runs stuck in `Running` and append them to the run log.
    pub async fn recover_interrupted(&self) -> Result<Vec<RunRecord>, PipelineError> {
        let failed = self.state.fail_interrupted().await?;
        for run in &failed {
            warn!(
                pipeline = %self.name,
                run_key = %run.run_key,
                period = %run.partition_key,
                "run was interrupted, marked failed"
            );
            if let Some(dir) = &self.run_log_dir {
                append_run_log(dir, &self.name, run, elapsed_ms(run));
            }
        }
        Ok(failed)
    }

    /// Re-run a registered partition under a fresh run key.
    ///
    /// `url` overrides the URL; without one the configured template is used.
    pub async fn materialize(&self, period: Period, url: Option<String>) -> Result<RunRecord, PipelineError> {
        if !self.state.has_partition(&period).await? {
            return Err(PipelineError::UnknownPartition(period));
        }
        let request = RunRequest {
            run_key: format!("{period}/manual-{}", Uuid::new_v4()),
            partition_key: period,
            config: RunConfig { url },
        };
        let run_key = request.run_key.clone();
        self.state.request_run(request.clone()).await?;
        info!(pipeline = %self.name, run_key = %run_key, "manual materialization requested");
        self.execute(&run_key, period, request.config.url).await
    }

    pub async fn status(&self) -> Result<PipelineStatus, PipelineError> {
        let cursor = self.state.cursor().await?;
        Ok(PipelineStatus {
            pipeline: self.name.clone(),
            cursor,
            next_period: cmsfeed_core::next_period(cursor.as_ref()),
            partitions: self.state.partitions().await?,
            runs: self.state.runs().await?,
        })
    }

    /// Tick and drain every `interval` until SIGINT or SIGTERM.
    pub async fn run_forever(&self, interval: Duration) {
        self.run_until(interval, shutdown_signal()).await;
    }

    /// Tick and drain every `interval` until `shutdown` completes.
    ///
    /// Tick failures are logged and retried on the next interval. A shutdown
    /// during a tick abandons it; the run it was executing is failed as
    /// interrupted before returning.
    pub async fn run_until(&self, interval: Duration, shutdown: impl Future<Output = ()>) {
        let interval = if interval < MIN_INTERVAL {
            warn!(pipeline = %self.name, requested_ms = interval.as_millis() as u64, "interval too short, using 1s");
            MIN_INTERVAL
        } else {
            interval
        };
        info!(pipeline = %self.name, interval_secs = interval.as_secs(), "pipeline loop started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = &mut shutdown => {
                    info!(pipeline = %self.name, "shutdown signal received");
                    break;
                }
            }
            tokio::select! {
                result = self.tick_and_drain() => {
                    if let Err(e) = result {
                        error!(pipeline = %self.name, error = %e, "tick failed");
                    }
                }
                _ = &mut shutdown => {
                    warn!(pipeline = %self.name, "shutdown signal received mid-tick, abandoning it");
                    break;
                }
            }
        }

        if let Err(e) = self.recover_interrupted().await {
            error!(pipeline = %self.name, error = %e, "failed to record interrupted runs");
        }
    }

    async fn execute(&self, run_key: &str, period: Period, url: Option<String>) -> Result<RunRecord, PipelineError> {
        self.state.mark_running(run_key).await?;
        let started = std::time::Instant::now();

        let request = IngestionRequest { partition_key: period, url };
        let result = match self.task.run(&request).await {
            Ok(report) => RunResult::Succeeded { url: report.url, row_count: report.row_count },
            Err(e) => {
                error!(pipeline = %self.name, run_key = %run_key, period = %period, error = %e, "run failed");
                RunResult::Failed { error: e.to_string() }
            }
        };

        let record = self.state.finish_run(run_key, result).await?;
        let duration_ms = started.elapsed().as_millis() as u64;
        info!(
            pipeline = %self.name,
            run_key = %run_key,
            status = ?record.status,
            rows = ?record.row_count,
            duration_ms,
            "run finished"
        );

        if let Some(dir) = &self.run_log_dir {
            append_run_log(dir, &self.name, &record, duration_ms);
        }
        Ok(record)
    }
}

/// Wait for SIGINT or SIGTERM (ctrl-c only off unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                error!(error = %e, "failed to register SIGTERM handler");
                ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    ctrl_c.await;
}

// ── Run log ─────────────────────────────────────────────────────────

#[derive(Serialize)]
struct RunLogEntry<'a> {
    pipeline: &'a str,
    run_key: &'a str,
    partition_key: Period,
    status: RunStatus,
    run_config: Value,
    url: Option<&'a str>,
    row_count: Option<usize>,
    error: Option<&'a str>,
    requested_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    duration_ms: u64,
}

fn elapsed_ms(run: &RunRecord) -> u64 {
    match (run.started_at, run.finished_at) {
        (Some(start), Some(end)) => (end - start).num_milliseconds().max(0) as u64,
        _ => 0,
    }
}

/// Best-effort append of one JSON line to `<dir>/runs.jsonl`.
fn append_run_log(dir: &Path, pipeline: &str, run: &RunRecord, duration_ms: u64) {
    if let Err(e) = std::fs::create_dir_all(dir) {
        warn!(error = %e, "failed to create run log directory");
        return;
    }
    let log_path = dir.join("runs.jsonl");

    let entry = RunLogEntry {
        pipeline,
        run_key: &run.run_key,
        partition_key: run.partition_key,
        status: run.status,
        run_config: run.config.to_ops(pipeline),
        url: run.url.as_deref(),
        row_count: run.row_count,
        error: run.error.as_deref(),
        requested_at: run.requested_at,
        finished_at: run.finished_at,
        duration_ms,
    };
    let json_line = match serde_json::to_string(&entry) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "failed to serialize run log entry");
            return;
        }
    };

    let mut file = match std::fs::OpenOptions::new().create(true).append(true).open(&log_path) {
        Ok(f) => f,
        Err(e) => {
            warn!(error = %e, path = %log_path.display(), "failed to open run log");
            return;
        }
    };
    if let Err(e) = writeln!(file, "{}", json_line) {
        warn!(error = %e, "failed to write run log entry");
    }
}
