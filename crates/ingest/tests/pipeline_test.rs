//! Runner: tick → drain → materialize → status, with file-backed state.

mod common;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use cmsfeed_core::Period;
use cmsfeed_ingest::{
    FileState, IngestionTask, MemoryState, Pipeline, PipelineError, PipelineState, RunRequest, RunStatus,
    Sensor, SensorOutcome, SourceClient, INTERRUPTED,
};
use cmsfeed_warehouse::{MemoryWarehouse, TableMerge, TableRef};

use common::{templates, zip_of, ScriptedClient, ENROLLMENT_CSV};

const PIPELINE: &str = "medicare_advantage_enrollment_by_state_county_contract";

fn period(s: &str) -> Period {
    s.parse().unwrap()
}

fn target() -> TableRef {
    TableRef::new("cms", PIPELINE).unwrap()
}

fn pipeline(
    client: Arc<ScriptedClient>,
    state: Arc<dyn PipelineState>,
    warehouse: Arc<MemoryWarehouse>,
    data_dir: &Path,
) -> Pipeline {
    let client: Arc<dyn SourceClient> = client;
    let sensor = Sensor::new(client.clone(), templates(), Duration::from_secs(10));
    let task = IngestionTask::new(
        client,
        TableMerge::new(warehouse),
        "cms",
        PIPELINE,
        data_dir.join("scratch"),
        templates().primary(),
    );
    Pipeline::new(PIPELINE, state, sensor, task).with_run_log(data_dir.join("runs"))
}

fn run_log_lines(data_dir: &Path) -> Vec<serde_json::Value> {
    std::fs::read_to_string(data_dir.join("runs").join("runs.jsonl"))
        .unwrap_or_default()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

#[tokio::test]
async fn tick_discovers_and_drain_loads() {
    let data = tempfile::tempdir().unwrap();
    let jan = templates().candidate_urls(&period("January-2024"));
    let client = ScriptedClient::new()
        .with_head(&jan[1], 200)
        .with_get(&jan[1], 200, zip_of(&[("jan.csv", ENROLLMENT_CSV)]))
        .into_arc();
    let state: Arc<dyn PipelineState> = Arc::new(FileState::open(data.path().join("state"), PIPELINE).unwrap());
    let warehouse = Arc::new(MemoryWarehouse::new());
    let pipeline = pipeline(client.clone(), state.clone(), warehouse.clone(), data.path());

    let report = pipeline.tick_and_drain().await.unwrap();

    assert!(matches!(report.sensor, SensorOutcome::Requested { .. }));
    assert_eq!(report.runs.len(), 1);
    let run = &report.runs[0];
    assert_eq!(run.status, RunStatus::Succeeded);
    assert_eq!(run.row_count, Some(3));
    assert_eq!(run.url.as_deref(), Some(jan[1].as_str()));
    assert_eq!(warehouse.row_count(&target()).await, Some(3));

    // The download went to the URL the sensor resolved.
    assert!(client.calls().contains(&format!("GET {}", jan[1])));

    let log = run_log_lines(data.path());
    assert_eq!(log.len(), 1);
    assert_eq!(log[0]["run_key"], "January-2024");
    assert_eq!(log[0]["status"], "succeeded");
    assert_eq!(log[0]["run_config"]["ops"][PIPELINE]["config"]["url"], jan[1].as_str());

    // Persisted.
    let reopened = FileState::open(data.path().join("state"), PIPELINE).unwrap();
    assert_eq!(reopened.cursor().await.unwrap(), Some(period("January-2024")));
    assert!(reopened.pending_runs().await.unwrap().is_empty());
}

#[tokio::test]
async fn failed_run_is_recorded_and_cursor_stays_committed() {
    let data = tempfile::tempdir().unwrap();
    let jan = templates().candidate_urls(&period("January-2024"));
    // Available on HEAD, but the download itself fails.
    let client = ScriptedClient::new()
        .with_head(&jan[0], 200)
        .with_get(&jan[0], 503, Vec::new())
        .into_arc();
    let state: Arc<dyn PipelineState> = Arc::new(MemoryState::new());
    let warehouse = Arc::new(MemoryWarehouse::new());
    let pipeline = pipeline(client, state.clone(), warehouse.clone(), data.path());

    let report = pipeline.tick_and_drain().await.unwrap();

    let run = &report.runs[0];
    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.error.as_deref().unwrap_or_default().contains("503"));
    assert_eq!(state.cursor().await.unwrap(), Some(period("January-2024")));
    assert!(warehouse.snapshot(&target()).await.is_none());

    // The next tick moves on; the failed run is not retried automatically.
    let next = pipeline.tick_and_drain().await.unwrap();
    assert!(matches!(next.sensor, SensorOutcome::Skipped { .. }));
    assert!(next.runs.is_empty());
    assert_eq!(run_log_lines(data.path())[0]["status"], "failed");
}

#[tokio::test]
async fn materialize_reruns_registered_partition() {
    let data = tempfile::tempdir().unwrap();
    let jan = templates().candidate_urls(&period("January-2024"));
    let client = ScriptedClient::new()
        .with_head(&jan[0], 200)
        .with_get(&jan[0], 200, zip_of(&[("jan.csv", ENROLLMENT_CSV)]))
        .into_arc();
    let state: Arc<dyn PipelineState> = Arc::new(MemoryState::new());
    let warehouse = Arc::new(MemoryWarehouse::new());
    let pipeline = pipeline(client, state.clone(), warehouse.clone(), data.path());

    pipeline.tick_and_drain().await.unwrap();
    // Without a URL the primary template is used, which is jan[0] here.
    let rerun = pipeline.materialize(period("January-2024"), None).await.unwrap();

    assert!(rerun.run_key.starts_with("January-2024/manual-"));
    assert_eq!(rerun.status, RunStatus::Succeeded);
    // Append mode: a rerun duplicates the period's rows.
    assert_eq!(warehouse.row_count(&target()).await, Some(6));
    assert_eq!(state.runs().await.unwrap().len(), 2);
}

#[tokio::test]
async fn materialize_unknown_partition_fails() {
    let data = tempfile::tempdir().unwrap();
    let state: Arc<dyn PipelineState> = Arc::new(MemoryState::new());
    let pipeline = pipeline(
        ScriptedClient::new().into_arc(),
        state,
        Arc::new(MemoryWarehouse::new()),
        data.path(),
    );

    let err = pipeline.materialize(period("May-2024"), None).await.unwrap_err();
    assert!(matches!(err, PipelineError::UnknownPartition(p) if p == period("May-2024")));
}

#[tokio::test]
async fn status_reports_cursor_and_next_period() {
    let data = tempfile::tempdir().unwrap();
    let state: Arc<dyn PipelineState> = Arc::new(MemoryState::new());
    state.register_partition(period("December-2024")).await.unwrap();
    state.commit_cursor(None, period("December-2024")).await.unwrap();
    let pipeline = pipeline(
        ScriptedClient::new().into_arc(),
        state,
        Arc::new(MemoryWarehouse::new()),
        data.path(),
    );

    let status = pipeline.status().await.unwrap();
    assert_eq!(status.pipeline, PIPELINE);
    assert_eq!(status.cursor, Some(period("December-2024")));
    assert_eq!(status.next_period, period("January-2025"));
    assert_eq!(status.partitions, vec![period("December-2024")]);

    let json = serde_json::to_value(&status).unwrap();
    assert_eq!(json["cursor"], "December-2024");
}

#[tokio::test]
async fn run_left_running_by_a_dead_process_is_failed_on_next_drain() {
    let data = tempfile::tempdir().unwrap();
    let state_dir = data.path().join("state");
    let jan = templates().candidate_urls(&period("January-2024"));
    {
        let state = FileState::open(&state_dir, PIPELINE).unwrap();
        state.register_partition(period("January-2024")).await.unwrap();
        state.request_run(RunRequest::discovered(period("January-2024"), jan[0].clone())).await.unwrap();
        state.commit_cursor(None, period("January-2024")).await.unwrap();
        state.mark_running("January-2024").await.unwrap();
    }

    let client = ScriptedClient::new()
        .with_get(&jan[0], 200, zip_of(&[("jan.csv", ENROLLMENT_CSV)]))
        .into_arc();
    let state: Arc<dyn PipelineState> = Arc::new(FileState::open(&state_dir, PIPELINE).unwrap());
    let warehouse = Arc::new(MemoryWarehouse::new());
    let pipeline = pipeline(client, state.clone(), warehouse.clone(), data.path());

    let report = pipeline.tick_and_drain().await.unwrap();
    assert!(report.runs.is_empty());

    let runs = state.runs().await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Failed);
    assert_eq!(runs[0].error.as_deref(), Some(INTERRUPTED));

    let log = run_log_lines(data.path());
    assert_eq!(log.len(), 1);
    assert_eq!(log[0]["run_key"], "January-2024");
    assert_eq!(log[0]["status"], "failed");
    assert_eq!(log[0]["error"], INTERRUPTED);

    // Still recoverable by hand.
    let rerun = pipeline.materialize(period("January-2024"), None).await.unwrap();
    assert_eq!(rerun.status, RunStatus::Succeeded);
    assert_eq!(warehouse.row_count(&target()).await, Some(3));
}

#[tokio::test]
async fn shutdown_mid_download_fails_the_run_as_interrupted() {
    let data = tempfile::tempdir().unwrap();
    let jan = templates().candidate_urls(&period("January-2024"));
    let client = ScriptedClient::new()
        .with_head(&jan[0], 200)
        .with_stalled_get(&jan[0])
        .into_arc();
    let state: Arc<dyn PipelineState> = Arc::new(FileState::open(data.path().join("state"), PIPELINE).unwrap());
    let warehouse = Arc::new(MemoryWarehouse::new());
    let pipeline = pipeline(client.clone(), state.clone(), warehouse.clone(), data.path());

    let shutdown = tokio::time::sleep(Duration::from_millis(200));
    tokio::time::timeout(Duration::from_secs(10), pipeline.run_until(Duration::from_secs(3600), shutdown))
        .await
        .expect("shutdown must stop the loop while a download hangs");

    assert!(client.calls().contains(&format!("GET {}", jan[0])));
    let runs = state.runs().await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Failed);
    assert_eq!(runs[0].error.as_deref(), Some(INTERRUPTED));
    assert!(state.pending_runs().await.unwrap().is_empty());
    assert!(warehouse.snapshot(&target()).await.is_none());
    assert_eq!(run_log_lines(data.path())[0]["error"], INTERRUPTED);
}

#[tokio::test]
async fn zero_interval_does_not_panic() {
    let data = tempfile::tempdir().unwrap();
    let state: Arc<dyn PipelineState> = Arc::new(MemoryState::new());
    let pipeline = pipeline(
        ScriptedClient::new().into_arc(),
        state.clone(),
        Arc::new(MemoryWarehouse::new()),
        data.path(),
    );

    tokio::time::timeout(Duration::from_secs(10), pipeline.run_until(Duration::ZERO, async {}))
        .await
        .unwrap();
    assert_eq!(state.cursor().await.unwrap(), None);
}
