//! Ingestion task: download one monthly release and append it to the
//! target table.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use cmsfeed_core::Period;
use cmsfeed_warehouse::{TableMerge, WriteAction};
use serde::Serialize;
use tracing::{info, warn};

use crate::archive::extract_tabular;
use crate::error::TaskError;
use crate::source::{instantiate, SourceClient};
use crate::table::{read_csv, tag_batch};

/// One ingestion run's parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionRequest {
    pub partition_key: Period,
    /// Resolved by the sensor. `None` instantiates the configured template.
    pub url: Option<String>,
}

/// Observable result of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct IngestionReport {
    pub partition_key: Period,
    pub url: String,
    /// Archive member that was loaded.
    pub member: String,
    pub row_count: usize,
    pub action: WriteAction,
    pub created_at: DateTime<Utc>,
}

pub struct IngestionTask {
    client: Arc<dyn SourceClient>,
    merge: TableMerge,
    schema: String,
    table: String,
    scratch_dir: PathBuf,
    url_template: String,
}

impl IngestionTask {
    pub fn new(
        client: Arc<dyn SourceClient>,
        merge: TableMerge,
        schema: impl Into<String>,
        table: impl Into<String>,
        scratch_dir: impl Into<PathBuf>,
        url_template: impl Into<String>,
    ) -> Self {
        Self {
            client,
            merge,
            schema: schema.into(),
            table: table.into(),
            scratch_dir: scratch_dir.into(),
            url_template: url_template.into(),
        }
    }

    /// `schema.table` label for logs.
    pub fn target(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }

    /// URL the run downloads: the resolved one, else the template.
    pub fn resolve_url(&self, request: &IngestionRequest) -> String {
        request
            .url
            .clone()
            .unwrap_or_else(|| instantiate(&self.url_template, &request.partition_key))
    }

    /// Fetch, extract, parse, tag and append.
    ///
    /// Any failure before the append leaves the table untouched. The scratch
    /// directory of the run is removed on every exit path.
    pub async fn run(&self, request: &IngestionRequest) -> Result<IngestionReport, TaskError> {
        let period = request.partition_key;
        let url = self.resolve_url(request);
        info!(period = %period, url = %url, target = %self.target(), "ingestion started");

        let (status, body) = self.client.get(&url).await?;
        if !(200..300).contains(&status) {
            return Err(TaskError::Fetch { url, status });
        }
        info!(period = %period, bytes = body.len(), "downloaded archive");

        tokio::fs::create_dir_all(&self.scratch_dir).await?;
        let scratch = tempfile::Builder::new()
            .prefix("cmsfeed-")
            .tempdir_in(&self.scratch_dir)?;
        let scratch_path = scratch.path().to_path_buf();

        // Blocking work: unzip and parse. `scratch` is dropped (and the
        // directory deleted) when this scope ends, whatever the outcome.
        let parsed = tokio::task::spawn_blocking(move || {
            let (member, csv_path) = extract_tabular(&body, &scratch_path)?;
            let batch = read_csv(&csv_path, &member)?;
            Ok::<_, TaskError>((member, batch))
        })
        .await;
        if let Err(e) = scratch.close() {
            warn!(error = %e, "failed to remove scratch directory");
        }
        let (member, batch) = parsed??;

        let created_at = Utc::now();
        let tagged = tag_batch(&batch, &period, created_at)?;
        let outcome = self.merge.load(&self.schema, &self.table, &tagged, false).await?;

        let report = IngestionReport {
            partition_key: period,
            url,
            member,
            row_count: outcome.rows,
            action: outcome.action,
            created_at,
        };
        info!(
            period = %period,
            url = %report.url,
            member = %report.member,
            rows = report.row_count,
            action = ?report.action,
            "ingestion finished"
        );
        Ok(report)
    }
}
