//! Discovery loop: one sensor evaluation per tick.
//!
//! ```text
//! cursor ─► next_period ─► candidate_urls ─► probe
//!                                              │
//!              hit: register partition ◄───────┤
//!                   request run (key = period) │
//!                   commit cursor              │
//!             miss: skip, cursor untouched ◄───┘
//! ```
//! The cursor is committed last. A crash between the steps replays them on
//! the next tick: registration is idempotent and the run request is
//! deduplicated by key.

use std::sync::Arc;
use std::time::Duration;

use cmsfeed_core::{next_period, Period};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::StateError;
use crate::source::{probe, SourceClient, SourceTemplates};
use crate::state::{PipelineState, RunRequest};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SensorOutcome {
    /// Data found; a run was requested (or had already been) and the cursor moved.
    Requested { request: RunRequest, newly_queued: bool },
    /// Nothing available for `period` yet.
    Skipped { period: Period, reason: String },
}

pub struct Sensor {
    client: Arc<dyn SourceClient>,
    templates: SourceTemplates,
    probe_timeout: Duration,
}

impl Sensor {
    pub fn new(client: Arc<dyn SourceClient>, templates: SourceTemplates, probe_timeout: Duration) -> Self {
        Self { client, templates, probe_timeout }
    }

    /// Evaluate once against `state`.
    ///
    /// Probe failures never fail the tick; only state errors do.
    pub async fn evaluate(&self, state: &dyn PipelineState) -> Result<SensorOutcome, StateError> {
        let cursor = state.cursor().await?;
        match cursor {
            Some(c) => info!(cursor = %c, "resuming from cursor"),
            None => info!(epoch = %Period::EPOCH, "no cursor, starting from epoch"),
        }

        let period = next_period(cursor.as_ref());
        let urls = self.templates.candidate_urls(&period);
        info!(period = %period, candidates = urls.len(), "checking data availability");

        let Some(hit) = probe(self.client.as_ref(), &urls, self.probe_timeout).await else {
            warn!(period = %period, "data not found at any candidate URL, no run requested");
            return Ok(SensorOutcome::Skipped {
                period,
                reason: format!("Data for {period} not yet available."),
            });
        };

        if !state.register_partition(period).await? {
            info!(period = %period, "partition already registered");
        }

        let request = RunRequest::discovered(period, hit.url);
        let newly_queued = state.request_run(request.clone()).await?;
        if !newly_queued {
            info!(run_key = %request.run_key, "run already requested for this key");
        }

        state.commit_cursor(cursor, period).await?;
        info!(period = %period, url = ?request.config.url, "cursor advanced, run requested");

        Ok(SensorOutcome::Requested { request, newly_queued })
    }
}
