//! Source prober: candidate URLs for a period and the availability check.
//!
//! Only an explicit `200 OK` on a `HEAD` request counts as available. Any
//! other status moves on to the next candidate, and so does a transport
//! error, which is logged and never aborts the probe.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use cmsfeed_core::config::{SourceConfig, PARTITION_KEY_PLACEHOLDER};
use cmsfeed_core::Period;
use reqwest::redirect::Policy;
use reqwest::Client;
use tracing::{debug, info, warn};

use crate::error::{SourceError, TransportError};

/// HTTP collaborator used by the sensor (HEAD) and the ingestion task (GET).
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Existence check without fetching the body. Returns the final status
    /// after redirects.
    async fn head(&self, url: &str, timeout: Duration) -> Result<u16, TransportError>;

    /// Full download. Returns the status and the body.
    async fn get(&self, url: &str) -> Result<(u16, Bytes), TransportError>;
}

// ── URL templates ───────────────────────────────────────────────────

/// Ordered URL templates: the primary first, then the fallbacks.
#[derive(Debug, Clone)]
pub struct SourceTemplates {
    primary: String,
    fallbacks: Vec<String>,
}

impl SourceTemplates {
    /// Every template must contain `{partition_key}`.
    pub fn new(primary: impl Into<String>, fallbacks: Vec<String>) -> Result<Self, SourceError> {
        let primary = primary.into();
        for template in std::iter::once(&primary).chain(fallbacks.iter()) {
            if !template.contains(PARTITION_KEY_PLACEHOLDER) {
                return Err(SourceError::MissingPlaceholder(template.clone()));
            }
        }
        Ok(Self { primary, fallbacks })
    }

    pub fn from_config(config: &SourceConfig) -> Result<Self, SourceError> {
        Self::new(config.url_template.clone(), config.fallback_templates.clone())
    }

    pub fn primary(&self) -> &str {
        &self.primary
    }

    /// Candidate URLs for `period`, primary first. Never empty.
    pub fn candidate_urls(&self, period: &Period) -> Vec<String> {
        std::iter::once(&self.primary)
            .chain(self.fallbacks.iter())
            .map(|t| instantiate(t, period))
            .collect()
    }
}

/// Substitute the period's canonical text into a template.
pub fn instantiate(template: &str, period: &Period) -> String {
    template.replace(PARTITION_KEY_PLACEHOLDER, &period.to_string())
}

// ── Probe ───────────────────────────────────────────────────────────

/// First candidate that answered `200 OK`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeHit {
    pub url: String,
    pub status: u16,
}

/// Check `urls` in order and return the first available one.
///
/// `None` means nothing is available yet, whether every candidate answered
/// with a non-200 status or none could be reached at all.
pub async fn probe(client: &dyn SourceClient, urls: &[String], timeout: Duration) -> Option<ProbeHit> {
    for url in urls {
        match client.head(url, timeout).await {
            Ok(200) => {
                info!(url = %url, "data source is available");
                return Some(ProbeHit { url: url.clone(), status: 200 });
            }
            Ok(status) => {
                info!(url = %url, status, "candidate not available, trying next");
            }
            Err(e) => {
                warn!(url = %url, error = %e, "probe failed, trying next");
            }
        }
    }
    debug!(candidates = urls.len(), "no candidate available");
    None
}

// ── reqwest client ──────────────────────────────────────────────────

/// [`SourceClient`] over `reqwest`, following redirects.
pub struct ReqwestClient {
    client: Client,
}

impl ReqwestClient {
    pub fn new() -> Result<Self, SourceError> {
        let client = Client::builder()
            .redirect(Policy::limited(10))
            .user_agent(concat!("cmsfeed/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl SourceClient for ReqwestClient {
    async fn head(&self, url: &str, timeout: Duration) -> Result<u16, TransportError> {
        let response = self
            .client
            .head(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(url, e))?;
        Ok(response.status().as_u16())
    }

    async fn get(&self, url: &str) -> Result<(u16, Bytes), TransportError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(url, e))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::from_reqwest(url, e))?;
        Ok((status, body))
    }
}
