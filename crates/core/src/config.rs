use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Substitution point replaced by the period's canonical text in URL templates.
pub const PARTITION_KEY_PLACEHOLDER: &str = "{partition_key}";

pub const DEFAULT_URL_TEMPLATE: &str = "https://www.cms.gov/files/zip/ma-enrollment-state-county-contract-{partition_key}-abridged-version-exclude-rows-10-or-less-enrollees.zip";

pub const DEFAULT_FALLBACK_URL_TEMPLATES: &[&str] = &[
    "https://www.cms.gov/files/zip/ma-enrollment-state/county/contract-{partition_key}-abridged-version-exclude-rows-10-or-less-enrollees.zip",
    "https://www.cms.gov/files/zip/ma-enrollment-state/county/contract-{partition_key}-abridged-version-exclude-rows-10-or-less.zip",
];

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u16(profile: &str, key: &str, default: u16) -> u16 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u32(profile: &str, key: &str, default: u32) -> u32 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub storage: StorageConfig,
    pub postgres: PostgresConfig,
    pub source: SourceConfig,
    pub sensor: SensorConfig,
    pub target: TargetConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `CMSFEED_PROFILE`. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("CMSFEED_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            storage: StorageConfig::from_env_profiled(p),
            postgres: PostgresConfig::from_env_profiled(p),
            source: SourceConfig::from_env_profiled(p),
            sensor: SensorConfig::from_env_profiled(p),
            target: TargetConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  storage:   data_dir={}, scratch_dir={}", self.storage.data_dir.display(), self.storage.scratch_dir.display());
        tracing::info!("  postgres:  host={}, db={}, configured={}", self.postgres.host, self.postgres.database, self.postgres.is_configured());
        tracing::info!("  source:    {} candidate template(s), probe_timeout={}s", self.source.templates().len(), self.source.probe_timeout_secs);
        tracing::info!("  sensor:    interval={}s", self.sensor.interval_secs);
        tracing::info!("  target:    {}.{}", self.target.schema, self.target.table);
    }
}

// ── Storage ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    /// Download + extraction scratch space; emptied after every run.
    pub scratch_dir: PathBuf,
}

impl StorageConfig {
    fn from_env_profiled(p: &str) -> Self {
        let data_dir = PathBuf::from(profiled_env_or(p, "DATA_DIR", "data"));
        let scratch_dir = profiled_env_opt(p, "SCRATCH_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("scratch"));
        Self { data_dir, scratch_dir }
    }

    pub fn state_dir(&self) -> PathBuf {
        self.data_dir.join("state")
    }

    pub fn run_log_dir(&self) -> PathBuf {
        self.data_dir.join("runs")
    }
}

// ── PostgreSQL ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub ssl_mode: String,
    pub max_connections: u32,
}

impl PostgresConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            host: profiled_env_or(p, "PG_HOST", "localhost"),
            port: profiled_env_u16(p, "PG_PORT", 5432),
            database: profiled_env_or(p, "PG_DATABASE", "ingestion"),
            username: profiled_env_opt(p, "PG_USERNAME"),
            password: profiled_env_opt(p, "PG_PASSWORD"),
            ssl_mode: profiled_env_or(p, "PG_SSL_MODE", "prefer"),
            max_connections: profiled_env_u32(p, "PG_MAX_CONNECTIONS", 5),
        }
    }

    pub fn connection_string(&self) -> String {
        let user = self.username.as_deref().unwrap_or("postgres");
        let pass = self.password.as_deref().unwrap_or("");
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            user, pass, self.host, self.port, self.database, self.ssl_mode
        )
    }

    pub fn is_configured(&self) -> bool {
        self.username.is_some()
    }
}

// ── Source (publisher URLs) ───────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Primary template; also the one the ingestion task falls back to
    /// when a run carries no resolved URL.
    pub url_template: String,
    /// Tried in order after the primary.
    pub fallback_templates: Vec<String>,
    pub probe_timeout_secs: u64,
}

impl SourceConfig {
    fn from_env_profiled(p: &str) -> Self {
        let fallback_templates = match profiled_env_opt(p, "CMS_FALLBACK_URL_TEMPLATES") {
            Some(raw) => raw
                .split(';')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
            None => DEFAULT_FALLBACK_URL_TEMPLATES.iter().map(|s| s.to_string()).collect(),
        };
        Self {
            url_template: profiled_env_or(p, "CMS_URL_TEMPLATE", DEFAULT_URL_TEMPLATE),
            fallback_templates,
            probe_timeout_secs: profiled_env_u64(p, "PROBE_TIMEOUT_SECS", 10),
        }
    }

    /// Primary template followed by the fallbacks.
    pub fn templates(&self) -> Vec<String> {
        std::iter::once(self.url_template.clone())
            .chain(self.fallback_templates.iter().cloned())
            .collect()
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url_template: DEFAULT_URL_TEMPLATE.to_string(),
            fallback_templates: DEFAULT_FALLBACK_URL_TEMPLATES.iter().map(|s| s.to_string()).collect(),
            probe_timeout_secs: 10,
        }
    }
}

// ── Sensor ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorConfig {
    /// Minimum interval between discovery ticks.
    pub interval_secs: u64,
    /// Name of the pipeline; keys the persisted state file.
    pub pipeline: String,
}

impl SensorConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            interval_secs: profiled_env_u64(p, "SENSOR_INTERVAL_SECS", 60 * 60),
            pipeline: profiled_env_or(p, "PIPELINE_NAME", "medicare_advantage_enrollment_by_state_county_contract"),
        }
    }

    /// Tick interval, never below one second.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

// ── Target table ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    pub schema: String,
    pub table: String,
}

impl TargetConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            schema: profiled_env_or(p, "TARGET_SCHEMA", "cms"),
            table: profiled_env_or(p, "TARGET_TABLE", "medicare_advantage_enrollment_by_state_county_contract"),
        }
    }
}
