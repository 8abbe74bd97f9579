use cmsfeed_core::Period;
use cmsfeed_warehouse::MergeError;
use thiserror::Error;

/// Transport-level failure talking to the publisher (DNS, TLS, timeout,
/// connection reset). HTTP status codes are not transport errors.
#[derive(Debug, Error)]
#[error("transport error for {url}: {message}")]
pub struct TransportError {
    pub url: String,
    pub message: String,
}

impl TransportError {
    pub fn new(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self { url: url.into(), message: message.into() }
    }

    pub fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        let message = if err.is_timeout() {
            format!("timed out: {err}")
        } else {
            err.to_string()
        };
        Self::new(url, message)
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("URL template has no {{partition_key}} placeholder: {0}")]
    MissingPlaceholder(String),

    #[error("HTTP client setup failed: {0}")]
    Client(#[from] reqwest::Error),
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("state I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("state JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("cursor moved concurrently: expected {expected:?}, found {found:?}")]
    CursorConflict {
        expected: Option<Period>,
        found: Option<Period>,
    },

    #[error("unknown run: {0}")]
    UnknownRun(String),
}

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("unreadable archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("archive has no .csv member")]
    NoTabularMember,

    #[error("CSV parse error: {0}")]
    Csv(#[from] arrow::error::ArrowError),

    #[error("source column collides with derived column: {0}")]
    ReservedColumn(String),

    #[error("tabular member {0} has no data rows")]
    Empty(String),
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("fetch of {url} failed with HTTP status {status}")]
    Fetch { url: String, status: u16 },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("format error: {0}")]
    Format(#[from] FormatError),

    #[error("merge error: {0}")]
    Merge(#[from] MergeError),

    #[error("scratch I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("extraction task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    State(#[from] StateError),

    #[error("partition {0} is not registered")]
    UnknownPartition(Period),
}
