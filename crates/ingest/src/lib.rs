//! Discovery-driven ingestion of the monthly CMS Medicare Advantage
//! enrollment release.
//!
//! Components, leaves first:
//! - [`source`]: candidate URLs per period and the availability probe.
//! - [`state`]: cursor, partition registry and run queue.
//! - [`sensor`]: the discovery loop.
//! - [`archive`], [`table`], [`task`]: download, extract, parse, tag, append.
//! - [`pipeline`]: runs the sensor and drains the queue.

pub mod archive;
pub mod error;
pub mod pipeline;
pub mod sensor;
pub mod source;
pub mod state;
pub mod table;
pub mod task;

pub use error::{FormatError, PipelineError, SourceError, StateError, TaskError, TransportError};
pub use pipeline::{Pipeline, PipelineStatus, TickReport};
pub use sensor::{Sensor, SensorOutcome};
pub use source::{probe, ProbeHit, ReqwestClient, SourceClient, SourceTemplates};
pub use state::{
    FileState, MemoryState, PipelineState, RunConfig, RunRecord, RunRequest, RunResult, RunStatus, INTERRUPTED,
};
pub use task::{IngestionReport, IngestionRequest, IngestionTask};
