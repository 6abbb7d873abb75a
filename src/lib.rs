pub mod catalog;
pub mod config;
pub mod datasets;
pub mod id;
pub mod notifications;
pub mod pipeline;
pub mod source;
pub mod storage;
pub mod telemetry;

pub use datasets::{IngestError, IngestionJob, JobStatus, PipelineError};
pub use pipeline::{JobQueue, PipelineOrchestrator};
