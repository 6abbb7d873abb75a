//! Error types for ingestion operations.

use std::fmt;
use thiserror::Error;

/// Errors raised by the ingestion core.
#[derive(Debug, Error)]
pub enum IngestError {
    /// A row after the header could not be read.
    #[error("read error: {0}")]
    ReadError(String),

    /// The header is unreadable or a row does not fit the schema.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Storage discovery returned no candidates.
    #[error("no storage candidates available")]
    NoCandidates,

    /// Bulk load, table creation or table deletion failed.
    #[error("storage error: {0}")]
    StorageError(String),

    /// Metadata persistence failed.
    #[error("metadata error: {0}")]
    MetadataError(String),

    /// The format validator itself failed (I/O, unreadable file).
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    /// Only CSV uploads are supported.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// A referenced upload or dataset does not exist.
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    /// The job queue no longer accepts work.
    #[error("job queue is closed")]
    QueueClosed,

    /// A request carried an unusable value.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Every queue slot is taken.
    #[error("job queue is full")]
    QueueFull,
}

impl IngestError {
    pub fn metadata(e: anyhow::Error) -> Self {
        Self::MetadataError(format!("{:#}", e))
    }

    pub fn storage(e: anyhow::Error) -> Self {
        Self::StorageError(format!("{:#}", e))
    }

    /// Returns true if the error was caused by the input rather than a collaborator.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::SchemaMismatch(_)
                | Self::UnsupportedFormat(_)
                | Self::InvalidRequest(_)
                | Self::NotFound { .. }
        )
    }
}

/// Pipeline stage an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validate,
    InferSchema,
    MaterializeTable,
    LoadData,
    Notify,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validate => "validate",
            Self::InferSchema => "infer_schema",
            Self::MaterializeTable => "materialize_table",
            Self::LoadData => "load_data",
            Self::Notify => "notify",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stage failure that halted a pipeline run.
#[derive(Debug, Error)]
#[error("stage '{stage}' failed: {source}")]
pub struct PipelineError {
    pub stage: Stage,
    #[source]
    pub source: IngestError,
}

impl PipelineError {
    pub fn new(stage: Stage, source: IngestError) -> Self {
        Self { stage, source }
    }
}

/// Attach a stage to a fallible result.
pub(crate) trait StageContext<T> {
    fn stage(self, stage: Stage) -> Result<T, PipelineError>;
}

impl<T> StageContext<T> for Result<T, IngestError> {
    fn stage(self, stage: Stage) -> Result<T, PipelineError> {
        self.map_err(|e| PipelineError::new(stage, e))
    }
}
