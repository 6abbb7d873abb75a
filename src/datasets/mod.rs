//! Dataset, column and table model shared by the ingestion pipeline.

pub mod error;
pub mod lattice;
pub mod schema;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use error::{IngestError, PipelineError, Stage};
pub use lattice::{narrow, DateLayout, DATE_LAYOUTS};
pub use schema::{infer_schema, SchemaInferencer};

/// Hypothesized type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    #[default]
    String,
    Int,
    Float,
    Date,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Int => "int",
            Self::Float => "float",
            Self::Date => "date",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Int | Self::Float)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "string" => Ok(Self::String),
            "int" => Ok(Self::Int),
            "float" => Ok(Self::Float),
            "date" => Ok(Self::Date),
            other => anyhow::bail!("Unknown data type '{}'", other),
        }
    }
}

/// Default aggregation applied to a column by downstream consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AggregationFn {
    Sum,
    #[default]
    Count,
}

impl AggregationFn {
    /// Numeric columns sum, everything else counts.
    pub fn for_type(data_type: DataType) -> Self {
        if data_type.is_numeric() {
            Self::Sum
        } else {
            Self::Count
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Count => "count",
        }
    }
}

impl FromStr for AggregationFn {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sum" => Ok(Self::Sum),
            "count" => Ok(Self::Count),
            other => anyhow::bail!("Unknown aggregation function '{}'", other),
        }
    }
}

/// One column of an inferred schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSchema {
    /// Stable identifier, preserved across re-inference runs.
    pub uid: String,
    /// Positional index as text, or a user-provided name.
    pub name: String,
    /// Header text the column was seeded from.
    pub raw_sample: String,
    pub data_type: DataType,
    /// Matched date layout; only set when `data_type` is `Date`.
    pub date_format: Option<String>,
    pub aggregation_fn: AggregationFn,
    /// Owning table uid once the dataset has been materialized.
    pub parent_uid: Option<String>,
}

impl ColumnSchema {
    /// Seed a column from its header position, typed as `String`.
    pub fn seeded(position: usize, header: &str) -> Self {
        Self {
            uid: crate::id::generate_column_id(),
            name: position.to_string(),
            raw_sample: header.to_string(),
            data_type: DataType::String,
            date_format: None,
            aggregation_fn: AggregationFn::Count,
            parent_uid: None,
        }
    }
}

/// Whether a run creates a fresh schema or appends to an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IngestMode {
    #[default]
    Create,
    Append,
}

impl IngestMode {
    pub fn is_append(&self) -> bool {
        matches!(self, Self::Append)
    }
}

/// One file-to-storage pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionJob {
    pub file_id: String,
    pub dataset_id: String,
    pub user_id: String,
    pub mode: IngestMode,
}

/// Pipeline status mirrored into the metadata store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Uploaded,
    Validating,
    Validated,
    ValidationError,
    SchemaInferred,
    SchemaError,
    Uploading,
    Completed,
    UploadError,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uploaded => "UPLOADED",
            Self::Validating => "VALIDATING",
            Self::Validated => "VALIDATED",
            Self::ValidationError => "VALIDATION_ERROR",
            Self::SchemaInferred => "SCHEMA_INFERRED",
            Self::SchemaError => "SCHEMA_ERROR",
            Self::Uploading => "UPLOADING",
            Self::Completed => "COMPLETED",
            Self::UploadError => "UPLOAD_ERROR",
        }
    }

    /// Terminal error states a run halts in.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Self::ValidationError | Self::SchemaError | Self::UploadError
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "UPLOADED" => Self::Uploaded,
            "VALIDATING" => Self::Validating,
            "VALIDATED" => Self::Validated,
            "VALIDATION_ERROR" => Self::ValidationError,
            "SCHEMA_INFERRED" => Self::SchemaInferred,
            "SCHEMA_ERROR" => Self::SchemaError,
            "UPLOADING" => Self::Uploading,
            "COMPLETED" => Self::Completed,
            "UPLOAD_ERROR" => Self::UploadError,
            other => anyhow::bail!("Unknown job status '{}'", other),
        })
    }
}

/// A storage backend advertised by discovery. Never mutated by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageTarget {
    pub id: String,
    pub dataset_count: u64,
    #[serde(default)]
    pub connection_info: String,
}

/// Binding of a dataset to a table on a storage target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableHandle {
    pub table_uid: String,
    pub storage_target_id: String,
    /// True only for the run that created the handle.
    #[serde(skip)]
    pub created: bool,
}

impl TableHandle {
    /// Physical table name used on the storage target.
    pub fn table_name(&self) -> String {
        format!("table_{}", self.table_uid)
    }
}

/// Uploaded file a job reads from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileUpload {
    pub id: String,
    pub dataset_id: String,
    pub user_id: String,
    pub name: String,
    pub location: String,
    pub status: JobStatus,
}

/// Dataset record owning the columns and table of an upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    pub id: String,
    pub user_id: String,
    pub name: String,
    /// Set after the first successful load; later loads skip table creation.
    pub table_created: bool,
    pub storage_target_id: Option<String>,
}
