// src/storage/mod.rs
use crate::datasets::{ColumnSchema, StorageTarget};
use anyhow::Result;
use async_trait::async_trait;
use std::fmt::Debug;
use std::path::PathBuf;

pub mod discovery;
pub mod filesystem;
pub mod selector;

// Re-exports
pub use discovery::StaticDiscovery;
pub use filesystem::FilesystemStorage;
pub use selector::select_least_loaded;

/// Arguments of one bulk load call.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkLoadRequest {
    pub table_uid: String,
    pub schema: Vec<ColumnSchema>,
    /// Add rows to the existing table instead of replacing its contents.
    pub append: bool,
    /// The table does not exist on the target yet.
    pub create_table: bool,
    /// Uploaded file to read rows from.
    pub source: PathBuf,
}

/// Source of the storage targets a new table may be placed on.
#[async_trait]
pub trait StorageDiscovery: Debug + Send + Sync {
    async fn list_candidates(&self) -> Result<Vec<StorageTarget>>;
}

/// Call contract of a storage backend.
#[async_trait]
pub trait StorageClient: Debug + Send + Sync {
    /// Load every data row of `request.source` into the table. Returns the
    /// number of rows written.
    async fn bulk_load(&self, target: &StorageTarget, request: BulkLoadRequest) -> Result<u64>;

    /// Drop a table and its data. Deleting a missing table is not an error.
    async fn delete_table(&self, target: &StorageTarget, table_uid: &str) -> Result<()>;
}
