use crate::datasets::{ColumnSchema, Dataset, FileUpload, JobStatus, TableHandle};
use anyhow::Result;
use async_trait::async_trait;
use std::fmt::Debug;

/// Async interface for upload, dataset and schema metadata.
///
/// Every pipeline stage reads the state it needs through this trait at the
/// start of the stage; nothing is cached between stages.
#[async_trait]
pub trait MetadataStore: Debug + Send + Sync {
    /// Close the store. This is idempotent and can be called multiple times.
    async fn close(&self) -> Result<()> {
        // Default implementation does nothing - sqlx pools handle cleanup automatically
        Ok(())
    }

    /// Apply any pending schema migrations. Should be idempotent.
    async fn run_migrations(&self) -> Result<()>;

    /// Persist a new upload together with the dataset it feeds.
    async fn create_upload(&self, upload: &FileUpload, dataset: &Dataset) -> Result<()>;
    async fn get_upload(&self, file_id: &str) -> Result<Option<FileUpload>>;
    async fn update_upload_status(&self, file_id: &str, status: JobStatus) -> Result<()>;

    async fn get_dataset(&self, dataset_id: &str) -> Result<Option<Dataset>>;

    /// Record that the dataset's table exists on `storage_target_id`.
    async fn mark_table_created(&self, dataset_id: &str, storage_target_id: &str) -> Result<()>;

    /// Columns of a dataset in positional order. Empty if none were saved.
    async fn load_columns(&self, dataset_id: &str) -> Result<Vec<ColumnSchema>>;

    /// Insert columns with unknown uids, update the ones already stored.
    async fn save_columns(&self, dataset_id: &str, columns: &[ColumnSchema]) -> Result<()>;

    async fn load_table(&self, dataset_id: &str) -> Result<Option<TableHandle>>;

    /// Bind `handle` to the dataset unless a table is already bound.
    ///
    /// Returns the handle in force afterwards; `created` is true only if this
    /// call inserted it.
    async fn create_table_if_absent(
        &self,
        dataset_id: &str,
        handle: &TableHandle,
    ) -> Result<TableHandle>;

    /// Delete stored row errors of an upload. Returns how many were removed.
    async fn delete_row_errors(&self, file_id: &str) -> Result<u64>;
    async fn save_row_errors(&self, file_id: &str, errors: &[String]) -> Result<()>;
    async fn list_row_errors(&self, file_id: &str) -> Result<Vec<String>>;

    /// Delete a dataset with its uploads, columns, table handle and row
    /// errors. Returns true if the dataset existed.
    async fn delete_dataset(&self, dataset_id: &str) -> Result<bool>;
}
