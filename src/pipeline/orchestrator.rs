//! End-to-end ingestion of one uploaded file.
//!
//! A run moves an upload through
//! `Uploaded → Validating → Validated → SchemaInferred → Uploading → Completed`.
//! Schema inference is skipped for appends. A failing stage leaves the upload
//! in that stage's error state (`ValidationError`, `SchemaError` or
//! `UploadError`) and halts the run; nothing is retried.

use crate::catalog::{InMemoryCatalog, MetadataStore, SqliteCatalogManager};
use crate::config::AppConfig;
use crate::datasets::error::StageContext;
use crate::datasets::{
    infer_schema, ColumnSchema, Dataset, FileUpload, IngestError, IngestionJob, JobStatus,
    PipelineError, Stage, StorageTarget, TableHandle,
};
use crate::id::{generate_dataset_id, generate_table_id, generate_upload_id};
use crate::notifications::{Notification, Notifier};
use crate::pipeline::locks::DatasetLocks;
use crate::source::{CsvFormat, TabularFormat, ValidationReport};
use crate::storage::{
    select_least_loaded, BulkLoadRequest, FilesystemStorage, StaticDiscovery, StorageClient,
    StorageDiscovery,
};
use anyhow::Context;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Failing stage, the error status it leaves behind, and the cause.
type StageFailure = (Stage, JobStatus, IngestError);

/// Where a dataset's table lives, resolved at the start of materialization.
#[derive(Debug)]
struct Placement {
    dataset: Dataset,
    table: TableHandle,
    target: StorageTarget,
}

/// Sequences validation, schema inference, table materialization, loading
/// and notification for ingestion jobs.
#[derive(Debug)]
pub struct PipelineOrchestrator {
    catalog: Arc<dyn MetadataStore>,
    format: Arc<dyn TabularFormat>,
    discovery: Arc<dyn StorageDiscovery>,
    storage: Arc<dyn StorageClient>,
    notifier: Arc<dyn Notifier>,
    locks: DatasetLocks,
}

impl PipelineOrchestrator {
    pub fn new(
        catalog: Arc<dyn MetadataStore>,
        format: Arc<dyn TabularFormat>,
        discovery: Arc<dyn StorageDiscovery>,
        storage: Arc<dyn StorageClient>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            catalog,
            format,
            discovery,
            storage,
            notifier,
            locks: DatasetLocks::new(),
        }
    }

    /// Build an orchestrator for CSV uploads from configuration: the configured
    /// catalog (migrated), filesystem storage and the static target list.
    pub async fn from_config(
        config: &AppConfig,
        notifier: Arc<dyn Notifier>,
    ) -> anyhow::Result<Self> {
        let catalog: Arc<dyn MetadataStore> = match config.catalog.catalog_type.as_str() {
            "sqlite" => {
                let path = config
                    .catalog
                    .path
                    .as_deref()
                    .context("SQLite catalog requires 'path'")?;
                Arc::new(SqliteCatalogManager::new(path).await?)
            }
            "memory" => Arc::new(InMemoryCatalog::new()),
            other => anyhow::bail!("Invalid catalog type: {}", other),
        };
        catalog.run_migrations().await?;

        Ok(Self::new(
            catalog,
            Arc::new(CsvFormat::new()),
            Arc::new(StaticDiscovery::new(config.discovery.targets.clone())),
            Arc::new(FilesystemStorage::new(config.storage.base_dir.clone())),
            notifier,
        ))
    }

    pub fn catalog(&self) -> &Arc<dyn MetadataStore> {
        &self.catalog
    }

    /// Record a new upload. Without `dataset_id` a fresh dataset is created;
    /// otherwise the upload feeds the existing dataset (re-upload or append).
    #[tracing::instrument(name = "register_upload", skip(self, location), fields(ingestdb.user_id = %user_id))]
    pub async fn register_upload(
        &self,
        user_id: &str,
        name: &str,
        location: &str,
        dataset_id: Option<&str>,
    ) -> Result<FileUpload, IngestError> {
        if !self.format.accepts(Path::new(name)) {
            return Err(IngestError::UnsupportedFormat(format!(
                "'{}' is not a {} file",
                name,
                self.format.name()
            )));
        }

        let dataset = match dataset_id {
            Some(id) => self
                .catalog
                .get_dataset(id)
                .await
                .map_err(IngestError::metadata)?
                .ok_or_else(|| IngestError::NotFound {
                    kind: "dataset",
                    id: id.to_string(),
                })?,
            None => Dataset {
                id: generate_dataset_id(),
                user_id: user_id.to_string(),
                name: Path::new(name)
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| name.to_string()),
                table_created: false,
                storage_target_id: None,
            },
        };

        let upload = FileUpload {
            id: generate_upload_id(),
            dataset_id: dataset.id.clone(),
            user_id: user_id.to_string(),
            name: name.to_string(),
            location: location.to_string(),
            status: JobStatus::Uploaded,
        };
        self.catalog
            .create_upload(&upload, &dataset)
            .await
            .map_err(IngestError::metadata)?;

        info!(file_id = %upload.id, dataset_id = %dataset.id, "Registered upload");
        Ok(upload)
    }

    /// Put an upload back to `Uploaded` and drop its stored row errors so it
    /// can be run again.
    pub async fn reset_upload(&self, file_id: &str) -> Result<(), IngestError> {
        self.load_upload(file_id).await?;
        let removed = self
            .catalog
            .delete_row_errors(file_id)
            .await
            .map_err(IngestError::metadata)?;
        self.set_status(file_id, JobStatus::Uploaded).await?;
        info!(file_id = %file_id, removed_row_errors = removed, "Reset upload");
        Ok(())
    }

    /// Give a column a user-provided name, then refresh the owner's index.
    /// The type is left alone and the name survives later re-inference.
    #[tracing::instrument(
        name = "rename_column",
        skip(self, name),
        fields(ingestdb.dataset_id = %dataset_id, ingestdb.column_uid = %column_uid)
    )]
    pub async fn rename_column(
        &self,
        user_id: &str,
        dataset_id: &str,
        column_uid: &str,
        name: &str,
    ) -> Result<ColumnSchema, IngestError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(IngestError::InvalidRequest(
                "column name must not be empty".to_string(),
            ));
        }

        let _guard = self.locks.acquire(dataset_id).await;
        let owned = self
            .catalog
            .get_dataset(dataset_id)
            .await
            .map_err(IngestError::metadata)?
            .is_some_and(|d| d.user_id == user_id);
        if !owned {
            return Err(IngestError::NotFound {
                kind: "dataset",
                id: dataset_id.to_string(),
            });
        }

        let mut columns = self
            .catalog
            .load_columns(dataset_id)
            .await
            .map_err(IngestError::metadata)?;
        let column = columns
            .iter_mut()
            .find(|c| c.uid == column_uid)
            .ok_or_else(|| IngestError::NotFound {
                kind: "column",
                id: column_uid.to_string(),
            })?;
        column.name = name.to_string();
        let renamed = column.clone();

        self.catalog
            .save_columns(dataset_id, &columns)
            .await
            .map_err(IngestError::metadata)?;
        info!(name = %renamed.name, "Renamed column");

        if let Err(e) = self.notifier.refresh_index(user_id).await {
            warn!(user_id = %user_id, error = %e, "Index refresh failed");
        }
        Ok(renamed)
    }

    /// Delete a dataset and everything attached to it. The storage table is
    /// dropped first; metadata is only removed once that succeeded.
    ///
    /// Returns false if the dataset did not exist.
    #[tracing::instrument(name = "delete_dataset", skip(self), fields(ingestdb.dataset_id = %dataset_id))]
    pub async fn delete_dataset(&self, dataset_id: &str) -> Result<bool, IngestError> {
        let _guard = self.locks.acquire(dataset_id).await;

        let Some(dataset) = self
            .catalog
            .get_dataset(dataset_id)
            .await
            .map_err(IngestError::metadata)?
        else {
            return Ok(false);
        };

        let table = self
            .catalog
            .load_table(dataset_id)
            .await
            .map_err(IngestError::metadata)?;
        if let (true, Some(table)) = (dataset.table_created, table) {
            let target = self.resolve_target(&table.storage_target_id).await?;
            self.storage
                .delete_table(&target, &table.table_uid)
                .await
                .map_err(IngestError::storage)?;
            info!(table = %table.table_name(), target = %target.id, "Dropped dataset table");
        }

        self.catalog
            .delete_dataset(dataset_id)
            .await
            .map_err(IngestError::metadata)
    }

    /// Run every stage for one job and return the terminal status.
    #[tracing::instrument(
        name = "ingest",
        skip(self, job),
        fields(
            ingestdb.file_id = %job.file_id,
            ingestdb.dataset_id = %job.dataset_id,
            ingestdb.mode = ?job.mode,
        )
    )]
    pub async fn run(&self, job: &IngestionJob) -> Result<JobStatus, PipelineError> {
        let upload = self.load_upload(&job.file_id).await.stage(Stage::Validate)?;
        let path = PathBuf::from(&upload.location);

        let report = match self.validate(job, &upload, &path).await {
            Ok(report) => report,
            Err(e) => {
                return Err(self
                    .fail(job, &upload, Stage::Validate, JobStatus::ValidationError, e)
                    .await)
            }
        };
        self.send(
            &job.user_id,
            Notification::info(format!(
                "validated {} records in {}",
                report.records, upload.name
            )),
        )
        .await;

        let outcome = {
            let _guard = self.locks.acquire(&job.dataset_id).await;
            self.run_locked_stages(job, &path).await
        };
        let rows = match outcome {
            Ok(rows) => rows,
            Err((stage, status, e)) => return Err(self.fail(job, &upload, stage, status, e).await),
        };

        self.set_status(&job.file_id, JobStatus::Completed)
            .await
            .stage(Stage::Notify)?;
        info!(rows = rows.unwrap_or(0), "Ingestion completed");

        if let Err(e) = self.notifier.refresh_index(&job.user_id).await {
            warn!(user_id = %job.user_id, error = %e, "Index refresh failed");
        }
        self.send(
            &job.user_id,
            Notification::success(format!("processed {}", upload.name)),
        )
        .await;

        Ok(JobStatus::Completed)
    }

    /// Schema inference, table materialization and loading. Caller holds the
    /// dataset lock, so concurrent runs for one dataset neither seed two column
    /// sets nor create two tables.
    async fn run_locked_stages(
        &self,
        job: &IngestionJob,
        path: &Path,
    ) -> Result<Option<u64>, StageFailure> {
        if !job.mode.is_append() {
            self.infer(job, path)
                .await
                .map_err(|e| (Stage::InferSchema, JobStatus::SchemaError, e))?;
        }

        let upload_failed = |stage: Stage| move |e: IngestError| (stage, JobStatus::UploadError, e);
        self.set_status(&job.file_id, JobStatus::Uploading)
            .await
            .map_err(upload_failed(Stage::MaterializeTable))?;
        let placement = self
            .materialize_table(job)
            .await
            .map_err(upload_failed(Stage::MaterializeTable))?;
        self.load_data(job, path, placement)
            .await
            .map_err(upload_failed(Stage::LoadData))
    }

    #[tracing::instrument(name = "validate", skip_all)]
    async fn validate(
        &self,
        job: &IngestionJob,
        upload: &FileUpload,
        path: &Path,
    ) -> Result<ValidationReport, IngestError> {
        self.set_status(&job.file_id, JobStatus::Validating).await?;

        if !self.format.accepts(Path::new(&upload.name)) {
            return Err(IngestError::UnsupportedFormat(upload.name.clone()));
        }

        let format = Arc::clone(&self.format);
        let owned = path.to_path_buf();
        let report = tokio::task::spawn_blocking(move || format.validate(&owned))
            .await
            .map_err(|e| IngestError::ValidationFailed(format!("validator task failed: {}", e)))?
            .map_err(|e| IngestError::ValidationFailed(format!("{:#}", e)))?;

        self.catalog
            .delete_row_errors(&job.file_id)
            .await
            .map_err(IngestError::metadata)?;
        if !report.is_clean() {
            warn!(findings = report.findings.len(), "Upload has row errors");
            self.catalog
                .save_row_errors(&job.file_id, &report.findings)
                .await
                .map_err(IngestError::metadata)?;
        }

        self.set_status(&job.file_id, JobStatus::Validated).await?;
        info!(records = report.records, findings = report.findings.len(), "Validated upload");
        Ok(report)
    }

    #[tracing::instrument(name = "infer_schema", skip_all)]
    async fn infer(&self, job: &IngestionJob, path: &Path) -> Result<Vec<ColumnSchema>, IngestError> {
        let existing = self
            .catalog
            .load_columns(&job.dataset_id)
            .await
            .map_err(IngestError::metadata)?;

        let format = Arc::clone(&self.format);
        let owned = path.to_path_buf();
        let (columns, rows) = tokio::task::spawn_blocking(move || {
            let mut source = format
                .open(&owned)
                .map_err(|e| IngestError::ReadError(format!("{:#}", e)))?;
            infer_schema(source.as_mut(), existing)
        })
        .await
        .map_err(|e| IngestError::ReadError(format!("inference task failed: {}", e)))??;

        self.catalog
            .save_columns(&job.dataset_id, &columns)
            .await
            .map_err(IngestError::metadata)?;
        self.set_status(&job.file_id, JobStatus::SchemaInferred).await?;

        info!(columns = columns.len(), rows, "Inferred schema");
        Ok(columns)
    }

    /// Bind the dataset to a table, creating one on the least-loaded target if
    /// none exists yet.
    #[tracing::instrument(name = "materialize_table", skip_all)]
    async fn materialize_table(&self, job: &IngestionJob) -> Result<Placement, IngestError> {
        let dataset = self
            .catalog
            .get_dataset(&job.dataset_id)
            .await
            .map_err(IngestError::metadata)?
            .ok_or_else(|| IngestError::NotFound {
                kind: "dataset",
                id: job.dataset_id.clone(),
            })?;
        let candidates = self.list_candidates().await?;

        let existing = self
            .catalog
            .load_table(&job.dataset_id)
            .await
            .map_err(IngestError::metadata)?;
        let table = match existing {
            Some(table) => table,
            None => {
                let target = select_least_loaded(&candidates)?;
                let proposed = TableHandle {
                    table_uid: generate_table_id(),
                    storage_target_id: target.id.clone(),
                    created: false,
                };
                let table = self
                    .catalog
                    .create_table_if_absent(&job.dataset_id, &proposed)
                    .await
                    .map_err(IngestError::metadata)?;
                if table.created {
                    self.stamp_columns(&job.dataset_id, &table).await?;
                    info!(table = %table.table_name(), target = %table.storage_target_id, "Created table");
                }
                table
            }
        };

        let target = candidates
            .into_iter()
            .find(|t| t.id == table.storage_target_id)
            .ok_or_else(|| {
                IngestError::StorageError(format!(
                    "storage target '{}' of {} is not available",
                    table.storage_target_id,
                    table.table_name()
                ))
            })?;

        Ok(Placement {
            dataset,
            table,
            target,
        })
    }

    /// Bulk load the file. Returns `None` when the dataset has no columns and
    /// nothing was loaded.
    #[tracing::instrument(name = "load_data", skip_all)]
    async fn load_data(
        &self,
        job: &IngestionJob,
        path: &Path,
        placement: Placement,
    ) -> Result<Option<u64>, IngestError> {
        let Placement {
            dataset,
            table,
            target,
        } = placement;

        let columns = self
            .catalog
            .load_columns(&job.dataset_id)
            .await
            .map_err(IngestError::metadata)?;
        if columns.is_empty() {
            warn!(dataset_id = %job.dataset_id, "Dataset has no columns, skipping load");
            return Ok(None);
        }

        let request = BulkLoadRequest {
            table_uid: table.table_uid.clone(),
            schema: columns,
            append: job.mode.is_append(),
            create_table: !dataset.table_created,
            source: path.to_path_buf(),
        };
        debug!(
            append = request.append,
            create_table = request.create_table,
            target = %target.id,
            "Starting bulk load"
        );
        let rows = self
            .storage
            .bulk_load(&target, request)
            .await
            .map_err(IngestError::storage)?;

        if !dataset.table_created {
            self.catalog
                .mark_table_created(&job.dataset_id, &target.id)
                .await
                .map_err(IngestError::metadata)?;
        }

        info!(rows, table = %table.table_name(), "Loaded data");
        Ok(Some(rows))
    }

    async fn stamp_columns(&self, dataset_id: &str, table: &TableHandle) -> Result<(), IngestError> {
        let mut columns = self
            .catalog
            .load_columns(dataset_id)
            .await
            .map_err(IngestError::metadata)?;
        for column in &mut columns {
            column.parent_uid = Some(table.table_uid.clone());
        }
        self.catalog
            .save_columns(dataset_id, &columns)
            .await
            .map_err(IngestError::metadata)
    }

    async fn list_candidates(&self) -> Result<Vec<StorageTarget>, IngestError> {
        self.discovery
            .list_candidates()
            .await
            .map_err(|e| IngestError::StorageError(format!("storage discovery failed: {:#}", e)))
    }

    async fn resolve_target(&self, target_id: &str) -> Result<StorageTarget, IngestError> {
        self.list_candidates()
            .await?
            .into_iter()
            .find(|t| t.id == target_id)
            .ok_or_else(|| {
                IngestError::StorageError(format!("storage target '{}' is not available", target_id))
            })
    }

    async fn load_upload(&self, file_id: &str) -> Result<FileUpload, IngestError> {
        self.catalog
            .get_upload(file_id)
            .await
            .map_err(IngestError::metadata)?
            .ok_or_else(|| IngestError::NotFound {
                kind: "upload",
                id: file_id.to_string(),
            })
    }

    async fn set_status(&self, file_id: &str, status: JobStatus) -> Result<(), IngestError> {
        self.catalog
            .update_upload_status(file_id, status)
            .await
            .map_err(IngestError::metadata)?;
        debug!(status = %status, "Upload status changed");
        Ok(())
    }

    /// Record the error status of a failed stage and tell the user.
    async fn fail(
        &self,
        job: &IngestionJob,
        upload: &FileUpload,
        stage: Stage,
        status: JobStatus,
        error: IngestError,
    ) -> PipelineError {
        error!(stage = %stage, status = %status, error = %error, "Ingestion stage failed");
        if let Err(e) = self.catalog.update_upload_status(&job.file_id, status).await {
            warn!(status = %status, error = %e, "Failed to record error status");
        }
        self.send(
            &job.user_id,
            Notification::error(format!("{} of {} failed: {}", stage, upload.name, error)),
        )
        .await;
        PipelineError::new(stage, error)
    }

    async fn send(&self, user_id: &str, notification: Notification) {
        if let Err(e) = self.notifier.notify(user_id, &notification).await {
            warn!(user_id = %user_id, error = %e, "Failed to send notification");
        }
    }
}
