//! In-process catalog implementation.
//!
//! Keeps all metadata in memory. Used by the CLI when no catalog file is
//! configured and by tests, which can make individual operations fail and
//! inspect every status transition an upload went through.

use super::MetadataStore;
use crate::datasets::{ColumnSchema, Dataset, FileUpload, JobStatus, TableHandle};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct State {
    uploads: HashMap<String, FileUpload>,
    datasets: HashMap<String, Dataset>,
    columns: HashMap<String, Vec<ColumnSchema>>,
    tables: HashMap<String, TableHandle>,
    row_errors: HashMap<String, Vec<String>>,
    status_history: HashMap<String, Vec<JobStatus>>,
}

/// Catalog that can be configured to fail for testing error handling.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    state: Mutex<State>,
    fail_save_columns: AtomicBool,
    fail_row_errors: AtomicBool,
    fail_mark_table_created: AtomicBool,
    create_table_calls: AtomicUsize,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure whether `save_columns` should fail.
    pub fn set_fail_save_columns(&self, fail: bool) {
        self.fail_save_columns.store(fail, Ordering::SeqCst);
    }

    /// Configure whether row error writes should fail.
    pub fn set_fail_row_errors(&self, fail: bool) {
        self.fail_row_errors.store(fail, Ordering::SeqCst);
    }

    /// Configure whether `mark_table_created` should fail.
    pub fn set_fail_mark_table_created(&self, fail: bool) {
        self.fail_mark_table_created.store(fail, Ordering::SeqCst);
    }

    /// Every status an upload was set to, oldest first.
    pub fn status_history(&self, file_id: &str) -> Vec<JobStatus> {
        self.state()
            .map(|s| s.status_history.get(file_id).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    /// Number of `create_table_if_absent` calls, whether or not they created.
    pub fn create_table_calls(&self) -> usize {
        self.create_table_calls.load(Ordering::SeqCst)
    }

    /// Number of datasets with a bound table.
    pub fn table_count(&self) -> usize {
        self.state().map(|s| s.tables.len()).unwrap_or_default()
    }

    fn state(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("In-memory catalog lock poisoned"))
    }

    fn check(flag: &AtomicBool, operation: &str) -> Result<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(anyhow!("Simulated catalog failure in {}", operation));
        }
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for InMemoryCatalog {
    async fn run_migrations(&self) -> Result<()> {
        Ok(())
    }

    async fn create_upload(&self, upload: &FileUpload, dataset: &Dataset) -> Result<()> {
        let mut state = self.state()?;
        if state.uploads.contains_key(&upload.id) {
            return Err(anyhow!("Upload '{}' already exists", upload.id));
        }
        state
            .datasets
            .entry(dataset.id.clone())
            .or_insert_with(|| dataset.clone());
        state
            .status_history
            .insert(upload.id.clone(), vec![upload.status]);
        state.uploads.insert(upload.id.clone(), upload.clone());
        Ok(())
    }

    async fn get_upload(&self, file_id: &str) -> Result<Option<FileUpload>> {
        Ok(self.state()?.uploads.get(file_id).cloned())
    }

    async fn update_upload_status(&self, file_id: &str, status: JobStatus) -> Result<()> {
        let mut state = self.state()?;
        let upload = state
            .uploads
            .get_mut(file_id)
            .ok_or_else(|| anyhow!("Upload '{}' not found", file_id))?;
        upload.status = status;
        state
            .status_history
            .entry(file_id.to_string())
            .or_default()
            .push(status);
        Ok(())
    }

    async fn get_dataset(&self, dataset_id: &str) -> Result<Option<Dataset>> {
        Ok(self.state()?.datasets.get(dataset_id).cloned())
    }

    async fn mark_table_created(&self, dataset_id: &str, storage_target_id: &str) -> Result<()> {
        Self::check(&self.fail_mark_table_created, "mark_table_created")?;
        let mut state = self.state()?;
        let dataset = state
            .datasets
            .get_mut(dataset_id)
            .ok_or_else(|| anyhow!("Dataset '{}' not found", dataset_id))?;
        dataset.table_created = true;
        dataset.storage_target_id = Some(storage_target_id.to_string());
        Ok(())
    }

    async fn load_columns(&self, dataset_id: &str) -> Result<Vec<ColumnSchema>> {
        Ok(self
            .state()?
            .columns
            .get(dataset_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn save_columns(&self, dataset_id: &str, columns: &[ColumnSchema]) -> Result<()> {
        Self::check(&self.fail_save_columns, "save_columns")?;
        let mut state = self.state()?;
        let stored = state.columns.entry(dataset_id.to_string()).or_default();
        for (position, column) in columns.iter().enumerate() {
            stored.retain(|c| c.uid != column.uid);
            let at = position.min(stored.len());
            stored.insert(at, column.clone());
        }
        Ok(())
    }

    async fn load_table(&self, dataset_id: &str) -> Result<Option<TableHandle>> {
        Ok(self.state()?.tables.get(dataset_id).map(|t| TableHandle {
            created: false,
            ..t.clone()
        }))
    }

    async fn create_table_if_absent(
        &self,
        dataset_id: &str,
        handle: &TableHandle,
    ) -> Result<TableHandle> {
        self.create_table_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state()?;
        if let Some(existing) = state.tables.get(dataset_id) {
            return Ok(TableHandle {
                created: false,
                ..existing.clone()
            });
        }
        let stored = TableHandle {
            created: false,
            ..handle.clone()
        };
        state.tables.insert(dataset_id.to_string(), stored);
        Ok(TableHandle {
            created: true,
            ..handle.clone()
        })
    }

    async fn delete_row_errors(&self, file_id: &str) -> Result<u64> {
        Self::check(&self.fail_row_errors, "delete_row_errors")?;
        let removed = self.state()?.row_errors.remove(file_id);
        Ok(removed.map_or(0, |e| e.len() as u64))
    }

    async fn save_row_errors(&self, file_id: &str, errors: &[String]) -> Result<()> {
        Self::check(&self.fail_row_errors, "save_row_errors")?;
        self.state()?
            .row_errors
            .entry(file_id.to_string())
            .or_default()
            .extend_from_slice(errors);
        Ok(())
    }

    async fn list_row_errors(&self, file_id: &str) -> Result<Vec<String>> {
        Ok(self
            .state()?
            .row_errors
            .get(file_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn delete_dataset(&self, dataset_id: &str) -> Result<bool> {
        let mut state = self.state()?;
        let file_ids: Vec<String> = state
            .uploads
            .values()
            .filter(|u| u.dataset_id == dataset_id)
            .map(|u| u.id.clone())
            .collect();
        for file_id in &file_ids {
            state.uploads.remove(file_id);
            state.row_errors.remove(file_id);
        }
        state.columns.remove(dataset_id);
        state.tables.remove(dataset_id);
        Ok(state.datasets.remove(dataset_id).is_some())
    }
}
