// src/storage/filesystem.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::fs::{self, File};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use super::{BulkLoadRequest, StorageClient};
use crate::datasets::StorageTarget;
use tracing::warn;

/// Lands tables as plain files under `<base>/<target>/table_<uid>/`.
///
/// Each table directory holds `schema.json` (the column schema of the last
/// load) and `data.csv` (data rows, no header).
#[derive(Debug)]
pub struct FilesystemStorage {
    base_dir: PathBuf,
}

impl FilesystemStorage {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn table_dir(&self, target_id: &str, table_uid: &str) -> PathBuf {
        self.base_dir
            .join(target_id)
            .join(format!("table_{}", table_uid))
    }
}

#[async_trait]
impl StorageClient for FilesystemStorage {
    async fn bulk_load(&self, target: &StorageTarget, request: BulkLoadRequest) -> Result<u64> {
        let dir = self.table_dir(&target.id, &request.table_uid);
        tokio::task::spawn_blocking(move || write_table(&dir, &request))
            .await
            .context("bulk load task panicked")?
    }

    async fn delete_table(&self, target: &StorageTarget, table_uid: &str) -> Result<()> {
        let dir = self.table_dir(&target.id, table_uid);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to delete '{}'", dir.display())),
        }
    }
}

const DATA_FILE: &str = "data.csv";
const SCHEMA_FILE: &str = "schema.json";
const STAGING_FILE: &str = "data.csv.staging";

/// Stage the new table contents next to `data.csv` and swap them in only once
/// every source record has been checked. A failed load leaves the table as
/// it was.
fn write_table(dir: &Path, request: &BulkLoadRequest) -> Result<u64> {
    if request.create_table {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create table directory '{}'", dir.display()))?;
    } else if !dir.is_dir() {
        anyhow::bail!("table_{} does not exist", request.table_uid);
    }

    let data_path = dir.join(DATA_FILE);
    let staging_path = dir.join(STAGING_FILE);
    let rows = match stage_rows(&data_path, &staging_path, request) {
        Ok(rows) => rows,
        Err(e) => {
            if let Err(cleanup) = fs::remove_file(&staging_path) {
                if cleanup.kind() != ErrorKind::NotFound {
                    warn!(path = %staging_path.display(), error = %cleanup, "Failed to remove staged rows");
                }
            }
            return Err(e);
        }
    };

    fs::rename(&staging_path, &data_path)
        .with_context(|| format!("Failed to replace '{}'", data_path.display()))?;

    let schema = serde_json::to_vec_pretty(&request.schema)?;
    fs::write(dir.join(SCHEMA_FILE), schema)?;

    Ok(rows)
}

/// Write the resulting table contents to `staging_path`: the current rows
/// first when appending, then every source record. Returns the number of
/// source records written.
fn stage_rows(data_path: &Path, staging_path: &Path, request: &BulkLoadRequest) -> Result<u64> {
    let mut staging = File::create(staging_path)
        .with_context(|| format!("Failed to create '{}'", staging_path.display()))?;
    if request.append {
        match File::open(data_path) {
            Ok(mut current) => {
                io::copy(&mut current, &mut staging)
                    .with_context(|| format!("Failed to copy '{}'", data_path.display()))?;
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to open '{}'", data_path.display()))
            }
        }
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(&request.source)
        .with_context(|| format!("Failed to open '{}'", request.source.display()))?;
    let mut writer = csv::Writer::from_writer(staging);

    let mut rows = 0u64;
    for record in reader.records() {
        let record = record?;
        rows += 1;
        if record.len() != request.schema.len() {
            anyhow::bail!(
                "record {} has {} fields, table_{} has {} columns",
                rows,
                record.len(),
                request.table_uid,
                request.schema.len()
            );
        }
        writer.write_record(&record)?;
    }

    let staging = writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("Failed to flush staged rows: {}", e.error()))?;
    staging.sync_all()?;

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasets::ColumnSchema;
    use tempfile::TempDir;

    fn target() -> StorageTarget {
        StorageTarget {
            id: "ds1".to_string(),
            dataset_count: 0,
            connection_info: String::new(),
        }
    }

    fn request(source: &Path, append: bool, create_table: bool) -> BulkLoadRequest {
        BulkLoadRequest {
            table_uid: "tablx".to_string(),
            schema: vec![ColumnSchema::seeded(0, "a"), ColumnSchema::seeded(1, "b")],
            append,
            create_table,
            source: source.to_path_buf(),
        }
    }

    fn upload(dir: &TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("upload.csv");
        fs::write(&path, contents).unwrap();
        path
    }

    #[tokio::test]
    async fn test_create_append_replace() {
        let tmp = TempDir::new().unwrap();
        let storage = FilesystemStorage::new(tmp.path().join("data"));
        let source = upload(&tmp, "a,b\n1,2\n3,4\n");
        let data = storage.table_dir("ds1", "tablx").join("data.csv");

        let rows = storage
            .bulk_load(&target(), request(&source, false, true))
            .await
            .unwrap();
        assert_eq!(rows, 2);
        assert_eq!(fs::read_to_string(&data).unwrap(), "1,2\n3,4\n");
        assert!(storage.table_dir("ds1", "tablx").join("schema.json").exists());

        storage
            .bulk_load(&target(), request(&source, true, false))
            .await
            .unwrap();
        assert_eq!(fs::read_to_string(&data).unwrap(), "1,2\n3,4\n1,2\n3,4\n");

        let replacement = upload(&tmp, "a,b\n9,9\n");
        storage
            .bulk_load(&target(), request(&replacement, false, false))
            .await
            .unwrap();
        assert_eq!(fs::read_to_string(&data).unwrap(), "9,9\n");
    }

    #[tokio::test]
    async fn test_load_into_missing_table_fails() {
        let tmp = TempDir::new().unwrap();
        let storage = FilesystemStorage::new(tmp.path());
        let source = upload(&tmp, "a,b\n1,2\n");

        let result = storage
            .bulk_load(&target(), request(&source, true, false))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_ragged_row_fails_load() {
        let tmp = TempDir::new().unwrap();
        let storage = FilesystemStorage::new(tmp.path());
        let source = upload(&tmp, "a,b\n1,2\n3\n");

        let err = storage
            .bulk_load(&target(), request(&source, false, true))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("record 2 has 1 fields"));
    }

    #[tokio::test]
    async fn test_failed_load_leaves_table_unchanged() {
        let tmp = TempDir::new().unwrap();
        let storage = FilesystemStorage::new(tmp.path().join("data"));
        let dir = storage.table_dir("ds1", "tablx");
        let source = upload(&tmp, "a,b\n1,2\n");
        storage
            .bulk_load(&target(), request(&source, false, true))
            .await
            .unwrap();
        let schema_before = fs::read(dir.join("schema.json")).unwrap();

        let ragged = upload(&tmp, "a,b\n3,4\n5,6\n7\n");
        for append in [true, false] {
            let err = storage
                .bulk_load(&target(), request(&ragged, append, false))
                .await
                .unwrap_err();
            assert!(err.to_string().contains("record 3 has 1 fields"));
            assert_eq!(fs::read_to_string(dir.join("data.csv")).unwrap(), "1,2\n");
            assert!(!dir.join("data.csv.staging").exists());
        }
        assert_eq!(fs::read(dir.join("schema.json")).unwrap(), schema_before);

        // The corrected file loads once.
        let fixed = upload(&tmp, "a,b\n3,4\n");
        storage
            .bulk_load(&target(), request(&fixed, true, false))
            .await
            .unwrap();
        assert_eq!(fs::read_to_string(dir.join("data.csv")).unwrap(), "1,2\n3,4\n");
    }

    #[tokio::test]
    async fn test_delete_table() {
        let tmp = TempDir::new().unwrap();
        let storage = FilesystemStorage::new(tmp.path());
        let source = upload(&tmp, "a,b\n1,2\n");
        storage
            .bulk_load(&target(), request(&source, false, true))
            .await
            .unwrap();

        storage.delete_table(&target(), "tablx").await.unwrap();
        assert!(!storage.table_dir("ds1", "tablx").exists());
        // Already gone.
        storage.delete_table(&target(), "tablx").await.unwrap();
    }
}
