use crate::catalog::manager::MetadataStore;
use crate::catalog::migrations::{run_migrations, CatalogMigrations};
use crate::datasets::{ColumnSchema, Dataset, FileUpload, JobStatus, TableHandle};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use sqlx::{FromRow, SqlitePool};
use std::fmt::{self, Debug, Formatter};

pub struct SqliteCatalogManager {
    pool: SqlitePool,
    catalog_path: String,
}

impl Debug for SqliteCatalogManager {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteCatalogManager")
            .field("catalog_path", &self.catalog_path)
            .finish()
    }
}

struct SqliteMigrationBackend;

#[derive(FromRow)]
struct UploadRow {
    id: String,
    dataset_id: String,
    user_id: String,
    name: String,
    location: String,
    status: String,
}

impl TryFrom<UploadRow> for FileUpload {
    type Error = anyhow::Error;

    fn try_from(row: UploadRow) -> Result<Self> {
        Ok(Self {
            status: row.status.parse()?,
            id: row.id,
            dataset_id: row.dataset_id,
            user_id: row.user_id,
            name: row.name,
            location: row.location,
        })
    }
}

#[derive(FromRow)]
struct DatasetRow {
    id: String,
    user_id: String,
    name: String,
    table_created: bool,
    storage_target_id: Option<String>,
}

impl From<DatasetRow> for Dataset {
    fn from(row: DatasetRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            name: row.name,
            table_created: row.table_created,
            storage_target_id: row.storage_target_id,
        }
    }
}

#[derive(FromRow)]
struct ColumnRow {
    uid: String,
    name: String,
    raw_sample: String,
    data_type: String,
    date_format: Option<String>,
    aggregation_fn: String,
    parent_uid: Option<String>,
}

impl TryFrom<ColumnRow> for ColumnSchema {
    type Error = anyhow::Error;

    fn try_from(row: ColumnRow) -> Result<Self> {
        Ok(Self {
            data_type: row.data_type.parse()?,
            aggregation_fn: row.aggregation_fn.parse()?,
            uid: row.uid,
            name: row.name,
            raw_sample: row.raw_sample,
            date_format: row.date_format,
            parent_uid: row.parent_uid,
        })
    }
}

#[derive(FromRow)]
struct TableRow {
    table_uid: String,
    storage_target_id: String,
}

impl SqliteCatalogManager {
    pub async fn new(db_path: &str) -> Result<Self> {
        let uri = format!("sqlite:{}?mode=rwc", db_path);
        let pool = SqlitePool::connect(&uri)
            .await
            .with_context(|| format!("Failed to open catalog at '{}'", db_path))?;

        Ok(Self {
            pool,
            catalog_path: db_path.to_string(),
        })
    }

    async fn initialize_schema(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS datasets (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                name TEXT NOT NULL,
                table_created INTEGER NOT NULL DEFAULT 0,
                storage_target_id TEXT,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
        "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS uploads (
                id TEXT PRIMARY KEY,
                dataset_id TEXT NOT NULL REFERENCES datasets(id),
                user_id TEXT NOT NULL,
                name TEXT NOT NULL,
                location TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
        "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS columns (
                uid TEXT PRIMARY KEY,
                dataset_id TEXT NOT NULL REFERENCES datasets(id),
                position INTEGER NOT NULL,
                name TEXT NOT NULL,
                raw_sample TEXT NOT NULL,
                data_type TEXT NOT NULL,
                date_format TEXT,
                aggregation_fn TEXT NOT NULL,
                parent_uid TEXT
            )
        "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS table_handles (
                dataset_id TEXT PRIMARY KEY REFERENCES datasets(id),
                table_uid TEXT UNIQUE NOT NULL,
                storage_target_id TEXT NOT NULL,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
        "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS row_errors (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                file_id TEXT NOT NULL REFERENCES uploads(id),
                position INTEGER NOT NULL,
                message TEXT NOT NULL
            )
        "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    async fn add_lookup_indexes(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_columns_dataset ON columns (dataset_id, position)",
        )
        .execute(pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_row_errors_file ON row_errors (file_id)")
            .execute(pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_uploads_dataset ON uploads (dataset_id)")
            .execute(pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for SqliteCatalogManager {
    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }

    async fn run_migrations(&self) -> Result<()> {
        run_migrations::<SqliteMigrationBackend>(&self.pool).await
    }

    async fn create_upload(&self, upload: &FileUpload, dataset: &Dataset) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO datasets (id, user_id, name, table_created, storage_target_id)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(&dataset.id)
        .bind(&dataset.user_id)
        .bind(&dataset.name)
        .bind(dataset.table_created)
        .bind(&dataset.storage_target_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO uploads (id, dataset_id, user_id, name, location, status)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&upload.id)
        .bind(&upload.dataset_id)
        .bind(&upload.user_id)
        .bind(&upload.name)
        .bind(&upload.location)
        .bind(upload.status.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_upload(&self, file_id: &str) -> Result<Option<FileUpload>> {
        let row: Option<UploadRow> = sqlx::query_as(
            "SELECT id, dataset_id, user_id, name, location, status FROM uploads WHERE id = ?",
        )
        .bind(file_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(FileUpload::try_from).transpose()
    }

    async fn update_upload_status(&self, file_id: &str, status: JobStatus) -> Result<()> {
        let result = sqlx::query(
            "UPDATE uploads SET status = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(file_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            anyhow::bail!("Upload '{}' not found", file_id);
        }
        Ok(())
    }

    async fn get_dataset(&self, dataset_id: &str) -> Result<Option<Dataset>> {
        let row: Option<DatasetRow> = sqlx::query_as(
            "SELECT id, user_id, name, table_created, storage_target_id
             FROM datasets WHERE id = ?",
        )
        .bind(dataset_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Dataset::from))
    }

    async fn mark_table_created(&self, dataset_id: &str, storage_target_id: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE datasets SET table_created = 1, storage_target_id = ? WHERE id = ?",
        )
        .bind(storage_target_id)
        .bind(dataset_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            anyhow::bail!("Dataset '{}' not found", dataset_id);
        }
        Ok(())
    }

    async fn load_columns(&self, dataset_id: &str) -> Result<Vec<ColumnSchema>> {
        let rows: Vec<ColumnRow> = sqlx::query_as(
            "SELECT uid, name, raw_sample, data_type, date_format, aggregation_fn, parent_uid
             FROM columns WHERE dataset_id = ? ORDER BY position",
        )
        .bind(dataset_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ColumnSchema::try_from).collect()
    }

    async fn save_columns(&self, dataset_id: &str, columns: &[ColumnSchema]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for (position, column) in columns.iter().enumerate() {
            sqlx::query(
                "INSERT INTO columns
                    (uid, dataset_id, position, name, raw_sample, data_type, date_format,
                     aggregation_fn, parent_uid)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT (uid) DO UPDATE SET
                    position = excluded.position,
                    name = excluded.name,
                    raw_sample = excluded.raw_sample,
                    data_type = excluded.data_type,
                    date_format = excluded.date_format,
                    aggregation_fn = excluded.aggregation_fn,
                    parent_uid = excluded.parent_uid",
            )
            .bind(&column.uid)
            .bind(dataset_id)
            .bind(position as i64)
            .bind(&column.name)
            .bind(&column.raw_sample)
            .bind(column.data_type.as_str())
            .bind(&column.date_format)
            .bind(column.aggregation_fn.as_str())
            .bind(&column.parent_uid)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn load_table(&self, dataset_id: &str) -> Result<Option<TableHandle>> {
        let row: Option<TableRow> = sqlx::query_as(
            "SELECT table_uid, storage_target_id FROM table_handles WHERE dataset_id = ?",
        )
        .bind(dataset_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| TableHandle {
            table_uid: r.table_uid,
            storage_target_id: r.storage_target_id,
            created: false,
        }))
    }

    async fn create_table_if_absent(
        &self,
        dataset_id: &str,
        handle: &TableHandle,
    ) -> Result<TableHandle> {
        let inserted = sqlx::query(
            "INSERT INTO table_handles (dataset_id, table_uid, storage_target_id)
             VALUES (?, ?, ?)
             ON CONFLICT (dataset_id) DO NOTHING",
        )
        .bind(dataset_id)
        .bind(&handle.table_uid)
        .bind(&handle.storage_target_id)
        .execute(&self.pool)
        .await?
        .rows_affected()
            == 1;

        let mut current = self
            .load_table(dataset_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Table handle of '{}' vanished", dataset_id))?;
        current.created = inserted;
        Ok(current)
    }

    async fn delete_row_errors(&self, file_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM row_errors WHERE file_id = ?")
            .bind(file_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn save_row_errors(&self, file_id: &str, errors: &[String]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for (position, message) in errors.iter().enumerate() {
            sqlx::query("INSERT INTO row_errors (file_id, position, message) VALUES (?, ?, ?)")
                .bind(file_id)
                .bind(position as i64)
                .bind(message)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn list_row_errors(&self, file_id: &str) -> Result<Vec<String>> {
        sqlx::query_scalar("SELECT message FROM row_errors WHERE file_id = ? ORDER BY position")
            .bind(file_id)
            .fetch_all(&self.pool)
            .await
            .map_err(Into::into)
    }

    async fn delete_dataset(&self, dataset_id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM row_errors
             WHERE file_id IN (SELECT id FROM uploads WHERE dataset_id = ?)",
        )
        .bind(dataset_id)
        .execute(&mut *tx)
        .await?;
        for statement in [
            "DELETE FROM columns WHERE dataset_id = ?",
            "DELETE FROM table_handles WHERE dataset_id = ?",
            "DELETE FROM uploads WHERE dataset_id = ?",
        ] {
            sqlx::query(statement)
                .bind(dataset_id)
                .execute(&mut *tx)
                .await?;
        }
        let deleted = sqlx::query("DELETE FROM datasets WHERE id = ?")
            .bind(dataset_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        Ok(deleted > 0)
    }
}

impl CatalogMigrations for SqliteMigrationBackend {
    type Pool = SqlitePool;

    fn ensure_migrations_table(pool: &Self::Pool) -> BoxFuture<'_, Result<()>> {
        async move {
            sqlx::query(
                r#"
                CREATE TABLE IF NOT EXISTS schema_migrations (
                    version INTEGER PRIMARY KEY,
                    applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
                )
                "#,
            )
            .execute(pool)
            .await?;
            Ok(())
        }
        .boxed()
    }

    fn current_version(pool: &Self::Pool) -> BoxFuture<'_, Result<i64>> {
        async move {
            sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM schema_migrations")
                .fetch_one(pool)
                .await
                .map_err(Into::into)
        }
        .boxed()
    }

    fn record_version(pool: &Self::Pool, version: i64) -> BoxFuture<'_, Result<()>> {
        async move {
            sqlx::query("INSERT INTO schema_migrations (version) VALUES (?)")
                .bind(version)
                .execute(pool)
                .await?;
            Ok(())
        }
        .boxed()
    }

    fn migrate_v1(pool: &Self::Pool) -> BoxFuture<'_, Result<()>> {
        SqliteCatalogManager::initialize_schema(pool).boxed()
    }

    fn migrate_v2(pool: &Self::Pool) -> BoxFuture<'_, Result<()>> {
        SqliteCatalogManager::add_lookup_indexes(pool).boxed()
    }
}
