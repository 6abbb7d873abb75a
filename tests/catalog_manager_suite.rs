use ingestdb::catalog::{InMemoryCatalog, MetadataStore, SqliteCatalogManager};
use ingestdb::datasets::{
    AggregationFn, ColumnSchema, DataType, Dataset, FileUpload, JobStatus, TableHandle,
};
use tempfile::TempDir;

struct CatalogTestContext<M, G = ()> {
    manager: M,
    _guard: G,
}

impl<M, G> CatalogTestContext<M, G> {
    fn new(manager: M, guard: G) -> Self {
        Self {
            manager,
            _guard: guard,
        }
    }
}

impl<M: MetadataStore, G> CatalogTestContext<M, G> {
    fn manager(&self) -> &M {
        &self.manager
    }
}

async fn create_sqlite_catalog() -> CatalogTestContext<SqliteCatalogManager, TempDir> {
    let dir = TempDir::new().expect("failed to create temp dir");
    let db_path = dir.path().join("catalog.sqlite");
    let manager = SqliteCatalogManager::new(db_path.to_str().unwrap())
        .await
        .unwrap();
    manager.run_migrations().await.unwrap();
    CatalogTestContext::new(manager, dir)
}

async fn create_memory_catalog() -> CatalogTestContext<InMemoryCatalog> {
    CatalogTestContext::new(InMemoryCatalog::new(), ())
}

fn upload(id: &str, dataset_id: &str) -> (FileUpload, Dataset) {
    (
        FileUpload {
            id: id.to_string(),
            dataset_id: dataset_id.to_string(),
            user_id: "user1".to_string(),
            name: "sales.csv".to_string(),
            location: "/uploads/sales.csv".to_string(),
            status: JobStatus::Uploaded,
        },
        Dataset {
            id: dataset_id.to_string(),
            user_id: "user1".to_string(),
            name: "sales".to_string(),
            table_created: false,
            storage_target_id: None,
        },
    )
}

fn handle(table_uid: &str, target: &str) -> TableHandle {
    TableHandle {
        table_uid: table_uid.to_string(),
        storage_target_id: target.to_string(),
        created: false,
    }
}

macro_rules! catalog_manager_tests {
    ($module:ident, $setup_fn:ident) => {
        mod $module {
            use super::*;

            #[tokio::test]
            async fn migrations_are_idempotent() {
                let ctx = super::$setup_fn().await;
                let catalog = ctx.manager();
                catalog.run_migrations().await.unwrap();
                assert!(catalog.get_upload("missing").await.unwrap().is_none());
            }

            #[tokio::test]
            async fn create_and_get_upload() {
                let ctx = super::$setup_fn().await;
                let catalog = ctx.manager();
                let (file, dataset) = upload("file1", "dset1");

                catalog.create_upload(&file, &dataset).await.unwrap();

                assert_eq!(catalog.get_upload("file1").await.unwrap(), Some(file));
                assert_eq!(catalog.get_dataset("dset1").await.unwrap(), Some(dataset));
            }

            #[tokio::test]
            async fn update_upload_status() {
                let ctx = super::$setup_fn().await;
                let catalog = ctx.manager();
                let (file, dataset) = upload("file1", "dset1");
                catalog.create_upload(&file, &dataset).await.unwrap();

                catalog
                    .update_upload_status("file1", JobStatus::SchemaInferred)
                    .await
                    .unwrap();

                let stored = catalog.get_upload("file1").await.unwrap().unwrap();
                assert_eq!(stored.status, JobStatus::SchemaInferred);
                assert!(catalog
                    .update_upload_status("missing", JobStatus::Completed)
                    .await
                    .is_err());
            }

            #[tokio::test]
            async fn save_columns_upserts_by_uid() {
                let ctx = super::$setup_fn().await;
                let catalog = ctx.manager();
                let (file, dataset) = upload("file1", "dset1");
                catalog.create_upload(&file, &dataset).await.unwrap();

                let mut columns = vec![ColumnSchema::seeded(0, "a"), ColumnSchema::seeded(1, "b")];
                catalog.save_columns("dset1", &columns).await.unwrap();

                columns[0].data_type = DataType::Int;
                columns[0].aggregation_fn = AggregationFn::Sum;
                columns[1].data_type = DataType::Date;
                columns[1].date_format = Some("1/2/2006".to_string());
                columns[1].parent_uid = Some("tabl1".to_string());
                catalog.save_columns("dset1", &columns).await.unwrap();

                let loaded = catalog.load_columns("dset1").await.unwrap();
                assert_eq!(loaded, columns);
                assert!(catalog.load_columns("dset2").await.unwrap().is_empty());
            }

            #[tokio::test]
            async fn create_table_if_absent_is_compare_and_swap() {
                let ctx = super::$setup_fn().await;
                let catalog = ctx.manager();
                let (file, dataset) = upload("file1", "dset1");
                catalog.create_upload(&file, &dataset).await.unwrap();

                assert!(catalog.load_table("dset1").await.unwrap().is_none());

                let first = catalog
                    .create_table_if_absent("dset1", &handle("tabl1", "ds1"))
                    .await
                    .unwrap();
                assert!(first.created);
                assert_eq!(first.table_uid, "tabl1");

                let second = catalog
                    .create_table_if_absent("dset1", &handle("tabl2", "ds2"))
                    .await
                    .unwrap();
                assert!(!second.created);
                assert_eq!(second.table_uid, "tabl1");
                assert_eq!(second.storage_target_id, "ds1");

                let loaded = catalog.load_table("dset1").await.unwrap().unwrap();
                assert_eq!(loaded, handle("tabl1", "ds1"));
            }

            #[tokio::test]
            async fn mark_table_created() {
                let ctx = super::$setup_fn().await;
                let catalog = ctx.manager();
                let (file, dataset) = upload("file1", "dset1");
                catalog.create_upload(&file, &dataset).await.unwrap();

                catalog.mark_table_created("dset1", "ds1").await.unwrap();

                let stored = catalog.get_dataset("dset1").await.unwrap().unwrap();
                assert!(stored.table_created);
                assert_eq!(stored.storage_target_id.as_deref(), Some("ds1"));
            }

            #[tokio::test]
            async fn row_errors_are_replaced() {
                let ctx = super::$setup_fn().await;
                let catalog = ctx.manager();
                let (file, dataset) = upload("file1", "dset1");
                catalog.create_upload(&file, &dataset).await.unwrap();

                let first = vec!["Record #1 has error".to_string(), "Record #4 has error".to_string()];
                catalog.save_row_errors("file1", &first).await.unwrap();
                assert_eq!(catalog.list_row_errors("file1").await.unwrap(), first);

                assert_eq!(catalog.delete_row_errors("file1").await.unwrap(), 2);
                catalog
                    .save_row_errors("file1", &["Record #9 has error".to_string()])
                    .await
                    .unwrap();
                assert_eq!(
                    catalog.list_row_errors("file1").await.unwrap(),
                    vec!["Record #9 has error".to_string()]
                );
            }

            #[tokio::test]
            async fn delete_dataset_cascades() {
                let ctx = super::$setup_fn().await;
                let catalog = ctx.manager();
                let (file, dataset) = upload("file1", "dset1");
                catalog.create_upload(&file, &dataset).await.unwrap();
                let (other_file, other_dataset) = upload("file2", "dset2");
                catalog.create_upload(&other_file, &other_dataset).await.unwrap();

                catalog
                    .save_columns("dset1", &[ColumnSchema::seeded(0, "a")])
                    .await
                    .unwrap();
                catalog
                    .create_table_if_absent("dset1", &handle("tabl1", "ds1"))
                    .await
                    .unwrap();
                catalog
                    .save_row_errors("file1", &["bad".to_string()])
                    .await
                    .unwrap();

                assert!(catalog.delete_dataset("dset1").await.unwrap());

                assert!(catalog.get_dataset("dset1").await.unwrap().is_none());
                assert!(catalog.get_upload("file1").await.unwrap().is_none());
                assert!(catalog.load_columns("dset1").await.unwrap().is_empty());
                assert!(catalog.load_table("dset1").await.unwrap().is_none());
                assert!(catalog.list_row_errors("file1").await.unwrap().is_empty());
                assert!(catalog.get_upload("file2").await.unwrap().is_some());

                assert!(!catalog.delete_dataset("dset1").await.unwrap());
            }
        }
    };
}

catalog_manager_tests!(sqlite, create_sqlite_catalog);
catalog_manager_tests!(memory, create_memory_catalog);
