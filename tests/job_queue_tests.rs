use ingestdb::catalog::{InMemoryCatalog, MetadataStore};
use ingestdb::datasets::{IngestError, IngestMode, IngestionJob, JobStatus, StorageTarget};
use ingestdb::notifications::LogNotifier;
use ingestdb::source::CsvFormat;
use ingestdb::storage::{BulkLoadRequest, FilesystemStorage, StaticDiscovery, StorageClient};
use ingestdb::{JobQueue, PipelineOrchestrator};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tempfile::TempDir;

/// Filesystem storage that panics when asked to load a file named `panic.csv`.
#[derive(Debug)]
struct PanickingStorage {
    inner: FilesystemStorage,
}

#[async_trait]
impl StorageClient for PanickingStorage {
    async fn bulk_load(&self, target: &StorageTarget, request: BulkLoadRequest) -> Result<u64> {
        if request.source.ends_with("panic.csv") {
            panic!("storage driver crashed");
        }
        self.inner.bulk_load(target, request).await
    }

    async fn delete_table(&self, target: &StorageTarget, table_uid: &str) -> Result<()> {
        self.inner.delete_table(target, table_uid).await
    }
}

fn orchestrator(catalog: Arc<InMemoryCatalog>, dir: &TempDir) -> Arc<PipelineOrchestrator> {
    Arc::new(PipelineOrchestrator::new(
        catalog,
        Arc::new(CsvFormat::new()),
        Arc::new(StaticDiscovery::new(vec![StorageTarget {
            id: "ds1".to_string(),
            dataset_count: 0,
            connection_info: String::new(),
        }])),
        Arc::new(PanickingStorage {
            inner: FilesystemStorage::new(dir.path().join("tables")),
        }),
        Arc::new(LogNotifier),
    ))
}

#[tokio::test]
async fn submitted_jobs_complete_in_background() {
    let dir = TempDir::new().unwrap();
    let catalog = Arc::new(InMemoryCatalog::new());
    let orchestrator = orchestrator(catalog.clone(), &dir);

    let mut uploads = vec![];
    for i in 0..5 {
        let path = dir.path().join(format!("upload{}.csv", i));
        std::fs::write(&path, format!("id,amount\n{},{}.5\n", i, i)).unwrap();
        let upload = orchestrator
            .register_upload("user1", &format!("upload{}.csv", i), path.to_str().unwrap(), None)
            .await
            .unwrap();
        uploads.push(upload);
    }

    let queue = JobQueue::start(orchestrator.clone(), 2, 16);
    let mut ids = HashSet::new();
    for upload in &uploads {
        let id = queue
            .submit(IngestionJob {
                file_id: upload.id.clone(),
                dataset_id: upload.dataset_id.clone(),
                user_id: upload.user_id.clone(),
                mode: IngestMode::Create,
            })
            .unwrap();
        assert!(id.starts_with("ijob"));
        ids.insert(id);
    }
    assert_eq!(ids.len(), uploads.len());

    tokio::time::timeout(std::time::Duration::from_secs(10), queue.shutdown())
        .await
        .expect("queue should drain within 10 seconds");

    for upload in &uploads {
        let stored = catalog.get_upload(&upload.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
    }
}

#[tokio::test]
async fn failed_jobs_do_not_stop_workers() {
    let dir = TempDir::new().unwrap();
    let catalog = Arc::new(InMemoryCatalog::new());
    let orchestrator = orchestrator(catalog.clone(), &dir);

    let bad = orchestrator
        .register_upload("user1", "gone.csv", "/nonexistent/gone.csv", None)
        .await
        .unwrap();
    let path = dir.path().join("good.csv");
    std::fs::write(&path, "a\n1\n").unwrap();
    let good = orchestrator
        .register_upload("user1", "good.csv", path.to_str().unwrap(), None)
        .await
        .unwrap();

    let queue = JobQueue::start(orchestrator.clone(), 1, 4);
    for upload in [&bad, &good] {
        queue
            .submit(IngestionJob {
                file_id: upload.id.clone(),
                dataset_id: upload.dataset_id.clone(),
                user_id: upload.user_id.clone(),
                mode: IngestMode::Create,
            })
            .unwrap();
    }
    queue.shutdown().await;

    assert_eq!(
        catalog.get_upload(&bad.id).await.unwrap().unwrap().status,
        JobStatus::ValidationError
    );
    assert_eq!(
        catalog.get_upload(&good.id).await.unwrap().unwrap().status,
        JobStatus::Completed
    );
}

#[tokio::test]
async fn panicking_job_does_not_stop_worker() {
    let dir = TempDir::new().unwrap();
    let catalog = Arc::new(InMemoryCatalog::new());
    let orchestrator = orchestrator(catalog.clone(), &dir);

    let mut uploads = vec![];
    for name in ["panic.csv", "after.csv"] {
        let path = dir.path().join(name);
        std::fs::write(&path, "a\n1\n").unwrap();
        uploads.push(
            orchestrator
                .register_upload("user1", name, path.to_str().unwrap(), None)
                .await
                .unwrap(),
        );
    }

    let queue = JobQueue::start(orchestrator.clone(), 1, 4);
    for upload in &uploads {
        queue
            .submit(IngestionJob {
                file_id: upload.id.clone(),
                dataset_id: upload.dataset_id.clone(),
                user_id: upload.user_id.clone(),
                mode: IngestMode::Create,
            })
            .unwrap();
    }
    tokio::time::timeout(std::time::Duration::from_secs(10), queue.shutdown())
        .await
        .expect("queue should drain within 10 seconds");

    // The crashed job never reached a terminal status.
    assert_eq!(
        catalog.get_upload(&uploads[0].id).await.unwrap().unwrap().status,
        JobStatus::Uploading
    );
    assert_eq!(
        catalog.get_upload(&uploads[1].id).await.unwrap().unwrap().status,
        JobStatus::Completed
    );
}

#[tokio::test]
async fn queue_errors_map_to_ingest_errors() {
    // Only the error taxonomy is checked here; filling a live queue is racy.
    assert_eq!(IngestError::QueueFull.to_string(), "job queue is full");
    assert_eq!(IngestError::QueueClosed.to_string(), "job queue is closed");
}
