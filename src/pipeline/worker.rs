use crate::datasets::{IngestError, IngestionJob};
use crate::pipeline::PipelineOrchestrator;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn, Instrument};

/// Default number of jobs that may wait for a worker.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

struct QueuedJob {
    id: String,
    job: IngestionJob,
}

/// Bounded queue of ingestion jobs drained by a fixed pool of worker tasks.
///
/// `submit` returns as soon as the job is queued; outcomes are logged and
/// mirrored into the upload status by the orchestrator.
pub struct JobQueue {
    sender: mpsc::Sender<QueuedJob>,
    workers: Vec<JoinHandle<()>>,
}

impl JobQueue {
    /// Spawn `workers` tasks (at least one) sharing a queue of `capacity` jobs.
    pub fn start(orchestrator: Arc<PipelineOrchestrator>, workers: usize, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..workers.max(1))
            .map(|worker| {
                let orchestrator = Arc::clone(&orchestrator);
                let receiver = Arc::clone(&receiver);
                tokio::spawn(run_worker(worker, orchestrator, receiver))
            })
            .collect();

        Self { sender, workers }
    }

    /// Queue a job and return its id.
    pub fn submit(&self, job: IngestionJob) -> Result<String, IngestError> {
        let id = crate::id::generate_job_id();
        self.sender
            .try_send(QueuedJob {
                id: id.clone(),
                job,
            })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => IngestError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => IngestError::QueueClosed,
            })?;
        info!(job_id = %id, "Queued ingestion job");
        Ok(id)
    }

    /// Stop accepting jobs, let the workers drain the queue, and wait for them.
    pub async fn shutdown(self) {
        drop(self.sender);
        for handle in self.workers {
            if let Err(e) = handle.await {
                warn!(error = %e, "Ingestion worker panicked");
            }
        }
    }
}

async fn run_worker(
    worker: usize,
    orchestrator: Arc<PipelineOrchestrator>,
    receiver: Arc<Mutex<mpsc::Receiver<QueuedJob>>>,
) {
    loop {
        let next = receiver.lock().await.recv().await;
        let Some(QueuedJob { id, job }) = next else {
            break;
        };

        let span = tracing::info_span!("ingest_job", ingestdb.job_id = %id, worker);
        // Each job runs in its own task so a panic ends the job, not the worker.
        let orchestrator = Arc::clone(&orchestrator);
        let handle = tokio::spawn(
            async move {
                match orchestrator.run(&job).await {
                    Ok(status) => info!(status = %status, "Ingestion job finished"),
                    Err(e) if e.source.is_client_error() => {
                        warn!(stage = %e.stage, error = %e.source, "Ingestion job rejected")
                    }
                    Err(e) => error!(stage = %e.stage, error = %e.source, "Ingestion job failed"),
                }
            }
            .instrument(span),
        );
        if let Err(e) = handle.await {
            error!(job_id = %id, worker, error = %e, "Ingestion job panicked");
        }
    }
}
