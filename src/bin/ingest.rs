use anyhow::{Context, Result};
use clap::Parser;
use ingestdb::config::AppConfig;
use ingestdb::datasets::{IngestMode, IngestionJob};
use ingestdb::notifications::LogNotifier;
use ingestdb::{JobQueue, PipelineOrchestrator};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

#[derive(Parser)]
#[command(name = "ingest", about = "Ingest a CSV file into a dataset")]
struct Cli {
    /// Path to config file
    config: String,

    /// CSV file to ingest
    file: PathBuf,

    /// Owner of the upload
    #[arg(long)]
    user: String,

    /// Existing dataset to load into; a new dataset is created when omitted
    #[arg(long)]
    dataset: Option<String>,

    /// Append rows to the dataset's table instead of re-inferring and replacing
    #[arg(long, requires = "dataset")]
    append: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let now = Instant::now();
    ingestdb::telemetry::init_telemetry()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;

    let cli = Cli::parse();

    let config = AppConfig::load(&cli.config)?;
    config.validate()?;
    tracing::info!("Configuration '{}' loaded successfully", &cli.config);

    let orchestrator =
        Arc::new(PipelineOrchestrator::from_config(&config, Arc::new(LogNotifier)).await?);

    let location = cli
        .file
        .canonicalize()
        .with_context(|| format!("Cannot read '{}'", cli.file.display()))?;
    let name = location
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .context("Upload path has no file name")?;

    let upload = orchestrator
        .register_upload(
            &cli.user,
            &name,
            &location.to_string_lossy(),
            cli.dataset.as_deref(),
        )
        .await?;

    let job = IngestionJob {
        file_id: upload.id.clone(),
        dataset_id: upload.dataset_id.clone(),
        user_id: cli.user.clone(),
        mode: if cli.append {
            IngestMode::Append
        } else {
            IngestMode::Create
        },
    };

    let queue = JobQueue::start(
        Arc::clone(&orchestrator),
        config.pipeline.workers,
        config.pipeline.queue_capacity,
    );
    let job_id = queue.submit(job)?;
    tracing::info!(job_id = %job_id, file_id = %upload.id, "Submitted ingestion job");

    tokio::select! {
        _ = queue.shutdown() => {},
        _ = interrupted() => {
            tracing::warn!("Interrupted, upload status may be incomplete");
            return Ok(());
        }
    }

    let catalog = orchestrator.catalog();
    let finished = catalog
        .get_upload(&upload.id)
        .await?
        .context("Upload record disappeared")?;
    let row_errors = catalog.list_row_errors(&upload.id).await?;
    for error in &row_errors {
        tracing::warn!("{}", error);
    }
    catalog.close().await?;

    tracing::info!(
        dataset_id = %upload.dataset_id,
        status = %finished.status,
        row_errors = row_errors.len(),
        "Finished in {}ms",
        now.elapsed().as_millis()
    );

    if finished.status.is_error() {
        anyhow::bail!("Ingestion of '{}' ended with {}", name, finished.status);
    }
    Ok(())
}

async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}
