//! Background ingestion pipeline.

pub mod locks;
pub mod orchestrator;
pub mod worker;

pub use locks::DatasetLocks;
pub use orchestrator::PipelineOrchestrator;
pub use worker::{JobQueue, DEFAULT_QUEUE_CAPACITY};
