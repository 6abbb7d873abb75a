use crate::datasets::StorageTarget;
use crate::pipeline::DEFAULT_QUEUE_CAPACITY;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    pub catalog: CatalogConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Number of jobs processed concurrently.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Jobs that may wait for a worker before `submit` is refused.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_workers() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CatalogConfig {
    /// `sqlite` or `memory`.
    #[serde(rename = "type")]
    pub catalog_type: String,
    /// Database file for the sqlite catalog.
    pub path: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(rename = "type", default = "default_storage_type")]
    pub storage_type: String,
    /// Root directory tables are written under.
    pub base_dir: String,
}

fn default_storage_type() -> String {
    "filesystem".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct DiscoveryConfig {
    /// Storage targets new tables may be placed on.
    #[serde(default)]
    pub targets: Vec<StorageTarget>,
}

impl AppConfig {
    /// Load configuration from file and environment variables
    pub fn load(config_path: &str) -> Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name(config_path))
            // Example: INGESTDB_PIPELINE__WORKERS=8
            .add_source(
                config::Environment::with_prefix("INGESTDB")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build().context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Parse configuration from TOML text, without environment overrides.
    pub fn from_toml(text: &str) -> Result<Self> {
        config::Config::builder()
            .add_source(config::File::from_str(text, config::FileFormat::Toml))
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.workers == 0 {
            anyhow::bail!("pipeline.workers must be at least 1");
        }
        if self.pipeline.queue_capacity == 0 {
            anyhow::bail!("pipeline.queue_capacity must be at least 1");
        }

        match self.catalog.catalog_type.as_str() {
            "sqlite" => {
                if self.catalog.path.is_none() {
                    anyhow::bail!("SQLite catalog requires 'path'");
                }
            }
            "memory" => {}
            _ => anyhow::bail!("Invalid catalog type: {}", self.catalog.catalog_type),
        }

        match self.storage.storage_type.as_str() {
            "filesystem" => {
                if self.storage.base_dir.is_empty() {
                    anyhow::bail!("Filesystem storage requires 'base_dir'");
                }
            }
            _ => anyhow::bail!("Invalid storage type: {}", self.storage.storage_type),
        }

        let mut seen = HashSet::new();
        for target in &self.discovery.targets {
            if target.id.is_empty() {
                anyhow::bail!("Storage target ids must not be empty");
            }
            if !seen.insert(target.id.as_str()) {
                anyhow::bail!("Duplicate storage target '{}'", target.id);
            }
        }

        Ok(())
    }
}
