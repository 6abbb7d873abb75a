use super::StorageDiscovery;
use crate::datasets::StorageTarget;
use anyhow::Result;
use async_trait::async_trait;

/// Discovery over a fixed target list, usually taken from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticDiscovery {
    targets: Vec<StorageTarget>,
}

impl StaticDiscovery {
    pub fn new(targets: Vec<StorageTarget>) -> Self {
        Self { targets }
    }
}

#[async_trait]
impl StorageDiscovery for StaticDiscovery {
    async fn list_candidates(&self) -> Result<Vec<StorageTarget>> {
        Ok(self.targets.clone())
    }
}
