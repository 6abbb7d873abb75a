use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Registry of per-dataset async locks.
///
/// Table materialization and loading for one dataset run under its lock, so
/// two runs for the same dataset never both observe "no table yet". Runs for
/// different datasets never contend.
#[derive(Debug, Default)]
pub struct DatasetLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl DatasetLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `dataset_id`. Released when the guard drops.
    pub async fn acquire(&self, dataset_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            // Entries only the registry still references are idle.
            locks.retain(|id, l| id == dataset_id || Arc::strong_count(l) > 1);
            Arc::clone(locks.entry(dataset_id.to_string()).or_default())
        };
        lock.lock_owned().await
    }

    /// Number of datasets currently tracked.
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_dataset_is_exclusive() {
        let locks = Arc::new(DatasetLocks::new());
        let guard = locks.acquire("dset1").await;

        let contender = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _guard = locks.acquire("dset1").await;
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!contender.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(5), contender)
            .await
            .expect("contender should acquire after release")
            .unwrap();
    }

    #[tokio::test]
    async fn different_datasets_do_not_contend() {
        let locks = DatasetLocks::new();
        let _a = locks.acquire("dset1").await;
        let acquired = tokio::time::timeout(Duration::from_secs(1), locks.acquire("dset2")).await;
        assert!(acquired.is_ok());
    }

    #[tokio::test]
    async fn idle_entries_are_pruned() {
        let locks = DatasetLocks::new();
        drop(locks.acquire("dset1").await);
        drop(locks.acquire("dset2").await);
        let _c = locks.acquire("dset3").await;
        assert_eq!(locks.len(), 1);
    }
}
