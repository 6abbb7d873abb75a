use crate::datasets::{IngestError, StorageTarget};

/// Pick the target holding the fewest datasets.
///
/// Ties go to the earliest candidate, so the same list always yields the same
/// target.
pub fn select_least_loaded(candidates: &[StorageTarget]) -> Result<&StorageTarget, IngestError> {
    candidates
        .iter()
        .min_by_key(|t| t.dataset_count)
        .ok_or(IngestError::NoCandidates)
}
