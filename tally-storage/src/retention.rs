//! Retention: terminal runs past the configured age lose their store
//! rows, export directory, and cache entries together.

use std::path::Path;

use tally_core::errors::StorageError;
use tally_core::traits::IRuns;

use crate::engine::TallyStorageEngine;

/// Remove every expired run. `exports_dir` and `cache_dir` follow the
/// persisted state layout (`exports/run_<id>/`, `cache/run_<id>_*.json`).
/// Returns the purged run ids.
pub fn purge_expired(
    engine: &TallyStorageEngine,
    exports_dir: &Path,
    cache_dir: &Path,
    cutoff: i64,
) -> Result<Vec<i64>, StorageError> {
    let expired = engine.list_expired_runs(cutoff)?;
    for &run_id in &expired {
        remove_run_artifacts(exports_dir, cache_dir, run_id);
        engine.delete_run(run_id)?;
        tracing::info!(run_id, "retention purged run");
    }
    Ok(expired)
}

/// Best-effort artifact removal; store rows are still deleted when a
/// file is stubborn, and the next pass retries the leftovers.
pub fn remove_run_artifacts(exports_dir: &Path, cache_dir: &Path, run_id: i64) {
    let run_dir = exports_dir.join(format!("run_{run_id}"));
    if run_dir.exists() {
        if let Err(e) = std::fs::remove_dir_all(&run_dir) {
            tracing::warn!(run_id, error = %e, "failed to remove export dir");
        }
    }
    let prefix = format!("run_{run_id}_");
    if let Ok(entries) = std::fs::read_dir(cache_dir) {
        for entry in entries.flatten() {
            if entry
                .file_name()
                .to_string_lossy()
                .starts_with(&prefix)
            {
                let _ = std::fs::remove_file(entry.path());
            }
        }
    }
}
