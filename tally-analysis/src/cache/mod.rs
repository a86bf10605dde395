//! The comparison cache: one small JSON artifact per reconciled
//! (run, combination), holding final counts and bounded key samples.
//!
//! Reads are O(1) for the summary and O(S) for samples, so the gateway
//! answers without touching source files. Export chunks stay
//! authoritative: an entry can always be rebuilt from them.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use moka::sync::Cache;
use tally_core::errors::CacheError;
use tally_core::types::results::{
    CacheEntry, ComparisonSummary, ExportCategory, ExportChunkMeta,
};
use tally_core::Combination;

use crate::export::read_category_page;

const HOT_CAPACITY: u64 = 256;

pub struct ComparisonCache {
    dir: PathBuf,
    hot: Cache<String, Arc<CacheEntry>>,
}

impl ComparisonCache {
    pub fn new(dir: PathBuf) -> Result<Self, CacheError> {
        fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        Ok(Self {
            dir,
            hot: Cache::new(HOT_CAPACITY),
        })
    }

    pub fn entry_path(&self, run_id: i64, combination_hash: &str) -> PathBuf {
        self.dir.join(format!("run_{run_id}_{combination_hash}.json"))
    }

    /// Write the entry atomically (temp file + rename) and refresh the
    /// hot layer.
    pub fn store(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        let hash = entry.summary.combination.stable_hash();
        let path = self.entry_path(entry.summary.run_id, &hash);
        let tmp = path.with_extension("json.tmp");

        let payload = serde_json::to_vec_pretty(entry).map_err(|e| CacheError::Corrupt {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        fs::write(&tmp, payload).map_err(|e| io_err(&tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;

        self.hot
            .insert(cache_key(entry.summary.run_id, &hash), Arc::new(entry.clone()));
        Ok(())
    }

    pub fn load(
        &self,
        run_id: i64,
        combination: &Combination,
    ) -> Result<Option<Arc<CacheEntry>>, CacheError> {
        self.load_by_hash(run_id, &combination.stable_hash())
    }

    pub fn load_by_hash(
        &self,
        run_id: i64,
        combination_hash: &str,
    ) -> Result<Option<Arc<CacheEntry>>, CacheError> {
        let key = cache_key(run_id, combination_hash);
        if let Some(entry) = self.hot.get(&key) {
            return Ok(Some(entry));
        }
        let path = self.entry_path(run_id, combination_hash);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path).map_err(|e| io_err(&path, e))?;
        let entry: CacheEntry =
            serde_json::from_slice(&bytes).map_err(|e| CacheError::Corrupt {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        let entry = Arc::new(entry);
        self.hot.insert(key, Arc::clone(&entry));
        Ok(Some(entry))
    }

    /// All cached entries for a run, by directory scan. Corrupt files
    /// are skipped with a warning — the chunks can rebuild them.
    pub fn list_run(&self, run_id: i64) -> Result<Vec<Arc<CacheEntry>>, CacheError> {
        let prefix = format!("run_{run_id}_");
        let mut entries = Vec::new();
        for dirent in fs::read_dir(&self.dir).map_err(|e| io_err(&self.dir, e))? {
            let dirent = dirent.map_err(|e| io_err(&self.dir, e))?;
            let name = dirent.file_name().to_string_lossy().into_owned();
            let Some(hash) = name
                .strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(".json"))
            else {
                continue;
            };
            match self.load_by_hash(run_id, hash) {
                Ok(Some(entry)) => entries.push(entry),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(file = %name, error = %e, "skipping corrupt cache entry");
                }
            }
        }
        entries.sort_by(|a, b| {
            a.summary
                .combination
                .sorted_columns()
                .cmp(&b.summary.combination.sorted_columns())
        });
        Ok(entries)
    }

    /// Rebuild an entry from the store summary plus completed chunks,
    /// and persist it.
    pub fn rebuild(
        &self,
        summary: ComparisonSummary,
        chunks_by_category: &dyn Fn(ExportCategory) -> Vec<ExportChunkMeta>,
        sample_limit: usize,
    ) -> Result<Arc<CacheEntry>, CacheError> {
        let key_len = summary.combination.len();
        let mut sample = |category: ExportCategory| -> Result<Vec<String>, CacheError> {
            let chunks = chunks_by_category(category);
            let rows = read_category_page(&chunks, 0, sample_limit).map_err(|e| {
                CacheError::Io {
                    path: String::new(),
                    message: e.to_string(),
                }
            })?;
            Ok(rows
                .into_iter()
                .map(|row| row.into_iter().take(key_len).collect::<Vec<_>>().join(", "))
                .collect())
        };

        let entry = CacheEntry {
            sample_matched: sample(ExportCategory::Matched)?,
            sample_only_a: sample(ExportCategory::OnlyA)?,
            sample_only_b: sample(ExportCategory::OnlyB)?,
            summary,
        };
        self.store(&entry)?;
        Ok(Arc::new(entry))
    }

    /// Remove every entry belonging to a run.
    pub fn remove_run(&self, run_id: i64) -> Result<(), CacheError> {
        let prefix = format!("run_{run_id}_");
        for dirent in fs::read_dir(&self.dir).map_err(|e| io_err(&self.dir, e))? {
            let dirent = dirent.map_err(|e| io_err(&self.dir, e))?;
            let name = dirent.file_name().to_string_lossy().into_owned();
            if name.starts_with(&prefix) {
                let _ = fs::remove_file(dirent.path());
            }
        }
        self.hot.invalidate_all();
        Ok(())
    }

    /// Remove entries whose file is older than the retention cutoff.
    /// Returns how many were removed.
    pub fn cleanup_older_than(&self, cutoff_ms: i64) -> Result<usize, CacheError> {
        let mut removed = 0usize;
        for dirent in fs::read_dir(&self.dir).map_err(|e| io_err(&self.dir, e))? {
            let dirent = dirent.map_err(|e| io_err(&self.dir, e))?;
            let Ok(meta) = dirent.metadata() else { continue };
            let Ok(modified) = meta.modified() else { continue };
            let age_ms = modified
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as i64)
                .unwrap_or(0);
            if age_ms < cutoff_ms {
                let _ = fs::remove_file(dirent.path());
                removed += 1;
            }
        }
        if removed > 0 {
            self.hot.invalidate_all();
        }
        Ok(removed)
    }
}

fn cache_key(run_id: i64, combination_hash: &str) -> String {
    format!("{run_id}:{combination_hash}")
}

fn io_err(path: &Path, e: std::io::Error) -> CacheError {
    CacheError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    }
}
