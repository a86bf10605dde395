//! Engine configuration, loadable from TOML with CLI/env overrides
//! applied by the server.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Which sampling method the reader uses when the analyzer decides to
/// sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingPolicy {
    /// First N rows. Deterministic; used when the user sets a row limit.
    Head,
    /// Seeded reservoir over the full file.
    Uniform,
}

/// Configuration for the whole engine. Every field is optional in the
/// file; `effective_*()` accessors apply defaults.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    /// Root of all persisted state (store.db, exports/, cache/, tmp/).
    pub data_dir: Option<PathBuf>,
    /// Concurrent runs. Default: 2.
    pub workers: Option<usize>,
    /// Export chunk rollover row count. Default: 10_000.
    pub max_rows_per_chunk: Option<usize>,
    /// Export chunk rollover byte size. Default: 1 MiB.
    pub max_bytes_per_chunk: Option<u64>,
    /// Row count above which the analyzer samples. Default: 50_000.
    pub sample_threshold: Option<u64>,
    /// Cap on combinations scored per run. Default: 50.
    pub max_combinations: Option<usize>,
    /// Days before a run's artifacts are removed. Default: 30.
    pub retention_days: Option<u32>,
    /// Sampling method when the user sets no row limit. Default: uniform.
    pub sampling_policy: Option<SamplingPolicy>,
    /// Distinct keys held in memory before spilling to external mode.
    /// Default: 4_000_000.
    pub memory_cap_keys: Option<usize>,
    /// Hash partitions used by external mode. Default: 16.
    pub external_partitions: Option<usize>,
    /// Bytes of spill files allowed per run. Default: 8 GiB.
    pub temp_budget_bytes: Option<u64>,
    /// Keys sampled per category into a cache entry. Default: 100.
    pub cache_sample_limit: Option<usize>,
    /// Combinations reconciled automatically at the end of a run.
    /// Default: 3.
    pub auto_reconcile_limit: Option<usize>,
    /// Rows sampled for column profiling and discovery. Default: 10_000.
    pub profile_sample_rows: Option<usize>,
    /// Wall-clock budget for the reading stage, seconds. Default: 1800.
    pub reading_timeout_secs: Option<u64>,
    /// Wall-clock budget for each analyze stage, seconds. Default: 1800.
    pub analyze_timeout_secs: Option<u64>,
    /// Wall-clock budget for reconciliation, seconds. Default: 7200.
    pub reconcile_timeout_secs: Option<u64>,
    /// Stage retry attempts for recoverable failures. Default: 3.
    pub retry_attempts: Option<u32>,
}

impl EngineConfig {
    /// Parse from a TOML string.
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn effective_data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| PathBuf::from("data"))
    }

    pub fn effective_workers(&self) -> usize {
        self.workers.unwrap_or(2).max(1)
    }

    pub fn effective_max_rows_per_chunk(&self) -> usize {
        self.max_rows_per_chunk
            .unwrap_or(crate::constants::DEFAULT_CHUNK_ROWS)
            .max(1)
    }

    pub fn effective_max_bytes_per_chunk(&self) -> u64 {
        self.max_bytes_per_chunk
            .unwrap_or(crate::constants::DEFAULT_CHUNK_BYTES)
            .max(1024)
    }

    pub fn effective_sample_threshold(&self) -> u64 {
        self.sample_threshold
            .unwrap_or(crate::constants::SAMPLE_THRESHOLD)
    }

    pub fn effective_max_combinations(&self) -> usize {
        self.max_combinations
            .unwrap_or(crate::constants::MAX_COMBINATIONS_PER_RUN)
            .max(1)
    }

    pub fn effective_retention_days(&self) -> u32 {
        self.retention_days.unwrap_or(30)
    }

    pub fn effective_sampling_policy(&self) -> SamplingPolicy {
        self.sampling_policy.unwrap_or(SamplingPolicy::Uniform)
    }

    pub fn effective_memory_cap_keys(&self) -> usize {
        self.memory_cap_keys.unwrap_or(4_000_000).max(1024)
    }

    pub fn effective_external_partitions(&self) -> usize {
        self.external_partitions.unwrap_or(16).clamp(2, 256)
    }

    pub fn effective_temp_budget_bytes(&self) -> u64 {
        self.temp_budget_bytes.unwrap_or(8 * 1024 * 1024 * 1024)
    }

    pub fn effective_cache_sample_limit(&self) -> usize {
        self.cache_sample_limit
            .unwrap_or(crate::constants::CACHE_SAMPLE_LIMIT)
    }

    pub fn effective_auto_reconcile_limit(&self) -> usize {
        self.auto_reconcile_limit.unwrap_or(3)
    }

    pub fn effective_profile_sample_rows(&self) -> usize {
        self.profile_sample_rows.unwrap_or(10_000).max(100)
    }

    pub fn effective_reading_timeout_secs(&self) -> u64 {
        self.reading_timeout_secs.unwrap_or(30 * 60)
    }

    pub fn effective_analyze_timeout_secs(&self) -> u64 {
        self.analyze_timeout_secs.unwrap_or(30 * 60)
    }

    pub fn effective_reconcile_timeout_secs(&self) -> u64 {
        self.reconcile_timeout_secs.unwrap_or(2 * 60 * 60)
    }

    pub fn effective_retry_attempts(&self) -> u32 {
        self.retry_attempts.unwrap_or(3)
    }

    // ── persisted state layout ──

    pub fn store_path(&self) -> PathBuf {
        self.effective_data_dir().join("store.db")
    }

    pub fn exports_dir(&self) -> PathBuf {
        self.effective_data_dir().join("exports")
    }

    pub fn run_export_dir(&self, run_id: i64) -> PathBuf {
        self.exports_dir().join(format!("run_{run_id}"))
    }

    pub fn comparison_dir(&self, run_id: i64, combination_hash: &str) -> PathBuf {
        self.run_export_dir(run_id)
            .join(format!("comparison_{combination_hash}"))
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.effective_data_dir().join("cache")
    }

    pub fn cache_entry_path(&self, run_id: i64, combination_hash: &str) -> PathBuf {
        self.cache_dir()
            .join(format!("run_{run_id}_{combination_hash}.json"))
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.effective_data_dir().join("tmp")
    }

    pub fn run_tmp_dir(&self, run_id: i64) -> PathBuf {
        self.tmp_dir().join(format!("run_{run_id}"))
    }

    /// Convenience for tests: a config rooted at `dir`.
    pub fn rooted_at(dir: &Path) -> Self {
        Self {
            data_dir: Some(dir.to_path_buf()),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_file_is_empty() {
        let cfg = EngineConfig::from_toml("").unwrap();
        assert_eq!(cfg.effective_workers(), 2);
        assert_eq!(cfg.effective_retention_days(), 30);
        assert_eq!(cfg.effective_sampling_policy(), SamplingPolicy::Uniform);
        assert_eq!(cfg.effective_max_rows_per_chunk(), 10_000);
    }

    #[test]
    fn layout_paths_are_rooted_at_data_dir() {
        let cfg = EngineConfig::from_toml("data_dir = \"/tmp/t\"").unwrap();
        assert_eq!(cfg.store_path(), PathBuf::from("/tmp/t/store.db"));
        assert_eq!(
            cfg.comparison_dir(7, "abc"),
            PathBuf::from("/tmp/t/exports/run_7/comparison_abc")
        );
        assert_eq!(
            cfg.cache_entry_path(7, "abc"),
            PathBuf::from("/tmp/t/cache/run_7_abc.json")
        );
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let cfg = EngineConfig::from_toml("workers = 4\nsampling_policy = \"head\"").unwrap();
        assert_eq!(cfg.effective_workers(), 4);
        assert_eq!(cfg.effective_sampling_policy(), SamplingPolicy::Head);
        assert_eq!(cfg.effective_max_combinations(), 50);
    }
}
