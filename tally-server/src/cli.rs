//! Command line surface.

use std::path::PathBuf;

use clap::Parser;
use tally_core::EngineConfig;

/// Tabular-file reconciliation engine.
#[derive(Debug, Parser)]
#[command(name = "tally", version, about)]
pub struct Cli {
    /// Root of all persisted state (store.db, exports/, cache/, tmp/).
    #[arg(long, env = "TALLY_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Concurrent runs.
    #[arg(long, env = "TALLY_WORKERS")]
    pub workers: Option<usize>,

    /// Export chunk rollover row count.
    #[arg(long)]
    pub max_rows_per_chunk: Option<usize>,

    /// Row count above which the analyzer samples.
    #[arg(long)]
    pub sample_threshold: Option<u64>,

    /// Cap on combinations scored per run.
    #[arg(long)]
    pub max_combinations: Option<usize>,

    /// Days before a run's artifacts are removed.
    #[arg(long)]
    pub retention_days: Option<u32>,

    /// Listen address for the HTTP gateway.
    #[arg(long, default_value = "127.0.0.1:8080")]
    pub listen: String,

    /// Optional TOML config file; CLI flags override it.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// One-shot mode: compare this file against --file-b and exit.
    #[arg(long, requires = "file_b")]
    pub file_a: Option<PathBuf>,

    /// One-shot mode: the B side.
    #[arg(long, requires = "file_a")]
    pub file_b: Option<PathBuf>,

    /// One-shot mode: combination size.
    #[arg(long, default_value_t = 1)]
    pub num_columns: usize,
}

impl Cli {
    /// Load the config file (if any) and lay CLI overrides on top.
    pub fn resolve_config(&self) -> Result<EngineConfig, String> {
        let mut config = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .map_err(|e| format!("cannot read config {}: {e}", path.display()))?;
                EngineConfig::from_toml(&text)
                    .map_err(|e| format!("invalid config {}: {e}", path.display()))?
            }
            None => EngineConfig::default(),
        };
        if let Some(dir) = &self.data_dir {
            config.data_dir = Some(dir.clone());
        }
        if let Some(workers) = self.workers {
            config.workers = Some(workers);
        }
        if let Some(rows) = self.max_rows_per_chunk {
            config.max_rows_per_chunk = Some(rows);
        }
        if let Some(threshold) = self.sample_threshold {
            config.sample_threshold = Some(threshold);
        }
        if let Some(max) = self.max_combinations {
            config.max_combinations = Some(max);
        }
        if let Some(days) = self.retention_days {
            config.retention_days = Some(days);
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tally.toml");
        std::fs::write(&path, "workers = 8\nretention_days = 7\n").unwrap();

        let cli = Cli::parse_from([
            "tally",
            "--config",
            path.to_str().unwrap(),
            "--workers",
            "2",
        ]);
        let config = cli.resolve_config().unwrap();
        assert_eq!(config.effective_workers(), 2);
        assert_eq!(config.effective_retention_days(), 7);
    }

    #[test]
    fn bad_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "workers = \"many\"").unwrap();
        let cli = Cli::parse_from(["tally", "--config", path.to_str().unwrap()]);
        assert!(cli.resolve_config().is_err());
    }
}
