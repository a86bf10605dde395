//! Run and stage state.

use serde::{Deserialize, Serialize};

use super::combination::Combination;

/// Terminal and non-terminal run states.
///
/// `queued → running → {completed, error, cancelled}`; terminal states
/// are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    Completed,
    Error,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Error => "error",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(RunStatus::Queued),
            "running" => Some(RunStatus::Running),
            "completed" => Some(RunStatus::Completed),
            "error" => Some(RunStatus::Error),
            "cancelled" => Some(RunStatus::Cancelled),
            _ => None,
        }
    }

    /// Terminal states never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Error | RunStatus::Cancelled
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The ordered stages of a run. `Quality` is present only when the
/// submission asked for the data-quality pre-stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Reading,
    Quality,
    Validating,
    AnalyzeA,
    AnalyzeB,
    Storing,
    GenerateCache,
    GenerateComparisons,
}

impl StageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StageKind::Reading => "reading",
            StageKind::Quality => "quality",
            StageKind::Validating => "validating",
            StageKind::AnalyzeA => "analyze_a",
            StageKind::AnalyzeB => "analyze_b",
            StageKind::Storing => "storing",
            StageKind::GenerateCache => "generate_cache",
            StageKind::GenerateComparisons => "generate_comparisons",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "reading" => Some(StageKind::Reading),
            "quality" => Some(StageKind::Quality),
            "validating" => Some(StageKind::Validating),
            "analyze_a" => Some(StageKind::AnalyzeA),
            "analyze_b" => Some(StageKind::AnalyzeB),
            "storing" => Some(StageKind::Storing),
            "generate_cache" => Some(StageKind::GenerateCache),
            "generate_comparisons" => Some(StageKind::GenerateComparisons),
            _ => None,
        }
    }

    /// The full stage sequence for a run, in execution order.
    pub fn sequence(with_quality: bool) -> Vec<StageKind> {
        let mut stages = vec![StageKind::Reading];
        if with_quality {
            stages.push(StageKind::Quality);
        }
        stages.extend([
            StageKind::Validating,
            StageKind::AnalyzeA,
            StageKind::AnalyzeB,
            StageKind::Storing,
            StageKind::GenerateCache,
            StageKind::GenerateComparisons,
        ]);
        stages
    }

    /// Run progress in [0, 100] once this stage has completed.
    pub fn progress_after(self) -> u8 {
        match self {
            StageKind::Reading => 10,
            StageKind::Quality => 15,
            StageKind::Validating => 20,
            StageKind::AnalyzeA => 40,
            StageKind::AnalyzeB => 60,
            StageKind::Storing => 70,
            StageKind::GenerateCache => 85,
            StageKind::GenerateComparisons => 100,
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-stage status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    InProgress,
    Completed,
    Error,
    Cancelled,
}

impl StageStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::InProgress => "in_progress",
            StageStatus::Completed => "completed",
            StageStatus::Error => "error",
            StageStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(StageStatus::Pending),
            "in_progress" => Some(StageStatus::InProgress),
            "completed" => Some(StageStatus::Completed),
            "error" => Some(StageStatus::Error),
            "cancelled" => Some(StageStatus::Cancelled),
            _ => None,
        }
    }
}

/// How candidate combinations are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryMode {
    /// Test exactly the user-provided combinations.
    Explicit,
    /// Enumerate all k-subsets, rank by promise, cap.
    Heuristic,
    /// Beam search; never enumerates C(n, k).
    Intelligent,
}

impl DiscoveryMode {
    pub fn as_str(self) -> &'static str {
        match self {
            DiscoveryMode::Explicit => "explicit",
            DiscoveryMode::Heuristic => "heuristic",
            DiscoveryMode::Intelligent => "intelligent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "explicit" => Some(DiscoveryMode::Explicit),
            "heuristic" => Some(DiscoveryMode::Heuristic),
            "intelligent" => Some(DiscoveryMode::Intelligent),
            _ => None,
        }
    }
}

/// Parameters a run is submitted with. Owned by the run row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunParams {
    pub file_a: String,
    pub file_b: String,
    /// Requested combination size k.
    pub num_columns: usize,
    /// User-pinned combinations, always scored.
    #[serde(default)]
    pub expected_combinations: Vec<Combination>,
    /// Combinations never emitted by discovery.
    #[serde(default)]
    pub excluded_combinations: Vec<Combination>,
    /// Row-limit hint; 0 means auto.
    #[serde(default)]
    pub max_rows: u64,
    #[serde(default)]
    pub data_quality_check: bool,
    #[serde(default)]
    pub use_intelligent_discovery: bool,
}

/// A run row as read back from the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub run_id: i64,
    pub params: RunParams,
    pub status: RunStatus,
    pub current_stage: Option<StageKind>,
    pub progress: u8,
    pub error_message: Option<String>,
    /// Column pool established by the validating stage, if reached.
    pub column_pool: Option<Vec<String>>,
    /// Data-quality report JSON, if the pre-stage ran.
    pub quality_report: Option<serde_json::Value>,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
}

/// A stage row as read back from the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStage {
    pub run_id: i64,
    pub stage_order: i64,
    pub kind: StageKind,
    pub status: StageStatus,
    pub details: Option<String>,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
}
