//! Analysis and reconciliation result types.

use serde::{Deserialize, Serialize};

use super::combination::Combination;
use super::side::Side;

/// Uniqueness metrics for one combination on one side.
///
/// `unique_rows` is the number of distinct keys; `duplicate_rows` is the
/// surplus (`total_rows - unique_rows`); `duplicate_count` is the number
/// of rows belonging to keys that occur more than once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub run_id: i64,
    pub side: Side,
    pub combination: Combination,
    pub total_rows: u64,
    pub unique_rows: u64,
    pub duplicate_rows: u64,
    pub duplicate_count: u64,
    /// `100 × unique_rows / total_rows`, 0 for an empty side.
    pub uniqueness_score: f64,
    /// True iff every row's key is distinct, on full (not sampled) data.
    pub is_unique_key: bool,
    pub is_sampled: bool,
    /// Rows actually scored; equals `total_rows` when not sampled.
    pub sample_size: u64,
    /// True when the combination was pinned by the user rather than
    /// discovered.
    pub user_pinned: bool,
}

impl AnalysisResult {
    /// Derive the dependent fields from raw counts.
    pub fn from_counts(
        run_id: i64,
        side: Side,
        combination: Combination,
        total_rows: u64,
        unique_rows: u64,
        duplicate_count: u64,
        is_sampled: bool,
        sample_size: u64,
        user_pinned: bool,
    ) -> Self {
        // Sampled results count and score against the rows actually
        // scored; full results against the whole file.
        let basis = if is_sampled { sample_size } else { total_rows };
        let duplicate_rows = basis.saturating_sub(unique_rows);
        let uniqueness_score = if basis == 0 {
            0.0
        } else {
            100.0 * unique_rows as f64 / basis as f64
        };
        let is_unique_key = !is_sampled && unique_rows == total_rows && total_rows > 0;
        Self {
            run_id,
            side,
            combination,
            total_rows,
            unique_rows,
            duplicate_rows,
            duplicate_count,
            uniqueness_score,
            is_unique_key,
            is_sampled,
            sample_size,
            user_pinned,
        }
    }
}

/// Final counts of a reconciliation. Exactly one per reconciled
/// (run, combination).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonSummary {
    pub run_id: i64,
    pub combination: Combination,
    pub matched: u64,
    pub only_a: u64,
    pub only_b: u64,
    /// Distinct keys per side. `matched + only_a == total_a` and
    /// `matched + only_b == total_b`.
    pub total_a: u64,
    pub total_b: u64,
    pub generated_at: i64,
}

/// The three reconciliation output categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportCategory {
    Matched,
    OnlyA,
    OnlyB,
}

impl ExportCategory {
    pub const ALL: [ExportCategory; 3] =
        [ExportCategory::Matched, ExportCategory::OnlyA, ExportCategory::OnlyB];

    pub fn as_str(self) -> &'static str {
        match self {
            ExportCategory::Matched => "matched",
            ExportCategory::OnlyA => "only_a",
            ExportCategory::OnlyB => "only_b",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "matched" => Some(ExportCategory::Matched),
            "only_a" => Some(ExportCategory::OnlyA),
            "only_b" => Some(ExportCategory::OnlyB),
            _ => None,
        }
    }

    /// Which side's rows this category carries. Matched rows carry the
    /// A-side row.
    pub fn row_side(self) -> Side {
        match self {
            ExportCategory::Matched | ExportCategory::OnlyA => Side::A,
            ExportCategory::OnlyB => Side::B,
        }
    }
}

impl std::fmt::Display for ExportCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Chunk lifecycle. A category is readable once it has at least one
/// completed chunk; pagination skips writing/failed chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatus {
    Writing,
    Completed,
    Failed,
}

impl ChunkStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ChunkStatus::Writing => "writing",
            ChunkStatus::Completed => "completed",
            ChunkStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "writing" => Some(ChunkStatus::Writing),
            "completed" => Some(ChunkStatus::Completed),
            "failed" => Some(ChunkStatus::Failed),
            _ => None,
        }
    }
}

/// A chunk row in the store — a denormalized index over the export
/// files on disk, rebuildable from them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportChunkMeta {
    pub run_id: i64,
    pub combination_hash: String,
    pub category: ExportCategory,
    /// 1-based; total order within (run, combination, category).
    pub chunk_index: u32,
    pub row_count: u64,
    pub byte_size: u64,
    pub path: String,
    pub status: ChunkStatus,
}

/// Cached summary plus bounded key samples for one reconciled
/// combination. Counts always reflect full data, never the samples.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub summary: ComparisonSummary,
    pub sample_matched: Vec<String>,
    pub sample_only_a: Vec<String>,
    pub sample_only_b: Vec<String>,
}

impl CacheEntry {
    pub fn samples(&self, category: ExportCategory) -> &[String] {
        match category {
            ExportCategory::Matched => &self.sample_matched,
            ExportCategory::OnlyA => &self.sample_only_a,
            ExportCategory::OnlyB => &self.sample_only_b,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_counts_derives_duplicates_and_score() {
        // 10 rows, one key appearing three times: 8 distinct keys.
        let r = AnalysisResult::from_counts(
            1,
            Side::A,
            Combination::new(["dept", "role"]),
            10,
            8,
            3,
            false,
            10,
            false,
        );
        assert_eq!(r.duplicate_rows, 2);
        assert_eq!(r.duplicate_count, 3);
        assert!((r.uniqueness_score - 80.0).abs() < f64::EPSILON);
        assert!(!r.is_unique_key);
    }

    #[test]
    fn sampled_results_are_never_unique_keys() {
        let r = AnalysisResult::from_counts(
            1,
            Side::B,
            Combination::new(["id"]),
            100,
            100,
            0,
            true,
            100,
            false,
        );
        assert!(!r.is_unique_key);
        assert!(r.is_sampled);
    }

    #[test]
    fn empty_side_scores_zero() {
        let r = AnalysisResult::from_counts(
            1,
            Side::A,
            Combination::new(["id"]),
            0,
            0,
            0,
            false,
            0,
            false,
        );
        assert_eq!(r.uniqueness_score, 0.0);
        assert!(!r.is_unique_key);
    }
}
