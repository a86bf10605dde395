//! Storage traits implemented by the SQLite run store.
//!
//! The job runner, the analysis engine, and the gateway all consume the
//! store through these traits; no code outside `tally-storage` touches
//! a raw connection.

use std::sync::Arc;

use crate::errors::StorageError;
use crate::types::combination::Combination;
use crate::types::results::{
    AnalysisResult, ComparisonSummary, ExportCategory, ExportChunkMeta,
};
use crate::types::run::{Run, RunParams, RunStage, RunStatus, StageKind, StageStatus};
use crate::types::side::Side;

/// Run rows: creation, reads, and serialized mutation.
pub trait IRuns: Send + Sync {
    /// Insert a run plus its pending stages in one transaction.
    /// Returns the new monotonic run id.
    fn create_run(
        &self,
        params: &RunParams,
        stages: &[StageKind],
        created_at: i64,
    ) -> Result<i64, StorageError>;

    fn get_run(&self, run_id: i64) -> Result<Option<Run>, StorageError>;

    /// Compare-and-swap status transition. Returns `false` when the
    /// current status did not match `from` (some other transition won).
    fn cas_status(
        &self,
        run_id: i64,
        from: RunStatus,
        to: RunStatus,
        at: i64,
    ) -> Result<bool, StorageError>;

    /// Monotonic progress update plus current stage.
    fn set_progress(
        &self,
        run_id: i64,
        progress: u8,
        current_stage: StageKind,
    ) -> Result<(), StorageError>;

    fn set_error_message(&self, run_id: i64, message: &str) -> Result<(), StorageError>;

    fn set_column_pool(&self, run_id: i64, pool: &[String]) -> Result<(), StorageError>;

    fn set_quality_report(
        &self,
        run_id: i64,
        report: &serde_json::Value,
    ) -> Result<(), StorageError>;

    /// Runs whose `created_at` is before `cutoff` and whose status is
    /// terminal — candidates for retention removal.
    fn list_expired_runs(&self, cutoff: i64) -> Result<Vec<i64>, StorageError>;

    /// Remove the run row and all dependent rows. Artifact files are the
    /// caller's responsibility.
    fn delete_run(&self, run_id: i64) -> Result<(), StorageError>;
}

/// Stage rows.
pub trait IStages: Send + Sync {
    fn get_stages(&self, run_id: i64) -> Result<Vec<RunStage>, StorageError>;

    fn stage_started(&self, run_id: i64, kind: StageKind, at: i64) -> Result<(), StorageError>;

    fn stage_completed(&self, run_id: i64, kind: StageKind, at: i64) -> Result<(), StorageError>;

    /// Terminal stage failure: `Error` or `Cancelled`, with details.
    fn stage_finished(
        &self,
        run_id: i64,
        kind: StageKind,
        status: StageStatus,
        details: Option<&str>,
        at: i64,
    ) -> Result<(), StorageError>;

    /// Attach an informational note without changing status (e.g. the
    /// external-mode switch).
    fn stage_note(&self, run_id: i64, kind: StageKind, details: &str) -> Result<(), StorageError>;
}

/// Per-side uniqueness results.
pub trait IAnalysisResults: Send + Sync {
    fn upsert_results(&self, results: &[AnalysisResult]) -> Result<usize, StorageError>;

    fn page_results(
        &self,
        run_id: i64,
        side: Side,
        offset: u64,
        limit: usize,
    ) -> Result<Vec<AnalysisResult>, StorageError>;

    fn count_results(&self, run_id: i64, side: Side) -> Result<u64, StorageError>;

    fn get_result(
        &self,
        run_id: i64,
        side: Side,
        combination: &Combination,
    ) -> Result<Option<AnalysisResult>, StorageError>;
}

/// Reconciliation summaries.
pub trait IComparisons: Send + Sync {
    fn upsert_summary(&self, summary: &ComparisonSummary) -> Result<(), StorageError>;

    fn get_summary(
        &self,
        run_id: i64,
        combination: &Combination,
    ) -> Result<Option<ComparisonSummary>, StorageError>;

    fn list_summaries(&self, run_id: i64) -> Result<Vec<ComparisonSummary>, StorageError>;
}

/// Export chunk index rows. The files on disk are authoritative; these
/// rows are rebuildable from them.
pub trait IExportChunks: Send + Sync {
    /// Insert the row in `writing` status before the file is written.
    fn begin_chunk(&self, meta: &ExportChunkMeta) -> Result<(), StorageError>;

    /// Flip `writing → completed` with final counts, in a single update.
    fn complete_chunk(
        &self,
        run_id: i64,
        combination_hash: &str,
        category: ExportCategory,
        chunk_index: u32,
        row_count: u64,
        byte_size: u64,
    ) -> Result<(), StorageError>;

    fn fail_chunk(
        &self,
        run_id: i64,
        combination_hash: &str,
        category: ExportCategory,
        chunk_index: u32,
    ) -> Result<(), StorageError>;

    /// Completed chunks only, ordered by `chunk_index`.
    fn completed_chunks(
        &self,
        run_id: i64,
        combination_hash: &str,
        category: ExportCategory,
    ) -> Result<Vec<ExportChunkMeta>, StorageError>;

    /// Every chunk row for the pair, all categories, ordered by
    /// (category, chunk_index).
    fn all_chunks(
        &self,
        run_id: i64,
        combination_hash: &str,
    ) -> Result<Vec<ExportChunkMeta>, StorageError>;

    /// Drop all chunk rows for the pair (idempotent regeneration).
    fn delete_chunks(&self, run_id: i64, combination_hash: &str) -> Result<(), StorageError>;
}

/// The full store surface.
pub trait IRunStore:
    IRuns + IStages + IAnalysisResults + IComparisons + IExportChunks + Send + Sync
{
}

impl<T> IRunStore for T where
    T: IRuns + IStages + IAnalysisResults + IComparisons + IExportChunks + Send + Sync
{
}

// ─── Arc blanket impls ──────────────────────────────────────────────

impl<T: IRuns + ?Sized> IRuns for Arc<T> {
    fn create_run(
        &self,
        params: &RunParams,
        stages: &[StageKind],
        created_at: i64,
    ) -> Result<i64, StorageError> {
        (**self).create_run(params, stages, created_at)
    }
    fn get_run(&self, run_id: i64) -> Result<Option<Run>, StorageError> {
        (**self).get_run(run_id)
    }
    fn cas_status(
        &self,
        run_id: i64,
        from: RunStatus,
        to: RunStatus,
        at: i64,
    ) -> Result<bool, StorageError> {
        (**self).cas_status(run_id, from, to, at)
    }
    fn set_progress(
        &self,
        run_id: i64,
        progress: u8,
        current_stage: StageKind,
    ) -> Result<(), StorageError> {
        (**self).set_progress(run_id, progress, current_stage)
    }
    fn set_error_message(&self, run_id: i64, message: &str) -> Result<(), StorageError> {
        (**self).set_error_message(run_id, message)
    }
    fn set_column_pool(&self, run_id: i64, pool: &[String]) -> Result<(), StorageError> {
        (**self).set_column_pool(run_id, pool)
    }
    fn set_quality_report(
        &self,
        run_id: i64,
        report: &serde_json::Value,
    ) -> Result<(), StorageError> {
        (**self).set_quality_report(run_id, report)
    }
    fn list_expired_runs(&self, cutoff: i64) -> Result<Vec<i64>, StorageError> {
        (**self).list_expired_runs(cutoff)
    }
    fn delete_run(&self, run_id: i64) -> Result<(), StorageError> {
        (**self).delete_run(run_id)
    }
}

impl<T: IStages + ?Sized> IStages for Arc<T> {
    fn get_stages(&self, run_id: i64) -> Result<Vec<RunStage>, StorageError> {
        (**self).get_stages(run_id)
    }
    fn stage_started(&self, run_id: i64, kind: StageKind, at: i64) -> Result<(), StorageError> {
        (**self).stage_started(run_id, kind, at)
    }
    fn stage_completed(&self, run_id: i64, kind: StageKind, at: i64) -> Result<(), StorageError> {
        (**self).stage_completed(run_id, kind, at)
    }
    fn stage_finished(
        &self,
        run_id: i64,
        kind: StageKind,
        status: StageStatus,
        details: Option<&str>,
        at: i64,
    ) -> Result<(), StorageError> {
        (**self).stage_finished(run_id, kind, status, details, at)
    }
    fn stage_note(&self, run_id: i64, kind: StageKind, details: &str) -> Result<(), StorageError> {
        (**self).stage_note(run_id, kind, details)
    }
}

impl<T: IAnalysisResults + ?Sized> IAnalysisResults for Arc<T> {
    fn upsert_results(&self, results: &[AnalysisResult]) -> Result<usize, StorageError> {
        (**self).upsert_results(results)
    }
    fn page_results(
        &self,
        run_id: i64,
        side: Side,
        offset: u64,
        limit: usize,
    ) -> Result<Vec<AnalysisResult>, StorageError> {
        (**self).page_results(run_id, side, offset, limit)
    }
    fn count_results(&self, run_id: i64, side: Side) -> Result<u64, StorageError> {
        (**self).count_results(run_id, side)
    }
    fn get_result(
        &self,
        run_id: i64,
        side: Side,
        combination: &Combination,
    ) -> Result<Option<AnalysisResult>, StorageError> {
        (**self).get_result(run_id, side, combination)
    }
}

impl<T: IComparisons + ?Sized> IComparisons for Arc<T> {
    fn upsert_summary(&self, summary: &ComparisonSummary) -> Result<(), StorageError> {
        (**self).upsert_summary(summary)
    }
    fn get_summary(
        &self,
        run_id: i64,
        combination: &Combination,
    ) -> Result<Option<ComparisonSummary>, StorageError> {
        (**self).get_summary(run_id, combination)
    }
    fn list_summaries(&self, run_id: i64) -> Result<Vec<ComparisonSummary>, StorageError> {
        (**self).list_summaries(run_id)
    }
}

impl<T: IExportChunks + ?Sized> IExportChunks for Arc<T> {
    fn begin_chunk(&self, meta: &ExportChunkMeta) -> Result<(), StorageError> {
        (**self).begin_chunk(meta)
    }
    fn complete_chunk(
        &self,
        run_id: i64,
        combination_hash: &str,
        category: ExportCategory,
        chunk_index: u32,
        row_count: u64,
        byte_size: u64,
    ) -> Result<(), StorageError> {
        (**self).complete_chunk(run_id, combination_hash, category, chunk_index, row_count, byte_size)
    }
    fn fail_chunk(
        &self,
        run_id: i64,
        combination_hash: &str,
        category: ExportCategory,
        chunk_index: u32,
    ) -> Result<(), StorageError> {
        (**self).fail_chunk(run_id, combination_hash, category, chunk_index)
    }
    fn completed_chunks(
        &self,
        run_id: i64,
        combination_hash: &str,
        category: ExportCategory,
    ) -> Result<Vec<ExportChunkMeta>, StorageError> {
        (**self).completed_chunks(run_id, combination_hash, category)
    }
    fn all_chunks(
        &self,
        run_id: i64,
        combination_hash: &str,
    ) -> Result<Vec<ExportChunkMeta>, StorageError> {
        (**self).all_chunks(run_id, combination_hash)
    }
    fn delete_chunks(&self, run_id: i64, combination_hash: &str) -> Result<(), StorageError> {
        (**self).delete_chunks(run_id, combination_hash)
    }
}
