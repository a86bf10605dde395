//! `TallyStorageEngine` — the unified store implementing the storage
//! traits from `tally-core`.
//!
//! Wraps `DatabaseManager` (read/write routing) + `BatchWriter` (async
//! batch writes). All reads go through `with_reader()`, all writes
//! through `with_writer()`. This is the single owner of both — no code
//! outside this crate touches a raw `Connection` for store.db.

use std::path::Path;

use rusqlite::Connection;
use tally_core::errors::StorageError;
use tally_core::traits::{IAnalysisResults, IComparisons, IExportChunks, IRuns, IStages};
use tally_core::types::results::{
    AnalysisResult, ComparisonSummary, ExportCategory, ExportChunkMeta,
};
use tally_core::types::run::{Run, RunParams, RunStage, RunStatus, StageKind, StageStatus};
use tally_core::types::side::Side;
use tally_core::Combination;

use crate::batch::{BatchCommand, BatchWriter};
use crate::connection::DatabaseManager;
use crate::queries;

/// The unified run store.
pub struct TallyStorageEngine {
    db: DatabaseManager,
    batch: BatchWriter,
}

impl TallyStorageEngine {
    /// Open a file-backed store, running migrations and pragmas.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let db = DatabaseManager::open(path)?;
        let batch_conn = db.open_batch_connection()?;
        Ok(Self {
            db,
            batch: BatchWriter::new(batch_conn),
        })
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let db = DatabaseManager::open_in_memory()?;
        let batch_conn = db.open_batch_connection()?;
        Ok(Self {
            db,
            batch: BatchWriter::new(batch_conn),
        })
    }

    /// Send a typed command to the batch writer.
    pub fn send_batch(&self, command: BatchCommand) -> Result<(), StorageError> {
        self.batch.send(command)
    }

    /// Flush pending batch writes and block until committed.
    pub fn flush_batch_sync(&self) -> Result<(), StorageError> {
        self.batch.flush_sync()
    }

    /// WAL checkpoint delegation.
    pub fn checkpoint(&self) -> Result<(), StorageError> {
        self.db.checkpoint()
    }

    /// Database file path (None for in-memory).
    pub fn path(&self) -> Option<&Path> {
        self.db.path()
    }

    /// Raw read access — for operations not yet covered by a trait
    /// method. Prefer trait methods where possible.
    pub fn with_reader<F, T>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&Connection) -> Result<T, StorageError>,
    {
        self.db.with_reader(f)
    }

    /// Raw write access. Prefer trait methods where possible.
    pub fn with_writer<F, T>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&Connection) -> Result<T, StorageError>,
    {
        self.db.with_writer(f)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// IRuns
// ═══════════════════════════════════════════════════════════════════════════

impl IRuns for TallyStorageEngine {
    fn create_run(
        &self,
        params: &RunParams,
        stages: &[StageKind],
        created_at: i64,
    ) -> Result<i64, StorageError> {
        self.db
            .with_writer(|conn| queries::runs::create_run(conn, params, stages, created_at))
    }

    fn get_run(&self, run_id: i64) -> Result<Option<Run>, StorageError> {
        self.db.with_reader(|conn| queries::runs::get_run(conn, run_id))
    }

    fn cas_status(
        &self,
        run_id: i64,
        from: RunStatus,
        to: RunStatus,
        at: i64,
    ) -> Result<bool, StorageError> {
        self.db
            .with_writer(|conn| queries::runs::cas_status(conn, run_id, from, to, at))
    }

    fn set_progress(
        &self,
        run_id: i64,
        progress: u8,
        current_stage: StageKind,
    ) -> Result<(), StorageError> {
        self.db
            .with_writer(|conn| queries::runs::set_progress(conn, run_id, progress, current_stage))
    }

    fn set_error_message(&self, run_id: i64, message: &str) -> Result<(), StorageError> {
        self.db
            .with_writer(|conn| queries::runs::set_error_message(conn, run_id, message))
    }

    fn set_column_pool(&self, run_id: i64, pool: &[String]) -> Result<(), StorageError> {
        self.db
            .with_writer(|conn| queries::runs::set_column_pool(conn, run_id, pool))
    }

    fn set_quality_report(
        &self,
        run_id: i64,
        report: &serde_json::Value,
    ) -> Result<(), StorageError> {
        self.db
            .with_writer(|conn| queries::runs::set_quality_report(conn, run_id, report))
    }

    fn list_expired_runs(&self, cutoff: i64) -> Result<Vec<i64>, StorageError> {
        self.db
            .with_reader(|conn| queries::runs::list_expired(conn, cutoff))
    }

    fn delete_run(&self, run_id: i64) -> Result<(), StorageError> {
        self.db.with_writer(|conn| queries::runs::delete_run(conn, run_id))
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// IStages
// ═══════════════════════════════════════════════════════════════════════════

impl IStages for TallyStorageEngine {
    fn get_stages(&self, run_id: i64) -> Result<Vec<RunStage>, StorageError> {
        self.db
            .with_reader(|conn| queries::stages::get_stages(conn, run_id))
    }

    fn stage_started(&self, run_id: i64, kind: StageKind, at: i64) -> Result<(), StorageError> {
        self.db
            .with_writer(|conn| queries::stages::stage_started(conn, run_id, kind, at))
    }

    fn stage_completed(&self, run_id: i64, kind: StageKind, at: i64) -> Result<(), StorageError> {
        self.db
            .with_writer(|conn| queries::stages::stage_completed(conn, run_id, kind, at))
    }

    fn stage_finished(
        &self,
        run_id: i64,
        kind: StageKind,
        status: StageStatus,
        details: Option<&str>,
        at: i64,
    ) -> Result<(), StorageError> {
        self.db.with_writer(|conn| {
            queries::stages::stage_finished(conn, run_id, kind, status, details, at)
        })
    }

    fn stage_note(&self, run_id: i64, kind: StageKind, details: &str) -> Result<(), StorageError> {
        self.db
            .with_writer(|conn| queries::stages::stage_note(conn, run_id, kind, details))
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// IAnalysisResults
// ═══════════════════════════════════════════════════════════════════════════

impl IAnalysisResults for TallyStorageEngine {
    /// Routed through the batch writer, then flushed synchronously so
    /// callers can immediately read what they wrote.
    fn upsert_results(&self, results: &[AnalysisResult]) -> Result<usize, StorageError> {
        let count = results.len();
        self.batch
            .send(BatchCommand::UpsertResults(results.to_vec()))?;
        self.batch.flush_sync()?;
        Ok(count)
    }

    fn page_results(
        &self,
        run_id: i64,
        side: Side,
        offset: u64,
        limit: usize,
    ) -> Result<Vec<AnalysisResult>, StorageError> {
        self.db
            .with_reader(|conn| queries::results::page_results(conn, run_id, side, offset, limit))
    }

    fn count_results(&self, run_id: i64, side: Side) -> Result<u64, StorageError> {
        self.db
            .with_reader(|conn| queries::results::count_results(conn, run_id, side))
    }

    fn get_result(
        &self,
        run_id: i64,
        side: Side,
        combination: &Combination,
    ) -> Result<Option<AnalysisResult>, StorageError> {
        self.db
            .with_reader(|conn| queries::results::get_result(conn, run_id, side, combination))
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// IComparisons
// ═══════════════════════════════════════════════════════════════════════════

impl IComparisons for TallyStorageEngine {
    fn upsert_summary(&self, summary: &ComparisonSummary) -> Result<(), StorageError> {
        self.db
            .with_writer(|conn| queries::summaries::upsert_summary(conn, summary))
    }

    fn get_summary(
        &self,
        run_id: i64,
        combination: &Combination,
    ) -> Result<Option<ComparisonSummary>, StorageError> {
        self.db
            .with_reader(|conn| queries::summaries::get_summary(conn, run_id, combination))
    }

    fn list_summaries(&self, run_id: i64) -> Result<Vec<ComparisonSummary>, StorageError> {
        self.db
            .with_reader(|conn| queries::summaries::list_summaries(conn, run_id))
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// IExportChunks
// ═══════════════════════════════════════════════════════════════════════════

impl IExportChunks for TallyStorageEngine {
    fn begin_chunk(&self, meta: &ExportChunkMeta) -> Result<(), StorageError> {
        self.db.with_writer(|conn| queries::chunks::begin_chunk(conn, meta))
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
        self.db.with_writer(|conn| {
            queries::chunks::complete_chunk(
                conn,
                run_id,
                combination_hash,
                category,
                chunk_index,
                row_count,
                byte_size,
            )
        })
    }

    fn fail_chunk(
        &self,
        run_id: i64,
        combination_hash: &str,
        category: ExportCategory,
        chunk_index: u32,
    ) -> Result<(), StorageError> {
        self.db.with_writer(|conn| {
            queries::chunks::fail_chunk(conn, run_id, combination_hash, category, chunk_index)
        })
    }

    fn completed_chunks(
        &self,
        run_id: i64,
        combination_hash: &str,
        category: ExportCategory,
    ) -> Result<Vec<ExportChunkMeta>, StorageError> {
        self.db.with_reader(|conn| {
            queries::chunks::completed_chunks(conn, run_id, combination_hash, category)
        })
    }

    fn all_chunks(
        &self,
        run_id: i64,
        combination_hash: &str,
    ) -> Result<Vec<ExportChunkMeta>, StorageError> {
        self.db
            .with_reader(|conn| queries::chunks::all_chunks(conn, run_id, combination_hash))
    }

    fn delete_chunks(&self, run_id: i64, combination_hash: &str) -> Result<(), StorageError> {
        self.db
            .with_writer(|conn| queries::chunks::delete_chunks(conn, run_id, combination_hash))
    }
}
