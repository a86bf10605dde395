//! Two-sided streaming reconciliation.
//!
//! Produces the three-way partition of distinct key values — matched,
//! only-A, only-B — streaming both files with bounded memory, emitting
//! export records and cache samples as it goes. Falls back to hash-
//! partitioned external processing when the in-memory key sets exceed
//! the cap.

mod spill;

use std::path::PathBuf;
use std::sync::Arc;

use tally_core::constants::ROWS_PER_CHECK;
use tally_core::errors::{AnalysisError, ExportError};
use tally_core::traits::IExportChunks;
use tally_core::types::results::{ComparisonSummary, ExportCategory, ExportChunkMeta};
use tally_core::{Combination, FxHashSet, RunCancellation};

use crate::export::{ExportRecord, ExportSpec, ExportWriter};
use crate::keys::{display_key, key_parts, project_key};
use crate::limits::{checkpoint, Deadline};
use crate::reader::{FileProfile, RowStream};

/// Everything one reconciliation needs.
pub struct ReconcileRequest<'a> {
    pub run_id: i64,
    pub combination: &'a Combination,
    pub profile_a: &'a FileProfile,
    pub profile_b: &'a FileProfile,
    pub cancellation: &'a RunCancellation,
    pub deadline: Option<Deadline>,
    /// Total keys held across the in-memory sets before falling back to
    /// external mode.
    pub memory_cap_keys: usize,
    pub partitions: usize,
    pub tmp_dir: PathBuf,
    pub temp_budget_bytes: u64,
    pub max_rows_per_chunk: usize,
    pub max_bytes_per_chunk: u64,
    pub cache_sample_limit: usize,
    pub generated_at: i64,
    /// Called with cumulative rows processed, at checkpoint cadence.
    pub progress: Option<&'a (dyn Fn(u64) + Sync)>,
    /// Force external mode up front (the caller already knows the key
    /// population is too big).
    pub force_external: bool,
}

/// First-S key samples per category, in emission order.
#[derive(Debug, Default, Clone)]
pub struct CategorySamples {
    pub matched: Vec<String>,
    pub only_a: Vec<String>,
    pub only_b: Vec<String>,
}

impl CategorySamples {
    pub(crate) fn push(&mut self, category: ExportCategory, key: &str, limit: usize) {
        let bucket = match category {
            ExportCategory::Matched => &mut self.matched,
            ExportCategory::OnlyA => &mut self.only_a,
            ExportCategory::OnlyB => &mut self.only_b,
        };
        if bucket.len() < limit {
            bucket.push(display_key(key));
        }
    }
}

/// The reconciliation result: final counts, bounded samples, and the
/// completed chunk metas.
#[derive(Debug)]
pub struct ReconcileOutcome {
    pub summary: ComparisonSummary,
    pub samples: CategorySamples,
    pub chunks: Vec<ExportChunkMeta>,
    pub external_mode: bool,
}

pub struct Reconciler;

impl Reconciler {
    /// Run the full reconciliation for one combination, writing chunk
    /// exports through `chunk_store` under `export_dir`.
    pub fn reconcile(
        request: &ReconcileRequest<'_>,
        export_dir: PathBuf,
        chunk_store: Arc<dyn IExportChunks>,
    ) -> Result<ReconcileOutcome, AnalysisError> {
        let spec = build_spec(request, export_dir);

        if !request.force_external {
            match in_memory(request, &spec, &chunk_store)? {
                Attempt::Done(outcome) => return Ok(outcome),
                Attempt::CapHit => {
                    tracing::info!(
                        run_id = request.run_id,
                        combination = %request.combination,
                        cap = request.memory_cap_keys,
                        "reconciliation hit the memory cap, restarting in external mode"
                    );
                    // Chunks from the aborted attempt are superseded;
                    // external mode rebuilds from scratch.
                    chunk_store
                        .delete_chunks(request.run_id, &spec.combination_hash)
                        .map_err(chunk_row_err)?;
                }
            }
        }

        spill::external(request, &spec, &chunk_store)
    }
}

fn build_spec(request: &ReconcileRequest<'_>, export_dir: PathBuf) -> ExportSpec {
    ExportSpec {
        run_id: request.run_id,
        combination_hash: request.combination.stable_hash(),
        dir: export_dir,
        key_columns: request.combination.columns().to_vec(),
        header_a: request.profile_a.header.clone(),
        header_b: request.profile_b.header.clone(),
        max_rows_per_chunk: request.max_rows_per_chunk,
        max_bytes_per_chunk: request.max_bytes_per_chunk,
    }
}

enum Attempt {
    Done(ReconcileOutcome),
    CapHit,
}

/// Internal marker for a mid-emission cap hit; never user-visible.
const CAP_SENTINEL: &str = "\u{1}reconcile-cap\u{1}";

/// The three-pass in-memory algorithm:
///
/// 1. Pass over A (key columns only) builds the distinct-key set `SA`.
/// 2. Pass over B: keys in `SA` are marked matched; keys outside `SA`
///    are emitted to only-B in B's first-occurrence order.
/// 3. Second pass over A: each distinct key is emitted exactly once, to
///    matched (with the A-side row) or only-A, in A's first-occurrence
///    order.
fn in_memory(
    request: &ReconcileRequest<'_>,
    spec: &ExportSpec,
    chunk_store: &Arc<dyn IExportChunks>,
) -> Result<Attempt, AnalysisError> {
    let indices_a = key_indices(request.profile_a, request.combination)?;
    let indices_b = key_indices(request.profile_b, request.combination)?;
    let cap = request.memory_cap_keys;
    let key_columns = request.combination.columns();

    // Pass 1 over A, projected to the key columns. Nothing has been
    // emitted yet, so a cap hit here restarts cleanly.
    let identity: Vec<usize> = (0..key_columns.len()).collect();
    let mut sa: FxHashSet<String> = FxHashSet::default();
    let mut rows_processed = 0u64;
    for row in RowStream::open_projected(request.profile_a, Some(key_columns))? {
        let row = row?;
        rows_processed += 1;
        if rows_processed % ROWS_PER_CHECK == 0 {
            checkpoint(request.cancellation, request.deadline.as_ref())?;
            publish(request, rows_processed);
        }
        let key = project_key(&row, &identity);
        if sa.len() >= cap && !sa.contains(&key) {
            return Ok(Attempt::CapHit);
        }
        sa.insert(key);
    }

    // The writer gets its own flag so an aborted attempt fails the
    // in-flight chunk without touching the run-level flag.
    let writer_cancel = RunCancellation::new();
    let writer = ExportWriter::spawn(
        spec.clone(),
        Arc::clone(chunk_store),
        writer_cancel.clone(),
    )
    .map_err(AnalysisError::Export)?;

    let mut samples = CategorySamples::default();
    let limit = request.cache_sample_limit;
    let mut b_seen: FxHashSet<String> = FxHashSet::default();
    let mut matched: FxHashSet<String> = FxHashSet::default();
    let mut total_a = 0u64;

    let result = (|| -> Result<(), AnalysisError> {
        // Pass over B: mark matches, emit only-B.
        for row in RowStream::open(request.profile_b)? {
            let row = row?;
            rows_processed += 1;
            if rows_processed % ROWS_PER_CHECK == 0 {
                checkpoint(request.cancellation, request.deadline.as_ref())?;
                publish(request, rows_processed);
            }
            let key = project_key(&row, &indices_b);
            if !b_seen.insert(key.clone()) {
                continue;
            }
            if sa.len() + b_seen.len() + matched.len() > cap.saturating_mul(2) {
                return Err(AnalysisError::Io {
                    message: CAP_SENTINEL.to_string(),
                });
            }
            if sa.contains(&key) {
                matched.insert(key);
            } else {
                samples.push(ExportCategory::OnlyB, &key, limit);
                writer
                    .send(ExportRecord {
                        category: ExportCategory::OnlyB,
                        key_parts: key_parts(&key),
                        row,
                    })
                    .map_err(AnalysisError::Export)?;
            }
        }

        // Pass 2 over A: emit each distinct key exactly once.
        let mut a_emitted: FxHashSet<String> = FxHashSet::default();
        for row in RowStream::open(request.profile_a)? {
            let row = row?;
            rows_processed += 1;
            if rows_processed % ROWS_PER_CHECK == 0 {
                checkpoint(request.cancellation, request.deadline.as_ref())?;
                publish(request, rows_processed);
            }
            let key = project_key(&row, &indices_a);
            if !a_emitted.insert(key.clone()) {
                continue;
            }
            let category = if matched.contains(&key) {
                ExportCategory::Matched
            } else {
                ExportCategory::OnlyA
            };
            samples.push(category, &key, limit);
            writer
                .send(ExportRecord {
                    category,
                    key_parts: key_parts(&key),
                    row,
                })
                .map_err(AnalysisError::Export)?;
        }
        total_a = a_emitted.len() as u64;
        Ok(())
    })();

    match result {
        Ok(()) => {
            let chunks = writer.finish().map_err(AnalysisError::Export)?;
            let total_b = b_seen.len() as u64;
            let matched_count = matched.len() as u64;
            Ok(Attempt::Done(ReconcileOutcome {
                summary: ComparisonSummary {
                    run_id: request.run_id,
                    combination: request.combination.clone(),
                    matched: matched_count,
                    only_a: total_a.saturating_sub(matched_count),
                    only_b: total_b.saturating_sub(matched_count),
                    total_a,
                    total_b,
                    generated_at: request.generated_at,
                },
                samples,
                chunks,
                external_mode: false,
            }))
        }
        Err(e) => {
            // Fail the in-flight chunk; completed chunks stay usable.
            writer_cancel.cancel();
            drop(writer);
            match e {
                AnalysisError::Io { ref message } if message.as_str() == CAP_SENTINEL => {
                    Ok(Attempt::CapHit)
                }
                other => Err(other),
            }
        }
    }
}

pub(crate) fn key_indices(
    profile: &FileProfile,
    combination: &Combination,
) -> Result<Vec<usize>, AnalysisError> {
    profile.column_indices(combination.columns()).ok_or_else(|| {
        AnalysisError::parameter(format!(
            "combination '{combination}' references a column not present in {}",
            profile.path.display()
        ))
    })
}

pub(crate) fn chunk_row_err(e: tally_core::errors::StorageError) -> AnalysisError {
    AnalysisError::Export(ExportError::ChunkRow {
        message: e.to_string(),
    })
}

fn publish(request: &ReconcileRequest<'_>, rows: u64) {
    if let Some(progress) = request.progress {
        progress(rows);
    }
}
