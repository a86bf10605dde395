//! External reconciliation: hash-partition both sides' rows to spill
//! files, then process each partition independently with per-partition
//! key sets. A single writer keeps chunk indices globally increasing
//! per category across partitions.

use std::fs::{self, File};
use std::path::PathBuf;
use std::sync::Arc;

use tally_core::constants::ROWS_PER_CHECK;
use tally_core::errors::AnalysisError;
use tally_core::traits::IExportChunks;
use tally_core::types::results::{ComparisonSummary, ExportCategory};
use tally_core::types::side::Side;
use tally_core::{FxHashSet, RunCancellation};
use xxhash_rust::xxh3::xxh3_64;

use super::{key_indices, CategorySamples, ReconcileOutcome, ReconcileRequest};
use crate::export::{ExportRecord, ExportSpec, ExportWriter};
use crate::keys::{key_parts, project_key};
use crate::limits::checkpoint;
use crate::reader::RowStream;

pub(super) fn external(
    request: &ReconcileRequest<'_>,
    spec: &ExportSpec,
    chunk_store: &Arc<dyn IExportChunks>,
) -> Result<ReconcileOutcome, AnalysisError> {
    let partitions = request.partitions.max(2);
    fs::create_dir_all(&request.tmp_dir)?;

    let part_paths = |side: Side| -> Vec<PathBuf> {
        (0..partitions)
            .map(|p| {
                request.tmp_dir.join(format!(
                    "partition_{}_{}_{p:03}.csv",
                    spec.combination_hash,
                    side.as_str().to_lowercase()
                ))
            })
            .collect()
    };
    let paths_a = part_paths(Side::A);
    let paths_b = part_paths(Side::B);

    let mut spilled_bytes = 0u64;
    let mut rows_processed = 0u64;

    let spill_result = (|| -> Result<(), AnalysisError> {
        spill_side(
            request,
            request.profile_a,
            &paths_a,
            partitions,
            &mut spilled_bytes,
            &mut rows_processed,
        )?;
        spill_side(
            request,
            request.profile_b,
            &paths_b,
            partitions,
            &mut spilled_bytes,
            &mut rows_processed,
        )
    })();
    if let Err(e) = spill_result {
        cleanup(&paths_a, &paths_b);
        return Err(e);
    }

    let writer_cancel = RunCancellation::new();
    let writer = ExportWriter::spawn(
        spec.clone(),
        Arc::clone(chunk_store),
        writer_cancel.clone(),
    )
    .map_err(AnalysisError::Export)?;

    let mut samples = CategorySamples::default();
    let limit = request.cache_sample_limit;
    let mut matched_total = 0u64;
    let mut total_a = 0u64;
    let mut total_b = 0u64;

    let result = (|| -> Result<(), AnalysisError> {
        for p in 0..partitions {
            checkpoint(request.cancellation, request.deadline.as_ref())?;

            // Load this partition's A keys.
            let mut sa_p: FxHashSet<String> = FxHashSet::default();
            for_each_spilled(&paths_a[p], |key, _row| {
                sa_p.insert(key.to_string());
                Ok(())
            })?;

            // Stream B's partition: mark matches, emit only-B.
            let mut b_seen_p: FxHashSet<String> = FxHashSet::default();
            let mut matched_p: FxHashSet<String> = FxHashSet::default();
            for_each_spilled(&paths_b[p], |key, row| {
                if !b_seen_p.insert(key.to_string()) {
                    return Ok(());
                }
                if sa_p.contains(key) {
                    matched_p.insert(key.to_string());
                } else {
                    samples.push(ExportCategory::OnlyB, key, limit);
                    writer
                        .send(ExportRecord {
                            category: ExportCategory::OnlyB,
                            key_parts: key_parts(key),
                            row,
                        })
                        .map_err(AnalysisError::Export)?;
                }
                Ok(())
            })?;

            // Re-stream A's partition: emit matched and only-A.
            let mut a_emitted_p: FxHashSet<String> = FxHashSet::default();
            for_each_spilled(&paths_a[p], |key, row| {
                if !a_emitted_p.insert(key.to_string()) {
                    return Ok(());
                }
                let category = if matched_p.contains(key) {
                    ExportCategory::Matched
                } else {
                    ExportCategory::OnlyA
                };
                samples.push(category, key, limit);
                writer
                    .send(ExportRecord {
                        category,
                        key_parts: key_parts(key),
                        row,
                    })
                    .map_err(AnalysisError::Export)?;
                Ok(())
            })?;

            matched_total += matched_p.len() as u64;
            total_a += a_emitted_p.len() as u64;
            total_b += b_seen_p.len() as u64;
        }
        Ok(())
    })();

    cleanup(&paths_a, &paths_b);

    match result {
        Ok(()) => {
            let chunks = writer.finish().map_err(AnalysisError::Export)?;
            Ok(ReconcileOutcome {
                summary: ComparisonSummary {
                    run_id: request.run_id,
                    combination: request.combination.clone(),
                    matched: matched_total,
                    only_a: total_a.saturating_sub(matched_total),
                    only_b: total_b.saturating_sub(matched_total),
                    total_a,
                    total_b,
                    generated_at: request.generated_at,
                },
                samples,
                chunks,
                external_mode: true,
            })
        }
        Err(e) => {
            writer_cancel.cancel();
            drop(writer);
            Err(e)
        }
    }
}

/// Stream one side into its partition files. Spill records are
/// `[key, field...]`.
fn spill_side(
    request: &ReconcileRequest<'_>,
    profile: &crate::reader::FileProfile,
    paths: &[PathBuf],
    partitions: usize,
    spilled_bytes: &mut u64,
    rows_processed: &mut u64,
) -> Result<(), AnalysisError> {
    let indices = key_indices(profile, request.combination)?;
    let mut writers: Vec<csv::Writer<File>> = paths
        .iter()
        .map(|p| Ok(csv::Writer::from_writer(File::create(p)?)))
        .collect::<Result<_, std::io::Error>>()?;

    for row in RowStream::open(profile)? {
        let row = row?;
        *rows_processed += 1;
        if *rows_processed % ROWS_PER_CHECK == 0 {
            checkpoint(request.cancellation, request.deadline.as_ref())?;
            if let Some(progress) = request.progress {
                progress(*rows_processed);
            }
        }
        let key = project_key(&row, &indices);
        *spilled_bytes += key.len() as u64 + row.iter().map(|f| f.len() as u64 + 1).sum::<u64>();
        if *spilled_bytes > request.temp_budget_bytes {
            return Err(AnalysisError::TempBudget {
                message: format!(
                    "reconciliation spill exceeded {} bytes",
                    request.temp_budget_bytes
                ),
            });
        }
        let p = (xxh3_64(key.as_bytes()) % partitions as u64) as usize;
        let mut record = Vec::with_capacity(row.len() + 1);
        record.push(key);
        record.extend(row);
        writers[p].write_record(&record).map_err(|e| AnalysisError::Io {
            message: e.to_string(),
        })?;
    }
    for w in &mut writers {
        w.flush()?;
    }
    Ok(())
}

fn for_each_spilled(
    path: &PathBuf,
    mut f: impl FnMut(&str, Vec<String>) -> Result<(), AnalysisError>,
) -> Result<(), AnalysisError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(File::open(path)?);
    for record in reader.records() {
        let record = record.map_err(|e| AnalysisError::Io {
            message: e.to_string(),
        })?;
        let key = record.get(0).unwrap_or("");
        let row: Vec<String> = record.iter().skip(1).map(String::from).collect();
        f(key, row)?;
    }
    Ok(())
}

fn cleanup(paths_a: &[PathBuf], paths_b: &[PathBuf]) {
    for path in paths_a.iter().chain(paths_b) {
        let _ = fs::remove_file(path);
    }
}
