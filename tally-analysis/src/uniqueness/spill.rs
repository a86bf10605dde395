//! External counting: hash-partition keys to temp files, then count
//! each partition independently.

use std::fs::{self, File};
use std::path::PathBuf;

use rayon::prelude::*;
use tally_core::constants::ROWS_PER_CHECK;
use tally_core::errors::AnalysisError;
use tally_core::FxHashMap;
use xxhash_rust::xxh3::xxh3_64;

use super::{finish_counter, AnalyzeRequest, KeyCounts};
use crate::keys::project_key;
use crate::limits::checkpoint;
use crate::reader::RowStream;

/// Re-stream the side, spilling `(combination_index, key)` records to
/// one file per hash partition, then count partitions in parallel.
/// Distinct keys never cross partitions, so per-partition counts sum.
pub(super) fn count_external(
    request: &AnalyzeRequest<'_>,
    indices: &[Vec<usize>],
) -> Result<(Vec<KeyCounts>, u64), AnalysisError> {
    let partitions = request.partitions.max(2);
    fs::create_dir_all(&request.tmp_dir)?;

    let paths: Vec<PathBuf> = (0..partitions)
        .map(|p| {
            request
                .tmp_dir
                .join(format!("partition_uniq_{}_{p:03}.csv", request.side))
        })
        .collect();

    let mut spilled_bytes = 0u64;
    {
        let mut writers: Vec<csv::Writer<File>> = paths
            .iter()
            .map(|p| Ok(csv::Writer::from_writer(File::create(p)?)))
            .collect::<Result<_, std::io::Error>>()?;

        let mut total_rows = 0u64;
        for row in RowStream::open(request.profile)? {
            let row = row?;
            total_rows += 1;
            if total_rows % ROWS_PER_CHECK == 0 {
                checkpoint(request.cancellation, request.deadline.as_ref())?;
            }
            for (combo_idx, combo) in indices.iter().enumerate() {
                let key = project_key(&row, combo);
                let p = (xxh3_64(key.as_bytes()) % partitions as u64) as usize;
                spilled_bytes += key.len() as u64 + 8;
                if spilled_bytes > request.temp_budget_bytes {
                    cleanup(&paths);
                    return Err(AnalysisError::TempBudget {
                        message: format!(
                            "uniqueness spill exceeded {} bytes",
                            request.temp_budget_bytes
                        ),
                    });
                }
                writers[p]
                    .write_record([combo_idx.to_string().as_str(), key.as_str()])
                    .map_err(|e| AnalysisError::Io {
                        message: e.to_string(),
                    })?;
            }
        }
        for w in &mut writers {
            w.flush()?;
        }

        let combos = indices.len();
        let partials: Result<Vec<Vec<KeyCounts>>, AnalysisError> = paths
            .par_iter()
            .map(|path| count_partition(path, combos))
            .collect();
        let partials = partials?;
        cleanup(&paths);

        let mut totals = vec![KeyCounts::default(); combos];
        for partial in partials {
            for (t, p) in totals.iter_mut().zip(partial) {
                t.distinct += p.distinct;
                t.duplicate_count += p.duplicate_count;
            }
        }
        Ok((totals, total_rows))
    }
}

fn count_partition(path: &PathBuf, combos: usize) -> Result<Vec<KeyCounts>, AnalysisError> {
    let mut counters: Vec<FxHashMap<String, u32>> =
        (0..combos).map(|_| FxHashMap::default()).collect();
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_reader(File::open(path)?);
    for record in reader.records() {
        let record = record.map_err(|e| AnalysisError::Io {
            message: e.to_string(),
        })?;
        let combo_idx: usize = record
            .get(0)
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| AnalysisError::Io {
                message: "corrupt spill record".to_string(),
            })?;
        let key = record.get(1).unwrap_or("");
        *counters[combo_idx].entry(key.to_string()).or_insert(0) += 1;
    }
    Ok(counters.into_iter().map(finish_counter).collect())
}

fn cleanup(paths: &[PathBuf]) {
    for path in paths {
        let _ = fs::remove_file(path);
    }
}
