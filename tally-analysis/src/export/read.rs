//! Paginated reading over completed export chunks.
//!
//! The union of completed chunks, read in `chunk_index` order, is the
//! canonical dataset for a category. Callers pass completed chunks
//! only; `writing`/`failed` rows never reach this module.

use std::fs::File;
use std::path::Path;

use tally_core::errors::ExportError;
use tally_core::types::results::ExportChunkMeta;

/// Read `limit` rows starting at `offset` across the ordered chunks.
/// Rows are returned without the header.
pub fn read_category_page(
    chunks: &[ExportChunkMeta],
    offset: u64,
    limit: usize,
) -> Result<Vec<Vec<String>>, ExportError> {
    let mut rows = Vec::with_capacity(limit.min(1024));
    let mut remaining_skip = offset;

    for chunk in chunks {
        if rows.len() >= limit {
            break;
        }
        if remaining_skip >= chunk.row_count {
            remaining_skip -= chunk.row_count;
            continue;
        }
        read_chunk_rows(Path::new(&chunk.path), remaining_skip, limit - rows.len(), &mut rows)?;
        remaining_skip = 0;
    }
    Ok(rows)
}

/// The header row of a chunk file.
pub fn read_chunk_header(path: &Path) -> Result<Vec<String>, ExportError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_reader(File::open(path).map_err(|e| io_err(path, e))?);
    let mut record = csv::StringRecord::new();
    let has = reader
        .read_record(&mut record)
        .map_err(|e| io_err(path, std::io::Error::other(e)))?;
    if !has {
        return Ok(Vec::new());
    }
    Ok(record.iter().map(String::from).collect())
}

fn read_chunk_rows(
    path: &Path,
    skip: u64,
    take: usize,
    out: &mut Vec<Vec<String>>,
) -> Result<(), ExportError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(File::open(path).map_err(|e| io_err(path, e))?);

    let mut taken = 0usize;
    for (i, record) in reader.records().enumerate() {
        let record = record.map_err(|e| io_err(path, std::io::Error::other(e)))?;
        if (i as u64) < skip {
            continue;
        }
        out.push(record.iter().map(String::from).collect());
        taken += 1;
        if taken >= take {
            break;
        }
    }
    Ok(())
}

fn io_err(path: &Path, e: std::io::Error) -> ExportError {
    ExportError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    }
}
