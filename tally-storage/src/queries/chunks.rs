//! export_chunks table queries. Rows are a denormalized index over the
//! chunk files on disk; the files are authoritative.

use rusqlite::{params, Connection, Row};
use tally_core::coerce::safe_str;
use tally_core::errors::StorageError;
use tally_core::types::results::{ChunkStatus, ExportCategory, ExportChunkMeta};

pub fn begin_chunk(conn: &Connection, meta: &ExportChunkMeta) -> Result<(), StorageError> {
    conn.execute(
        "INSERT OR REPLACE INTO export_chunks
         (run_id, combination_hash, category, chunk_index, row_count, byte_size, path, status)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'writing')",
        params![
            meta.run_id,
            meta.combination_hash,
            meta.category.as_str(),
            meta.chunk_index,
            meta.row_count as i64,
            meta.byte_size as i64,
            meta.path,
        ],
    )?;
    Ok(())
}

/// The `writing → completed` flip with final counts, in one update.
pub fn complete_chunk(
    conn: &Connection,
    run_id: i64,
    combination_hash: &str,
    category: ExportCategory,
    chunk_index: u32,
    row_count: u64,
    byte_size: u64,
) -> Result<(), StorageError> {
    let affected = conn.execute(
        "UPDATE export_chunks
         SET status = 'completed', row_count = ?5, byte_size = ?6
         WHERE run_id = ?1 AND combination_hash = ?2 AND category = ?3
           AND chunk_index = ?4 AND status = 'writing'",
        params![
            run_id,
            combination_hash,
            category.as_str(),
            chunk_index,
            row_count as i64,
            byte_size as i64,
        ],
    )?;
    if affected == 0 {
        return Err(StorageError::SqliteError {
            message: format!(
                "chunk {combination_hash}/{category}/{chunk_index} was not in writing state"
            ),
        });
    }
    Ok(())
}

pub fn fail_chunk(
    conn: &Connection,
    run_id: i64,
    combination_hash: &str,
    category: ExportCategory,
    chunk_index: u32,
) -> Result<(), StorageError> {
    conn.execute(
        "UPDATE export_chunks SET status = 'failed'
         WHERE run_id = ?1 AND combination_hash = ?2 AND category = ?3
           AND chunk_index = ?4 AND status = 'writing'",
        params![run_id, combination_hash, category.as_str(), chunk_index],
    )?;
    Ok(())
}

pub fn completed_chunks(
    conn: &Connection,
    run_id: i64,
    combination_hash: &str,
    category: ExportCategory,
) -> Result<Vec<ExportChunkMeta>, StorageError> {
    let mut stmt = conn.prepare_cached(
        "SELECT run_id, combination_hash, category, chunk_index, row_count, byte_size, path, status
         FROM export_chunks
         WHERE run_id = ?1 AND combination_hash = ?2 AND category = ?3 AND status = 'completed'
         ORDER BY chunk_index",
    )?;
    let rows = stmt.query_map(
        params![run_id, combination_hash, category.as_str()],
        map_chunk_row,
    )?;
    collect_rows(rows)
}

pub fn all_chunks(
    conn: &Connection,
    run_id: i64,
    combination_hash: &str,
) -> Result<Vec<ExportChunkMeta>, StorageError> {
    let mut stmt = conn.prepare_cached(
        "SELECT run_id, combination_hash, category, chunk_index, row_count, byte_size, path, status
         FROM export_chunks
         WHERE run_id = ?1 AND combination_hash = ?2
         ORDER BY category, chunk_index",
    )?;
    let rows = stmt.query_map(params![run_id, combination_hash], map_chunk_row)?;
    collect_rows(rows)
}

pub fn delete_chunks(
    conn: &Connection,
    run_id: i64,
    combination_hash: &str,
) -> Result<(), StorageError> {
    conn.execute(
        "DELETE FROM export_chunks WHERE run_id = ?1 AND combination_hash = ?2",
        params![run_id, combination_hash],
    )?;
    Ok(())
}

fn map_chunk_row(row: &Row<'_>) -> rusqlite::Result<ExportChunkMeta> {
    let category_text: String = row.get(2)?;
    let status_text: String = row.get(7)?;
    Ok(ExportChunkMeta {
        run_id: row.get(0)?,
        combination_hash: row.get(1)?,
        category: ExportCategory::parse(&category_text).unwrap_or(ExportCategory::Matched),
        chunk_index: row.get::<_, i64>(3)? as u32,
        row_count: row.get::<_, i64>(4)? as u64,
        byte_size: row.get::<_, i64>(5)? as u64,
        path: safe_str(row.get_ref(6)?, ""),
        status: ChunkStatus::parse(&status_text).unwrap_or(ChunkStatus::Failed),
    })
}

fn collect_rows(
    rows: rusqlite::MappedRows<'_, impl FnMut(&Row<'_>) -> rusqlite::Result<ExportChunkMeta>>,
) -> Result<Vec<ExportChunkMeta>, StorageError> {
    let mut result = Vec::new();
    for row in rows {
        result.push(row?);
    }
    Ok(result)
}
