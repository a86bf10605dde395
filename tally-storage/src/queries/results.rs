//! analysis_results table queries.

use rusqlite::{params, Connection, Row};
use tally_core::coerce::safe_str;
use tally_core::errors::StorageError;
use tally_core::types::results::AnalysisResult;
use tally_core::types::side::Side;
use tally_core::Combination;

use super::{combination_from_json, combination_to_json};

pub fn upsert_results(
    conn: &Connection,
    results: &[AnalysisResult],
) -> Result<usize, StorageError> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO analysis_results
         (run_id, side, combination_hash, combination, total_rows, unique_rows,
          duplicate_rows, duplicate_count, uniqueness_score, is_unique_key,
          is_sampled, sample_size, user_pinned)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
         ON CONFLICT(run_id, side, combination_hash) DO UPDATE SET
            combination = excluded.combination,
            total_rows = excluded.total_rows,
            unique_rows = excluded.unique_rows,
            duplicate_rows = excluded.duplicate_rows,
            duplicate_count = excluded.duplicate_count,
            uniqueness_score = excluded.uniqueness_score,
            is_unique_key = excluded.is_unique_key,
            is_sampled = excluded.is_sampled,
            sample_size = excluded.sample_size,
            user_pinned = excluded.user_pinned",
    )?;

    let mut count = 0;
    for r in results {
        stmt.execute(params![
            r.run_id,
            r.side.as_str(),
            r.combination.stable_hash(),
            combination_to_json(&r.combination),
            r.total_rows as i64,
            r.unique_rows as i64,
            r.duplicate_rows as i64,
            r.duplicate_count as i64,
            r.uniqueness_score,
            r.is_unique_key,
            r.is_sampled,
            r.sample_size as i64,
            r.user_pinned,
        ])?;
        count += 1;
    }
    Ok(count)
}

/// Page of results ordered by (uniqueness desc, size asc, combination).
pub fn page_results(
    conn: &Connection,
    run_id: i64,
    side: Side,
    offset: u64,
    limit: usize,
) -> Result<Vec<AnalysisResult>, StorageError> {
    let mut stmt = conn.prepare_cached(
        "SELECT run_id, side, combination, total_rows, unique_rows, duplicate_rows,
                duplicate_count, uniqueness_score, is_unique_key, is_sampled,
                sample_size, user_pinned
         FROM analysis_results
         WHERE run_id = ?1 AND side = ?2
         ORDER BY uniqueness_score DESC, json_array_length(combination) ASC, combination ASC
         LIMIT ?3 OFFSET ?4",
    )?;
    let rows = stmt.query_map(
        params![run_id, side.as_str(), limit as i64, offset as i64],
        map_result_row,
    )?;
    collect_rows(rows)
}

pub fn count_results(conn: &Connection, run_id: i64, side: Side) -> Result<u64, StorageError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM analysis_results WHERE run_id = ?1 AND side = ?2",
        params![run_id, side.as_str()],
        |row| row.get(0),
    )?;
    Ok(count as u64)
}

pub fn get_result(
    conn: &Connection,
    run_id: i64,
    side: Side,
    combination: &Combination,
) -> Result<Option<AnalysisResult>, StorageError> {
    let mut stmt = conn.prepare_cached(
        "SELECT run_id, side, combination, total_rows, unique_rows, duplicate_rows,
                duplicate_count, uniqueness_score, is_unique_key, is_sampled,
                sample_size, user_pinned
         FROM analysis_results
         WHERE run_id = ?1 AND side = ?2 AND combination_hash = ?3",
    )?;
    let mut rows = stmt.query(params![run_id, side.as_str(), combination.stable_hash()])?;
    match rows.next()? {
        Some(row) => Ok(Some(map_result_row(row)?)),
        None => Ok(None),
    }
}

fn map_result_row(row: &Row<'_>) -> rusqlite::Result<AnalysisResult> {
    let side_text: String = row.get(1)?;
    let combination_json = safe_str(row.get_ref(2)?, "[]");
    Ok(AnalysisResult {
        run_id: row.get(0)?,
        side: Side::parse(&side_text).unwrap_or(Side::A),
        combination: combination_from_json(&combination_json),
        total_rows: row.get::<_, i64>(3)? as u64,
        unique_rows: row.get::<_, i64>(4)? as u64,
        duplicate_rows: row.get::<_, i64>(5)? as u64,
        duplicate_count: row.get::<_, i64>(6)? as u64,
        uniqueness_score: row.get(7)?,
        is_unique_key: row.get(8)?,
        is_sampled: row.get(9)?,
        sample_size: row.get::<_, i64>(10)? as u64,
        user_pinned: row.get(11)?,
    })
}

fn collect_rows(
    rows: rusqlite::MappedRows<'_, impl FnMut(&Row<'_>) -> rusqlite::Result<AnalysisResult>>,
) -> Result<Vec<AnalysisResult>, StorageError> {
    let mut result = Vec::new();
    for row in rows {
        result.push(row?);
    }
    Ok(result)
}
