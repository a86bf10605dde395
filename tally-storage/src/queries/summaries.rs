//! comparison_summaries table queries.

use rusqlite::{params, Connection, Row};
use tally_core::coerce::safe_str;
use tally_core::errors::StorageError;
use tally_core::types::results::ComparisonSummary;
use tally_core::Combination;

use super::{combination_from_json, combination_to_json};

pub fn upsert_summary(conn: &Connection, summary: &ComparisonSummary) -> Result<(), StorageError> {
    conn.execute(
        "INSERT INTO comparison_summaries
         (run_id, combination_hash, combination, matched, only_a, only_b,
          total_a, total_b, generated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(run_id, combination_hash) DO UPDATE SET
            combination = excluded.combination,
            matched = excluded.matched,
            only_a = excluded.only_a,
            only_b = excluded.only_b,
            total_a = excluded.total_a,
            total_b = excluded.total_b,
            generated_at = excluded.generated_at",
        params![
            summary.run_id,
            summary.combination.stable_hash(),
            combination_to_json(&summary.combination),
            summary.matched as i64,
            summary.only_a as i64,
            summary.only_b as i64,
            summary.total_a as i64,
            summary.total_b as i64,
            summary.generated_at,
        ],
    )?;
    Ok(())
}

pub fn get_summary(
    conn: &Connection,
    run_id: i64,
    combination: &Combination,
) -> Result<Option<ComparisonSummary>, StorageError> {
    let mut stmt = conn.prepare_cached(
        "SELECT run_id, combination, matched, only_a, only_b, total_a, total_b, generated_at
         FROM comparison_summaries WHERE run_id = ?1 AND combination_hash = ?2",
    )?;
    let mut rows = stmt.query(params![run_id, combination.stable_hash()])?;
    match rows.next()? {
        Some(row) => Ok(Some(map_summary_row(row)?)),
        None => Ok(None),
    }
}

pub fn list_summaries(
    conn: &Connection,
    run_id: i64,
) -> Result<Vec<ComparisonSummary>, StorageError> {
    let mut stmt = conn.prepare_cached(
        "SELECT run_id, combination, matched, only_a, only_b, total_a, total_b, generated_at
         FROM comparison_summaries WHERE run_id = ?1 ORDER BY combination",
    )?;
    let rows = stmt.query_map(params![run_id], map_summary_row)?;
    let mut result = Vec::new();
    for row in rows {
        result.push(row?);
    }
    Ok(result)
}

fn map_summary_row(row: &Row<'_>) -> rusqlite::Result<ComparisonSummary> {
    let combination_json = safe_str(row.get_ref(1)?, "[]");
    Ok(ComparisonSummary {
        run_id: row.get(0)?,
        combination: combination_from_json(&combination_json),
        matched: row.get::<_, i64>(2)? as u64,
        only_a: row.get::<_, i64>(3)? as u64,
        only_b: row.get::<_, i64>(4)? as u64,
        total_a: row.get::<_, i64>(5)? as u64,
        total_b: row.get::<_, i64>(6)? as u64,
        generated_at: row.get(7)?,
    })
}
