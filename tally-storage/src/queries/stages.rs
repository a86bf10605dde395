//! stages table queries.

use rusqlite::{params, Connection};
use tally_core::coerce::safe_str;
use tally_core::errors::StorageError;
use tally_core::types::run::{RunStage, StageKind, StageStatus};

pub fn get_stages(conn: &Connection, run_id: i64) -> Result<Vec<RunStage>, StorageError> {
    let mut stmt = conn.prepare_cached(
        "SELECT run_id, stage_order, kind, status, details, started_at, completed_at
         FROM stages WHERE run_id = ?1 ORDER BY stage_order",
    )?;
    let mut rows = stmt.query(params![run_id])?;
    let mut stages = Vec::new();
    while let Some(row) = rows.next()? {
        let kind_text = safe_str(row.get_ref(2)?, "");
        let status_text = safe_str(row.get_ref(3)?, "pending");
        let details = match row.get_ref(4)? {
            rusqlite::types::ValueRef::Null => None,
            v => Some(safe_str(v, "")),
        };
        let Some(kind) = StageKind::parse(&kind_text) else {
            tracing::warn!(run_id, kind = %kind_text, "unknown stage kind in store, skipping");
            continue;
        };
        stages.push(RunStage {
            run_id: row.get(0)?,
            stage_order: row.get(1)?,
            kind,
            status: StageStatus::parse(&status_text).unwrap_or(StageStatus::Pending),
            details,
            started_at: row.get(5)?,
            completed_at: row.get(6)?,
        });
    }
    Ok(stages)
}

pub fn stage_started(
    conn: &Connection,
    run_id: i64,
    kind: StageKind,
    at: i64,
) -> Result<(), StorageError> {
    conn.execute(
        "UPDATE stages SET status = 'in_progress', started_at = ?3
         WHERE run_id = ?1 AND kind = ?2",
        params![run_id, kind.as_str(), at],
    )?;
    Ok(())
}

pub fn stage_completed(
    conn: &Connection,
    run_id: i64,
    kind: StageKind,
    at: i64,
) -> Result<(), StorageError> {
    conn.execute(
        "UPDATE stages SET status = 'completed', completed_at = ?3
         WHERE run_id = ?1 AND kind = ?2",
        params![run_id, kind.as_str(), at],
    )?;
    Ok(())
}

pub fn stage_finished(
    conn: &Connection,
    run_id: i64,
    kind: StageKind,
    status: StageStatus,
    details: Option<&str>,
    at: i64,
) -> Result<(), StorageError> {
    conn.execute(
        "UPDATE stages SET status = ?3, details = COALESCE(?4, details), completed_at = ?5
         WHERE run_id = ?1 AND kind = ?2",
        params![run_id, kind.as_str(), status.as_str(), details, at],
    )?;
    Ok(())
}

/// Attach a note without touching status or timestamps. Appends to any
/// existing details.
pub fn stage_note(
    conn: &Connection,
    run_id: i64,
    kind: StageKind,
    details: &str,
) -> Result<(), StorageError> {
    conn.execute(
        "UPDATE stages SET details = CASE
            WHEN details IS NULL OR details = '' THEN ?3
            ELSE details || '; ' || ?3 END
         WHERE run_id = ?1 AND kind = ?2",
        params![run_id, kind.as_str(), details],
    )?;
    Ok(())
}
