//! runs table queries.

use rusqlite::{params, Connection};
use tally_core::coerce::{safe_int, safe_str};
use tally_core::errors::StorageError;
use tally_core::types::run::{Run, RunParams, RunStatus, StageKind};

use super::{combination_list_from_json, combination_list_to_json};

/// Insert a run plus its pending stages in one transaction. Returns the
/// new run id.
pub fn create_run(
    conn: &Connection,
    params_in: &RunParams,
    stages: &[StageKind],
    created_at: i64,
) -> Result<i64, StorageError> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO runs
         (file_a, file_b, num_columns, expected_combinations, excluded_combinations,
          max_rows, data_quality_check, use_intelligent_discovery, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'queued', ?9)",
        params![
            params_in.file_a,
            params_in.file_b,
            params_in.num_columns as i64,
            combination_list_to_json(&params_in.expected_combinations),
            combination_list_to_json(&params_in.excluded_combinations),
            params_in.max_rows as i64,
            params_in.data_quality_check,
            params_in.use_intelligent_discovery,
            created_at,
        ],
    )?;
    let run_id = tx.last_insert_rowid();

    {
        let mut stmt = tx.prepare_cached(
            "INSERT INTO stages (run_id, stage_order, kind, status)
             VALUES (?1, ?2, ?3, 'pending')",
        )?;
        for (order, kind) in stages.iter().enumerate() {
            stmt.execute(params![run_id, order as i64, kind.as_str()])?;
        }
    }

    tx.commit()?;
    Ok(run_id)
}

pub fn get_run(conn: &Connection, run_id: i64) -> Result<Option<Run>, StorageError> {
    let mut stmt = conn.prepare_cached(
        "SELECT run_id, file_a, file_b, num_columns, expected_combinations,
                excluded_combinations, max_rows, data_quality_check,
                use_intelligent_discovery, status, current_stage, progress,
                error_message, column_pool, quality_report,
                created_at, started_at, completed_at
         FROM runs WHERE run_id = ?1",
    )?;

    let mut rows = stmt.query(params![run_id])?;
    let Some(row) = rows.next()? else {
        return Ok(None);
    };

    // Text fields tolerate stored corruption: blobs decode lossily,
    // nulls coerce to defaults, and user requests never fail on them.
    let status_text = safe_str(row.get_ref(9)?, "error");
    let current_stage = match row.get_ref(10)? {
        rusqlite::types::ValueRef::Null => None,
        v => StageKind::parse(&safe_str(v, "")),
    };
    let error_message = match row.get_ref(12)? {
        rusqlite::types::ValueRef::Null => None,
        v => Some(safe_str(v, "")),
    };
    let column_pool = match row.get_ref(13)? {
        rusqlite::types::ValueRef::Null => None,
        v => serde_json::from_str::<Vec<String>>(&safe_str(v, "[]")).ok(),
    };
    let quality_report = match row.get_ref(14)? {
        rusqlite::types::ValueRef::Null => None,
        v => serde_json::from_str::<serde_json::Value>(&safe_str(v, "null")).ok(),
    };

    Ok(Some(Run {
        run_id: row.get(0)?,
        params: RunParams {
            file_a: safe_str(row.get_ref(1)?, ""),
            file_b: safe_str(row.get_ref(2)?, ""),
            num_columns: safe_int(row.get_ref(3)?, 0) as usize,
            expected_combinations: combination_list_from_json(&safe_str(row.get_ref(4)?, "[]")),
            excluded_combinations: combination_list_from_json(&safe_str(row.get_ref(5)?, "[]")),
            max_rows: safe_int(row.get_ref(6)?, 0) as u64,
            data_quality_check: safe_int(row.get_ref(7)?, 0) != 0,
            use_intelligent_discovery: safe_int(row.get_ref(8)?, 0) != 0,
        },
        status: RunStatus::parse(&status_text).unwrap_or(RunStatus::Error),
        current_stage,
        progress: safe_int(row.get_ref(11)?, 0).clamp(0, 100) as u8,
        error_message,
        column_pool,
        quality_report,
        created_at: row.get(15)?,
        started_at: row.get(16)?,
        completed_at: row.get(17)?,
    }))
}

/// Compare-and-swap status transition. Also stamps `started_at` when
/// entering `running` and `completed_at` when entering a terminal
/// state. Returns whether this call won the transition.
pub fn cas_status(
    conn: &Connection,
    run_id: i64,
    from: RunStatus,
    to: RunStatus,
    at: i64,
) -> Result<bool, StorageError> {
    let affected = conn.execute(
        "UPDATE runs SET
            status = ?3,
            started_at = CASE WHEN ?3 = 'running' THEN COALESCE(started_at, ?4)
                              ELSE started_at END,
            completed_at = CASE WHEN ?3 IN ('completed', 'error', 'cancelled') THEN ?4
                                ELSE completed_at END
         WHERE run_id = ?1 AND status = ?2",
        params![run_id, from.as_str(), to.as_str(), at],
    )?;
    Ok(affected > 0)
}

/// Progress only moves forward; a stale writer can never regress it.
pub fn set_progress(
    conn: &Connection,
    run_id: i64,
    progress: u8,
    current_stage: StageKind,
) -> Result<(), StorageError> {
    conn.execute(
        "UPDATE runs SET progress = MAX(progress, ?2), current_stage = ?3
         WHERE run_id = ?1",
        params![run_id, progress as i64, current_stage.as_str()],
    )?;
    Ok(())
}

pub fn set_error_message(
    conn: &Connection,
    run_id: i64,
    message: &str,
) -> Result<(), StorageError> {
    conn.execute(
        "UPDATE runs SET error_message = ?2 WHERE run_id = ?1",
        params![run_id, message],
    )?;
    Ok(())
}

pub fn set_column_pool(
    conn: &Connection,
    run_id: i64,
    pool: &[String],
) -> Result<(), StorageError> {
    let json = serde_json::to_string(pool).expect("column names serialize");
    conn.execute(
        "UPDATE runs SET column_pool = ?2 WHERE run_id = ?1",
        params![run_id, json],
    )?;
    Ok(())
}

pub fn set_quality_report(
    conn: &Connection,
    run_id: i64,
    report: &serde_json::Value,
) -> Result<(), StorageError> {
    conn.execute(
        "UPDATE runs SET quality_report = ?2 WHERE run_id = ?1",
        params![run_id, report.to_string()],
    )?;
    Ok(())
}

/// Terminal runs created before the cutoff — retention candidates.
pub fn list_expired(conn: &Connection, cutoff: i64) -> Result<Vec<i64>, StorageError> {
    let mut stmt = conn.prepare_cached(
        "SELECT run_id FROM runs
         WHERE created_at < ?1 AND status IN ('completed', 'error', 'cancelled')
         ORDER BY run_id",
    )?;
    let rows = stmt.query_map(params![cutoff], |row| row.get(0))?;
    let mut ids = Vec::new();
    for id in rows {
        ids.push(id?);
    }
    Ok(ids)
}

/// Remove the run row; dependent rows cascade.
pub fn delete_run(conn: &Connection, run_id: i64) -> Result<(), StorageError> {
    conn.execute("DELETE FROM runs WHERE run_id = ?1", params![run_id])?;
    Ok(())
}
