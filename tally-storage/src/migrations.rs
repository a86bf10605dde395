//! Versioned schema migrations, tracked with `PRAGMA user_version`.

use rusqlite::Connection;
use tally_core::errors::StorageError;

/// Each entry is one migration; the index + 1 is its version.
const MIGRATIONS: &[&str] = &[
    // v1: core schema.
    "
    CREATE TABLE runs (
        run_id INTEGER PRIMARY KEY AUTOINCREMENT,
        file_a TEXT NOT NULL,
        file_b TEXT NOT NULL,
        num_columns INTEGER NOT NULL,
        expected_combinations TEXT NOT NULL DEFAULT '[]',
        excluded_combinations TEXT NOT NULL DEFAULT '[]',
        max_rows INTEGER NOT NULL DEFAULT 0,
        data_quality_check INTEGER NOT NULL DEFAULT 0,
        use_intelligent_discovery INTEGER NOT NULL DEFAULT 0,
        status TEXT NOT NULL DEFAULT 'queued',
        current_stage TEXT,
        progress INTEGER NOT NULL DEFAULT 0,
        error_message TEXT,
        column_pool TEXT,
        quality_report TEXT,
        created_at INTEGER NOT NULL,
        started_at INTEGER,
        completed_at INTEGER
    );

    CREATE TABLE stages (
        run_id INTEGER NOT NULL REFERENCES runs(run_id) ON DELETE CASCADE,
        stage_order INTEGER NOT NULL,
        kind TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        details TEXT,
        started_at INTEGER,
        completed_at INTEGER,
        PRIMARY KEY (run_id, stage_order)
    );

    CREATE TABLE analysis_results (
        run_id INTEGER NOT NULL REFERENCES runs(run_id) ON DELETE CASCADE,
        side TEXT NOT NULL,
        combination_hash TEXT NOT NULL,
        combination TEXT NOT NULL,
        total_rows INTEGER NOT NULL,
        unique_rows INTEGER NOT NULL,
        duplicate_rows INTEGER NOT NULL,
        duplicate_count INTEGER NOT NULL,
        uniqueness_score REAL NOT NULL,
        is_unique_key INTEGER NOT NULL,
        is_sampled INTEGER NOT NULL,
        sample_size INTEGER NOT NULL,
        user_pinned INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (run_id, side, combination_hash)
    );
    CREATE INDEX idx_results_run_side_score
        ON analysis_results(run_id, side, uniqueness_score DESC);

    CREATE TABLE comparison_summaries (
        run_id INTEGER NOT NULL REFERENCES runs(run_id) ON DELETE CASCADE,
        combination_hash TEXT NOT NULL,
        combination TEXT NOT NULL,
        matched INTEGER NOT NULL,
        only_a INTEGER NOT NULL,
        only_b INTEGER NOT NULL,
        total_a INTEGER NOT NULL,
        total_b INTEGER NOT NULL,
        generated_at INTEGER NOT NULL,
        PRIMARY KEY (run_id, combination_hash)
    );

    CREATE TABLE export_chunks (
        run_id INTEGER NOT NULL REFERENCES runs(run_id) ON DELETE CASCADE,
        combination_hash TEXT NOT NULL,
        category TEXT NOT NULL,
        chunk_index INTEGER NOT NULL,
        row_count INTEGER NOT NULL DEFAULT 0,
        byte_size INTEGER NOT NULL DEFAULT 0,
        path TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'writing',
        PRIMARY KEY (run_id, combination_hash, category, chunk_index)
    );
    CREATE INDEX idx_chunks_completed
        ON export_chunks(run_id, combination_hash, category, status);
    ",
];

/// Apply any outstanding migrations.
pub fn migrate(conn: &Connection) -> Result<(), StorageError> {
    let current: u32 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(StorageError::from)?;

    for (i, sql) in MIGRATIONS.iter().enumerate() {
        let version = i as u32 + 1;
        if version <= current {
            continue;
        }
        conn.execute_batch(sql)
            .map_err(|e| StorageError::MigrationFailed {
                version,
                message: e.to_string(),
            })?;
        conn.pragma_update(None, "user_version", version)
            .map_err(|e| StorageError::MigrationFailed {
                version,
                message: e.to_string(),
            })?;
        tracing::debug!(version, "applied schema migration");
    }
    Ok(())
}

/// The schema version this build expects.
pub fn expected_version() -> u32 {
    MIGRATIONS.len() as u32
}
