//! Storage-layer errors for SQLite operations.

use super::error_code::{self, TallyErrorCode};

/// Errors that can occur in the storage layer.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("SQLite error: {message}")]
    SqliteError { message: String },

    #[error("migration failed at version {version}: {message}")]
    MigrationFailed { version: u32, message: String },

    #[error("database busy (another operation in progress)")]
    DbBusy,

    #[error("run {run_id} not found")]
    RunNotFound { run_id: i64 },

    /// A compare-and-swap status transition found a different current
    /// status than expected.
    #[error("run {run_id} status conflict: expected {expected}, found {found}")]
    StatusConflict {
        run_id: i64,
        expected: String,
        found: String,
    },

    #[error("data directory locked by another process: {path}")]
    DirLocked { path: String },
}

impl StorageError {
    pub fn sqlite(e: impl std::fmt::Display) -> Self {
        StorageError::SqliteError {
            message: e.to_string(),
        }
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::SqliteFailure(f, _)
                if f.code == rusqlite::ErrorCode::DatabaseBusy =>
            {
                StorageError::DbBusy
            }
            other => StorageError::sqlite(other),
        }
    }
}

impl TallyErrorCode for StorageError {
    fn error_code(&self) -> &'static str {
        error_code::STORAGE
    }
}
