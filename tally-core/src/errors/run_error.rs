//! Run-level errors recorded by the job runner.

use super::analysis_error::AnalysisError;
use super::error_code::{self, TallyErrorCode};
use super::read_error::ReadError;
use super::storage_error::StorageError;

/// Everything that can end a stage. The runner classifies variants into
/// recoverable (retried with backoff) and unrecoverable (stage fails).
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Read(#[from] ReadError),

    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("run cancelled")]
    Cancelled,

    #[error("stage '{stage}' exceeded its wall-clock budget of {budget_secs}s")]
    StageTimeout { stage: String, budget_secs: u64 },

    #[error("worker pool is shut down")]
    PoolShutdown,
}

impl RunError {
    /// Transient failures worth retrying: database contention and plain
    /// I/O hiccups. Input, parameter, schema, cancellation, and timeout
    /// failures are never retried.
    pub fn is_recoverable(&self) -> bool {
        match self {
            RunError::Storage(StorageError::DbBusy) => true,
            RunError::Analysis(AnalysisError::Io { .. }) => true,
            RunError::Read(ReadError::Io { .. }) => true,
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            RunError::Cancelled | RunError::Analysis(AnalysisError::Cancelled)
        )
    }
}

impl TallyErrorCode for RunError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Read(e) => e.error_code(),
            Self::Analysis(e) => e.error_code(),
            Self::Storage(e) => e.error_code(),
            Self::Cancelled => error_code::CANCELLED,
            Self::StageTimeout { .. } => error_code::TIMEOUT,
            Self::PoolShutdown => error_code::RUN,
        }
    }
}
