//! Analysis, export, and cache errors.

use super::error_code::{self, TallyErrorCode};
use super::read_error::ReadError;

/// Errors from the scoring, discovery, and reconciliation components.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Read(#[from] ReadError),

    /// A parameter names something that does not exist or exceeds a
    /// bound. The message identifies the offending value.
    #[error("invalid parameter: {message}")]
    Parameter { message: String },

    /// The in-memory cap was hit and external mode also exhausted the
    /// configured temp budget.
    #[error("temp budget exhausted in external mode: {message}")]
    TempBudget { message: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("stage exceeded its wall-clock budget of {budget_secs}s")]
    Timeout { budget_secs: u64 },

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error("I/O error: {message}")]
    Io { message: String },
}

impl AnalysisError {
    pub fn parameter(message: impl Into<String>) -> Self {
        AnalysisError::Parameter {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for AnalysisError {
    fn from(e: std::io::Error) -> Self {
        AnalysisError::Io {
            message: e.to_string(),
        }
    }
}

impl TallyErrorCode for AnalysisError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Read(e) => e.error_code(),
            Self::Parameter { .. } => error_code::PARAMETER,
            Self::TempBudget { .. } => error_code::TEMP_BUDGET,
            Self::Cancelled => error_code::CANCELLED,
            Self::Timeout { .. } => error_code::TIMEOUT,
            Self::Export(e) => e.error_code(),
            Self::Io { .. } => error_code::IO,
        }
    }
}

/// Errors writing export chunks.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("export I/O error at {path}: {message}")]
    Io { path: String, message: String },

    #[error("export chunk row update failed: {message}")]
    ChunkRow { message: String },

    #[error("a completed export for this combination already exists")]
    AlreadyCompleted,

    #[error("export cancelled")]
    Cancelled,
}

impl TallyErrorCode for ExportError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Cancelled => error_code::CANCELLED,
            _ => error_code::EXPORT,
        }
    }
}

/// Errors reading or writing comparison cache artifacts.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache I/O error at {path}: {message}")]
    Io { path: String, message: String },

    #[error("cache entry corrupt at {path}: {message}")]
    Corrupt { path: String, message: String },
}

impl TallyErrorCode for CacheError {
    fn error_code(&self) -> &'static str {
        error_code::CACHE
    }
}
