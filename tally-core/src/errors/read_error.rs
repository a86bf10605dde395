//! File-reading errors. All variants are fatal to the run.

use super::error_code::{self, TallyErrorCode};

#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("file not found: {path}")]
    FileNotFound { path: String },

    #[error("file unreadable: {path}: {message}")]
    Unreadable { path: String, message: String },

    #[error("file has no header row: {path}")]
    SchemaEmpty { path: String },

    #[error("I/O error reading {path}: {message}")]
    Io { path: String, message: String },
}

impl ReadError {
    pub fn io(path: &std::path::Path, e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::NotFound {
            ReadError::FileNotFound {
                path: path.display().to_string(),
            }
        } else {
            ReadError::Io {
                path: path.display().to_string(),
                message: e.to_string(),
            }
        }
    }
}

impl TallyErrorCode for ReadError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::FileNotFound { .. } => error_code::FILE_NOT_FOUND,
            Self::Unreadable { .. } => error_code::UNREADABLE,
            Self::SchemaEmpty { .. } => error_code::SCHEMA_EMPTY,
            Self::Io { .. } => error_code::IO,
        }
    }
}
