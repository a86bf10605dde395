//! Event payloads.

use crate::types::run::{RunStatus, StageKind};

#[derive(Debug, Clone)]
pub struct RunStartedEvent {
    pub run_id: i64,
}

#[derive(Debug, Clone)]
pub struct StageStartedEvent {
    pub run_id: i64,
    pub stage: StageKind,
}

#[derive(Debug, Clone)]
pub struct StageCompletedEvent {
    pub run_id: i64,
    pub stage: StageKind,
    pub duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub run_id: i64,
    pub stage: StageKind,
    pub progress: u8,
}

/// Emitted periodically while a reconciliation streams.
#[derive(Debug, Clone)]
pub struct ReconcileProgressEvent {
    pub run_id: i64,
    pub combination_hash: String,
    pub rows_processed: u64,
}

/// The completion hook. Fired exactly once per run reaching a terminal
/// status, with that status.
#[derive(Debug, Clone)]
pub struct RunFinishedEvent {
    pub run_id: i64,
    pub status: RunStatus,
    pub error_message: Option<String>,
    pub duration_ms: u64,
}
