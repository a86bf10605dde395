//! BatchCommand enum — write operations that can be batched.

use tally_core::types::results::{AnalysisResult, ComparisonSummary};

/// A command sent to the batch writer thread.
#[derive(Debug)]
pub enum BatchCommand {
    /// Upsert analysis result rows.
    UpsertResults(Vec<AnalysisResult>),
    /// Upsert a comparison summary.
    UpsertSummary(Box<ComparisonSummary>),
    /// Flush any pending writes immediately (fire-and-forget).
    Flush,
    /// Flush and signal completion via the provided sender (synchronous).
    FlushSync(std::sync::mpsc::SyncSender<()>),
    /// Shut down the writer thread.
    Shutdown,
}
