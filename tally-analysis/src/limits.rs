//! Wall-clock and checkpoint plumbing shared by the streaming
//! components.

use std::time::Instant;

use tally_core::errors::AnalysisError;
use tally_core::RunCancellation;

/// A stage's wall-clock budget.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    pub at: Instant,
    pub budget_secs: u64,
}

impl Deadline {
    pub fn after_secs(budget_secs: u64) -> Self {
        Self {
            at: Instant::now() + std::time::Duration::from_secs(budget_secs),
            budget_secs,
        }
    }

    pub fn exceeded(&self) -> bool {
        Instant::now() >= self.at
    }
}

/// Cooperative checkpoint: cancellation first, then the deadline.
pub fn checkpoint(
    cancellation: &RunCancellation,
    deadline: Option<&Deadline>,
) -> Result<(), AnalysisError> {
    if cancellation.is_cancelled() {
        return Err(AnalysisError::Cancelled);
    }
    if let Some(d) = deadline {
        if d.exceeded() {
            return Err(AnalysisError::Timeout {
                budget_secs: d.budget_secs,
            });
        }
    }
    Ok(())
}
