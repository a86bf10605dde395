//! The event handler trait.

use super::types::*;

/// Observer for run lifecycle events. All methods default to no-ops so
/// handlers implement only what they need.
pub trait TallyEventHandler: Send + Sync {
    fn on_run_started(&self, _event: &RunStartedEvent) {}
    fn on_stage_started(&self, _event: &StageStartedEvent) {}
    fn on_stage_completed(&self, _event: &StageCompletedEvent) {}
    fn on_progress(&self, _event: &ProgressEvent) {}
    fn on_reconcile_progress(&self, _event: &ReconcileProgressEvent) {}
    /// Completion hook: fired once per run reaching a terminal status.
    fn on_run_finished(&self, _event: &RunFinishedEvent) {}
}

/// Handler that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventHandler;

impl TallyEventHandler for NoopEventHandler {}
