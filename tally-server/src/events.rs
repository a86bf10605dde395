//! Event handler that writes run lifecycle events to the log. External
//! collaborators (notifications, audit sinks, schedulers) install their
//! own handlers next to this one.

use tally_core::events::types::*;
use tally_core::TallyEventHandler;

pub struct LoggingHandler;

impl TallyEventHandler for LoggingHandler {
    fn on_run_started(&self, event: &RunStartedEvent) {
        tracing::info!(run_id = event.run_id, "run started");
    }

    fn on_stage_completed(&self, event: &StageCompletedEvent) {
        tracing::info!(
            run_id = event.run_id,
            stage = %event.stage,
            duration_ms = event.duration_ms,
            "stage completed"
        );
    }

    fn on_progress(&self, event: &ProgressEvent) {
        tracing::debug!(
            run_id = event.run_id,
            stage = %event.stage,
            progress = event.progress,
            "progress"
        );
    }

    fn on_reconcile_progress(&self, event: &ReconcileProgressEvent) {
        tracing::debug!(
            run_id = event.run_id,
            combination = %event.combination_hash,
            rows = event.rows_processed,
            "reconciliation progress"
        );
    }

    fn on_run_finished(&self, event: &RunFinishedEvent) {
        match event.status {
            tally_core::types::run::RunStatus::Completed => {
                tracing::info!(
                    run_id = event.run_id,
                    duration_ms = event.duration_ms,
                    "run completed"
                );
            }
            status => {
                tracing::warn!(
                    run_id = event.run_id,
                    status = status.as_str(),
                    error = event.error_message.as_deref().unwrap_or(""),
                    "run finished without completing"
                );
            }
        }
    }
}
