//! Fan-out dispatcher over registered event handlers.

use std::sync::Arc;

use super::handler::TallyEventHandler;
use super::types::*;

/// Holds the registered handlers and fans each event out to all of
/// them, in registration order.
#[derive(Default, Clone)]
pub struct EventDispatcher {
    handlers: Vec<Arc<dyn TallyEventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn TallyEventHandler>) {
        self.handlers.push(handler);
    }

    pub fn run_started(&self, event: &RunStartedEvent) {
        for h in &self.handlers {
            h.on_run_started(event);
        }
    }

    pub fn stage_started(&self, event: &StageStartedEvent) {
        for h in &self.handlers {
            h.on_stage_started(event);
        }
    }

    pub fn stage_completed(&self, event: &StageCompletedEvent) {
        for h in &self.handlers {
            h.on_stage_completed(event);
        }
    }

    pub fn progress(&self, event: &ProgressEvent) {
        for h in &self.handlers {
            h.on_progress(event);
        }
    }

    pub fn reconcile_progress(&self, event: &ReconcileProgressEvent) {
        for h in &self.handlers {
            h.on_reconcile_progress(event);
        }
    }

    pub fn run_finished(&self, event: &RunFinishedEvent) {
        for h in &self.handlers {
            h.on_run_finished(event);
        }
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}
