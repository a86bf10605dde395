//! Shared handler state.

use std::sync::Arc;

use tally_analysis::cache::ComparisonCache;
use tally_core::EngineConfig;
use tally_engine::JobRunner;
use tally_storage::TallyStorageEngine;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<TallyStorageEngine>,
    pub cache: Arc<ComparisonCache>,
    pub runner: Arc<JobRunner>,
    pub config: Arc<EngineConfig>,
}
