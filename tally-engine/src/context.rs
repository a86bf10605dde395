//! Per-run in-memory state threaded through the stages.

use tally_analysis::discovery::CandidateSet;
use tally_analysis::reader::{FileProfile, Row};
use tally_core::types::results::AnalysisResult;
use tally_core::types::run::RunParams;
use tally_core::{Combination, RunCancellation};

/// Mutable state a run's stages build up. Owned by the worker thread
/// executing the run; never shared.
pub struct RunContext {
    pub run_id: i64,
    pub params: RunParams,
    pub cancellation: RunCancellation,

    // reading
    pub profile_a: Option<FileProfile>,
    pub profile_b: Option<FileProfile>,
    pub sample_a: Vec<Row>,
    pub sample_b: Vec<Row>,

    // validating
    pub pool: Vec<String>,

    // analyze
    pub candidates: Option<CandidateSet>,
    pub results_a: Vec<AnalysisResult>,
    pub results_b: Vec<AnalysisResult>,

    // storing
    pub selected: Vec<Combination>,
}

impl RunContext {
    pub fn new(run_id: i64, params: RunParams, cancellation: RunCancellation) -> Self {
        Self {
            run_id,
            params,
            cancellation,
            profile_a: None,
            profile_b: None,
            sample_a: Vec::new(),
            sample_b: Vec::new(),
            pool: Vec::new(),
            candidates: None,
            results_a: Vec::new(),
            results_b: Vec::new(),
            selected: Vec::new(),
        }
    }

    pub fn profile_a(&self) -> &FileProfile {
        self.profile_a.as_ref().expect("reading stage ran")
    }

    pub fn profile_b(&self) -> &FileProfile {
        self.profile_b.as_ref().expect("reading stage ran")
    }

    /// The side with fewer (estimated) rows; promise scores and sample
    /// uniqueness are taken from it.
    pub fn smaller_side_is_a(&self) -> bool {
        self.profile_a().row_count_estimate <= self.profile_b().row_count_estimate
    }
}
