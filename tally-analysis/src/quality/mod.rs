//! Pluggable data-quality pre-stage.
//!
//! The run calls whatever profiler is installed; the default reports
//! header problems and per-column null rates from the profiling
//! sample. Profiler failures downgrade to a stage note — they never
//! fail the run.

use serde_json::{json, Value};
use tally_core::errors::AnalysisError;
use tally_core::types::side::Side;
use tally_core::FxHashSet;

use crate::reader::{FileProfile, Row};

/// A data-quality profiler for one submitted run.
pub trait QualityProfiler: Send + Sync {
    /// Produce a JSON report over both sides' profiles and samples.
    fn profile(
        &self,
        profile_a: &FileProfile,
        sample_a: &[Row],
        profile_b: &FileProfile,
        sample_b: &[Row],
    ) -> Result<Value, AnalysisError>;
}

/// The default profiler.
#[derive(Debug, Default, Clone, Copy)]
pub struct BasicQualityProfiler;

impl QualityProfiler for BasicQualityProfiler {
    fn profile(
        &self,
        profile_a: &FileProfile,
        sample_a: &[Row],
        profile_b: &FileProfile,
        sample_b: &[Row],
    ) -> Result<Value, AnalysisError> {
        Ok(json!({
            "a": side_report(Side::A, profile_a, sample_a),
            "b": side_report(Side::B, profile_b, sample_b),
        }))
    }
}

fn side_report(side: Side, profile: &FileProfile, sample: &[Row]) -> Value {
    let mut duplicate_headers: Vec<&str> = Vec::new();
    let mut seen: FxHashSet<&str> = FxHashSet::default();
    for name in &profile.header {
        if !seen.insert(name.as_str()) {
            duplicate_headers.push(name.as_str());
        }
    }
    let blank_headers = profile.header.iter().filter(|h| h.trim().is_empty()).count();

    let null_rates: Vec<Value> = profile
        .header
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let nulls = sample
                .iter()
                .filter(|row| row.get(i).map(|v| v.is_empty()).unwrap_or(true))
                .count();
            let rate = if sample.is_empty() {
                0.0
            } else {
                nulls as f64 / sample.len() as f64
            };
            json!({ "column": name, "null_rate": rate })
        })
        .collect();

    json!({
        "side": side.as_str(),
        "path": profile.path.display().to_string(),
        "row_count_estimate": profile.row_count_estimate,
        "estimated": profile.estimated,
        "column_count": profile.header.len(),
        "duplicate_headers": duplicate_headers,
        "blank_headers": blank_headers,
        "sampled_rows": sample.len(),
        "columns": null_rates,
    })
}
