//! POST /compare — submit a run.

use axum::extract::{Form, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tally_core::types::run::RunParams;
use tally_core::Combination;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CompareForm {
    pub file_a: String,
    pub file_b: String,
    pub num_columns: usize,
    #[serde(default)]
    pub expected_combinations: String,
    #[serde(default)]
    pub excluded_combinations: String,
    #[serde(default)]
    pub max_rows: u64,
    #[serde(default)]
    pub data_quality_check: Option<String>,
    #[serde(default)]
    pub use_intelligent_discovery: Option<String>,
}

/// Form checkboxes arrive as "true"/"on"/"1" when set.
fn form_bool(value: &Option<String>) -> bool {
    matches!(
        value.as_deref().map(str::to_ascii_lowercase).as_deref(),
        Some("true") | Some("on") | Some("1") | Some("yes")
    )
}

/// One combination per line, columns comma-separated.
fn parse_combinations(text: &str) -> Vec<Combination> {
    text.lines().filter_map(Combination::parse).collect()
}

pub async fn submit(
    State(state): State<AppState>,
    Form(form): Form<CompareForm>,
) -> Result<Json<Value>, ApiError> {
    if form.num_columns == 0 {
        return Err(ApiError::bad_request("num_columns must be at least 1"));
    }

    let params = RunParams {
        file_a: form.file_a,
        file_b: form.file_b,
        num_columns: form.num_columns,
        expected_combinations: parse_combinations(&form.expected_combinations),
        excluded_combinations: parse_combinations(&form.excluded_combinations),
        max_rows: form.max_rows,
        data_quality_check: form_bool(&form.data_quality_check),
        use_intelligent_discovery: form_bool(&form.use_intelligent_discovery),
    };

    let run_id = state.runner.submit(params)?;
    Ok(Json(json!({ "run_id": run_id })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn form_bools_accept_the_usual_spellings() {
        assert!(form_bool(&Some("true".into())));
        assert!(form_bool(&Some("On".into())));
        assert!(form_bool(&Some("1".into())));
        assert!(!form_bool(&Some("false".into())));
        assert!(!form_bool(&None));
    }

    #[test]
    fn combinations_parse_one_per_line() {
        let parsed = parse_combinations("id\ndept, role\n\n");
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1], Combination::new(["dept", "role"]));
    }
}
