//! Paginated analysis results.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tally_core::traits::{IAnalysisResults, IRuns};
use tally_core::types::side::Side;
use tally_storage::pagination;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_side")]
    pub side: String,
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_side() -> String {
    "A".to_string()
}
fn default_page() -> u64 {
    1
}
fn default_page_size() -> usize {
    100
}

/// GET /api/run/{run_id}?side=A|B&page=&page_size=
pub async fn page(
    State(state): State<AppState>,
    Path(run_id): Path<i64>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Value>, ApiError> {
    let side = Side::parse(&query.side)
        .ok_or_else(|| ApiError::bad_request(format!("invalid side '{}'", query.side)))?;
    if state.store.get_run(run_id)?.is_none() {
        return Err(ApiError::not_found(format!("run {run_id} not found")));
    }

    let (offset, limit) = pagination::page_bounds(query.page, query.page_size);
    let total = state.store.count_results(run_id, side)?;
    let results = state.store.page_results(run_id, side, offset, limit)?;

    let rows: Vec<Value> = results
        .iter()
        .map(|r| {
            json!({
                "combination": r.combination.columns(),
                "display": r.combination.display(),
                "total_rows": r.total_rows,
                "unique_rows": r.unique_rows,
                "duplicate_rows": r.duplicate_rows,
                "duplicate_count": r.duplicate_count,
                "uniqueness_score": r.uniqueness_score,
                "is_unique_key": r.is_unique_key,
                "is_sampled": r.is_sampled,
                "sample_size": r.sample_size,
                "user_pinned": r.user_pinned,
            })
        })
        .collect();

    Ok(Json(json!({
        "run_id": run_id,
        "side": side.as_str(),
        "page": query.page.max(1),
        "page_size": limit,
        "total": total,
        "total_pages": pagination::page_count(total, limit),
        "results": rows,
    })))
}
