//! Status polling and cancellation.

use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};
use tally_core::traits::{IRuns, IStages};

use crate::error::ApiError;
use crate::state::AppState;

/// GET /api/status/{run_id}
pub async fn status(
    State(state): State<AppState>,
    Path(run_id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let run = state
        .store
        .get_run(run_id)?
        .ok_or_else(|| ApiError::not_found(format!("run {run_id} not found")))?;
    let stages = state.store.get_stages(run_id)?;

    let stage_list: Vec<Value> = stages
        .iter()
        .map(|s| {
            json!({
                "name": s.kind.as_str(),
                "status": s.status.as_str(),
                "details": s.details,
                "started_at": s.started_at,
                "completed_at": s.completed_at,
            })
        })
        .collect();

    Ok(Json(json!({
        "run_id": run.run_id,
        "status": run.status.as_str(),
        "current_stage": run.current_stage.map(|s| s.as_str()),
        "progress": run.progress,
        "created_at": run.created_at,
        "started_at": run.started_at,
        "completed_at": run.completed_at,
        "error_message": run.error_message,
        "quality_report": run.quality_report,
        "column_pool": run.column_pool,
        "stages": stage_list,
    })))
}

/// POST /api/cancel/{run_id}
pub async fn cancel(
    State(state): State<AppState>,
    Path(run_id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let status = state.runner.cancel(run_id)?;
    Ok(Json(json!({ "run_id": run_id, "status": status.as_str() })))
}
