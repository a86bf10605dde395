//! Route table.

mod compare;
mod comparison;
mod export;
mod results;
mod status;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/compare", post(compare::submit))
        .route("/api/status/:run_id", get(status::status))
        .route("/api/cancel/:run_id", post(status::cancel))
        .route("/api/run/:run_id", get(results::page))
        .route(
            "/api/comparison-v2/:run_id/available",
            get(comparison::available),
        )
        .route(
            "/api/comparison-v2/:run_id/summary",
            get(comparison::summary),
        )
        .route("/api/comparison-v2/:run_id/data", get(comparison::data))
        .route(
            "/api/comparison-export/:run_id/status",
            get(export::status),
        )
        .route("/api/comparison-export/:run_id/data", get(export::data))
        .route(
            "/api/comparison-export/:run_id/generate",
            post(export::generate),
        )
        .with_state(state)
}
