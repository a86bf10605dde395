//! Export chunk endpoints: chunk listing, full-export pagination, and
//! on-demand generation.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tally_core::traits::{IComparisons, IExportChunks};
use tally_core::types::results::ExportCategory;

use super::comparison::parse_columns;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ColumnsQuery {
    pub columns: String,
}

#[derive(Debug, Deserialize)]
pub struct DataQuery {
    pub columns: String,
    pub category: String,
    #[serde(default)]
    pub offset: u64,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    1_000
}

/// GET /api/comparison-export/{run_id}/status?columns=
pub async fn status(
    State(state): State<AppState>,
    Path(run_id): Path<i64>,
    Query(query): Query<ColumnsQuery>,
) -> Result<Json<Value>, ApiError> {
    let combination = parse_columns(&query.columns)?;
    let hash = combination.stable_hash();
    let chunks = state.store.all_chunks(run_id, &hash)?;
    let completed = state.store.get_summary(run_id, &combination)?.is_some();

    let files: Vec<Value> = chunks
        .iter()
        .map(|c| {
            json!({
                "category": c.category.as_str(),
                "chunk_index": c.chunk_index,
                "row_count": c.row_count,
                "byte_size": c.byte_size,
                "path": c.path,
                "status": c.status.as_str(),
            })
        })
        .collect();

    Ok(Json(json!({
        "run_id": run_id,
        "columns": combination.columns(),
        "combination_hash": hash,
        "completed": completed,
        "chunks": files,
    })))
}

/// GET /api/comparison-export/{run_id}/data?columns=&category=&offset=&limit=
pub async fn data(
    State(state): State<AppState>,
    Path(run_id): Path<i64>,
    Query(query): Query<DataQuery>,
) -> Result<Json<Value>, ApiError> {
    let combination = parse_columns(&query.columns)?;
    let category = ExportCategory::parse(&query.category)
        .ok_or_else(|| ApiError::bad_request(format!("invalid category '{}'", query.category)))?;

    let chunks = state
        .store
        .completed_chunks(run_id, &combination.stable_hash(), category)?;
    let total: u64 = chunks.iter().map(|c| c.row_count).sum();
    let rows = tally_analysis::export::read_category_page(&chunks, query.offset, query.limit)
        .map_err(|e| {
            tracing::error!(run_id, error = %e, "chunk read failed");
            ApiError::internal("chunk read failed")
        })?;
    let header = match chunks.first() {
        Some(chunk) => {
            tally_analysis::export::read_chunk_header(std::path::Path::new(&chunk.path))
                .unwrap_or_default()
        }
        None => Vec::new(),
    };

    Ok(Json(json!({
        "run_id": run_id,
        "category": category.as_str(),
        "offset": query.offset,
        "limit": query.limit,
        "total": total,
        "header": header,
        "rows": rows,
    })))
}

/// POST /api/comparison-export/{run_id}/generate?columns=
///
/// Ensures a reconciliation exists for the combination. Idempotent: a
/// completed pair is left untouched.
pub async fn generate(
    State(state): State<AppState>,
    Path(run_id): Path<i64>,
    Query(query): Query<ColumnsQuery>,
) -> Result<Json<Value>, ApiError> {
    let combination = parse_columns(&query.columns)?;
    let already = state.store.get_summary(run_id, &combination)?.is_some();
    if !already {
        state.runner.generate_export(run_id, combination.clone())?;
    }
    Ok(Json(json!({
        "run_id": run_id,
        "columns": combination.columns(),
        "status": if already { "completed" } else { "accepted" },
    })))
}
