//! Comparison cache endpoints: available combinations, counts, and
//! sample/export-backed data pages. Served from the cache and chunk
//! files only — source files are never touched here.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tally_core::traits::{IComparisons, IExportChunks};
use tally_core::types::results::{CacheEntry, ExportCategory};
use tally_core::Combination;

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
    100
}

pub(crate) fn parse_columns(columns: &str) -> Result<Combination, ApiError> {
    Combination::parse(columns)
        .ok_or_else(|| ApiError::bad_request("columns parameter must name at least one column"))
}

fn summary_json(entry: &CacheEntry) -> Value {
    let s = &entry.summary;
    json!({
        "columns": s.combination.columns(),
        "display": s.combination.display(),
        "combination_hash": s.combination.stable_hash(),
        "matched": s.matched,
        "only_a": s.only_a,
        "only_b": s.only_b,
        "total_a": s.total_a,
        "total_b": s.total_b,
        "generated_at": s.generated_at,
    })
}

/// Read-through: cache entry if present, else rebuild it from the
/// store summary plus completed chunks. Export chunks stay
/// authoritative; the cache is only an accelerator.
pub(crate) fn load_or_rebuild(
    state: &AppState,
    run_id: i64,
    combination: &Combination,
) -> Result<Option<Arc<CacheEntry>>, ApiError> {
    match state.cache.load(run_id, combination) {
        Ok(Some(entry)) => return Ok(Some(entry)),
        Ok(None) => {}
        Err(e) => {
            tracing::warn!(run_id, error = %e, "corrupt cache entry, rebuilding from chunks");
        }
    }
    let Some(summary) = state.store.get_summary(run_id, combination)? else {
        return Ok(None);
    };
    let hash = combination.stable_hash();
    let store = Arc::clone(&state.store);
    let chunks = move |category: ExportCategory| {
        store
            .completed_chunks(run_id, &hash, category)
            .unwrap_or_default()
    };
    let limit = state.config.effective_cache_sample_limit();
    match state.cache.rebuild(summary, &chunks, limit) {
        Ok(entry) => Ok(Some(entry)),
        Err(e) => {
            tracing::error!(run_id, error = %e, "cache rebuild failed");
            Err(ApiError::internal("cache rebuild failed"))
        }
    }
}

/// GET /api/comparison-v2/{run_id}/available
pub async fn available(
    State(state): State<AppState>,
    Path(run_id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let mut entries = state
        .cache
        .list_run(run_id)
        .map_err(|e| {
            tracing::error!(run_id, error = %e, "cache scan failed");
            ApiError::internal("cache scan failed")
        })?;

    // Summaries whose cache entry is missing (lost or expired) are
    // rebuilt read-through.
    if entries.is_empty() {
        for summary in state.store.list_summaries(run_id)? {
            if let Some(entry) = load_or_rebuild(&state, run_id, &summary.combination.clone())? {
                entries.push(entry);
            }
        }
    }

    let list: Vec<Value> = entries.iter().map(|e| summary_json(e)).collect();
    Ok(Json(json!({ "run_id": run_id, "combinations": list })))
}

/// GET /api/comparison-v2/{run_id}/summary?columns=
pub async fn summary(
    State(state): State<AppState>,
    Path(run_id): Path<i64>,
    Query(query): Query<ColumnsQuery>,
) -> Result<Json<Value>, ApiError> {
    let combination = parse_columns(&query.columns)?;
    let entry = load_or_rebuild(&state, run_id, &combination)?
        .ok_or_else(|| ApiError::not_found("no reconciliation for that combination"))?;
    Ok(Json(summary_json(&entry)))
}

/// GET /api/comparison-v2/{run_id}/data?columns=&category=&offset=&limit=
///
/// Pages inside the cached samples are served from cache; anything
/// deeper reads the ordered export chunks.
pub async fn data(
    State(state): State<AppState>,
    Path(run_id): Path<i64>,
    Query(query): Query<DataQuery>,
) -> Result<Json<Value>, ApiError> {
    let combination = parse_columns(&query.columns)?;
    let category = ExportCategory::parse(&query.category)
        .ok_or_else(|| ApiError::bad_request(format!("invalid category '{}'", query.category)))?;

    let entry = load_or_rebuild(&state, run_id, &combination)?
        .ok_or_else(|| ApiError::not_found("no reconciliation for that combination"))?;

    let sample_cap = state.config.effective_cache_sample_limit();
    let end = query.offset as usize + query.limit;
    let samples = entry.samples(category);

    // Samples hold the first min(S, count) keys, so any page ending
    // within S is fully answerable from cache.
    if end <= sample_cap {
        let keys: Vec<&String> = samples
            .iter()
            .skip(query.offset as usize)
            .take(query.limit)
            .collect();
        return Ok(Json(json!({
            "run_id": run_id,
            "category": category.as_str(),
            "offset": query.offset,
            "limit": query.limit,
            "source": "cache",
            "keys": keys,
        })));
    }

    let chunks = state
        .store
        .completed_chunks(run_id, &combination.stable_hash(), category)?;
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
        "source": "export",
        "header": header,
        "rows": rows,
    })))
}
