//! Stage executors. Each function advances one stage of a run against
//! the shared store, reading state from and writing state into the
//! run's `RunContext`.

use std::sync::Arc;

use tally_analysis::cache::ComparisonCache;
use tally_analysis::discovery::{DiscoveryInputs, KeyDiscovery};
use tally_analysis::limits::Deadline;
use tally_analysis::profile::ColumnScorer;
use tally_analysis::quality::QualityProfiler;
use tally_analysis::reader::{count_rows, sample_rows, FileProfile};
use tally_analysis::reconcile::{ReconcileRequest, Reconciler};
use tally_analysis::uniqueness::{AnalyzeMode, AnalyzeRequest, UniquenessAnalyzer};
use tally_core::config::SamplingPolicy;
use tally_core::errors::{AnalysisError, RunError};
use tally_core::events::types::ReconcileProgressEvent;
use tally_core::traits::{IComparisons, IExportChunks, IRuns, IStages};
use tally_core::types::results::CacheEntry;
use tally_core::types::run::{DiscoveryMode, StageKind};
use tally_core::types::side::Side;
use tally_core::{Combination, EngineConfig, EventDispatcher, FxHashMap};
use tally_storage::TallyStorageEngine;
use xxhash_rust::xxh3::xxh3_64;

use crate::context::RunContext;
use crate::now_ms;

/// Shared collaborators the stage executors borrow.
pub(crate) struct StageDeps<'a> {
    pub store: &'a Arc<TallyStorageEngine>,
    pub cache: &'a ComparisonCache,
    pub config: &'a EngineConfig,
    pub events: &'a EventDispatcher,
    pub quality: &'a dyn QualityProfiler,
}

pub(crate) fn execute_stage(
    kind: StageKind,
    ctx: &mut RunContext,
    deps: &StageDeps<'_>,
) -> Result<(), RunError> {
    match kind {
        StageKind::Reading => reading(ctx, deps),
        StageKind::Quality => quality(ctx, deps),
        StageKind::Validating => validating(ctx, deps),
        StageKind::AnalyzeA => analyze(ctx, deps, Side::A),
        StageKind::AnalyzeB => analyze(ctx, deps, Side::B),
        StageKind::Storing => storing(ctx, deps),
        StageKind::GenerateCache => generate_cache(ctx, deps),
        StageKind::GenerateComparisons => generate_comparisons(ctx, deps),
    }
}

fn sample_seed(run_id: i64, side: Side) -> u64 {
    let mut bytes = [0u8; 9];
    bytes[..8].copy_from_slice(&run_id.to_le_bytes());
    bytes[8] = side.as_str().as_bytes()[0];
    xxh3_64(&bytes)
}

fn sampling_policy(ctx: &RunContext, deps: &StageDeps<'_>) -> SamplingPolicy {
    if ctx.params.max_rows > 0 {
        SamplingPolicy::Head
    } else {
        deps.config.effective_sampling_policy()
    }
}

// ─── reading ────────────────────────────────────────────────────────

fn reading(ctx: &mut RunContext, deps: &StageDeps<'_>) -> Result<(), RunError> {
    let deadline = Deadline::after_secs(deps.config.effective_reading_timeout_secs());

    let profile_a = FileProfile::detect(std::path::Path::new(&ctx.params.file_a))?;
    let profile_b = FileProfile::detect(std::path::Path::new(&ctx.params.file_b))?;
    check_deadline(&deadline, StageKind::Reading)?;

    let n = deps.config.effective_profile_sample_rows();
    let policy = sampling_policy(ctx, deps);
    ctx.sample_a = sample_rows(&profile_a, n, policy, sample_seed(ctx.run_id, Side::A))?;
    check_deadline(&deadline, StageKind::Reading)?;
    ctx.sample_b = sample_rows(&profile_b, n, policy, sample_seed(ctx.run_id, Side::B))?;
    check_deadline(&deadline, StageKind::Reading)?;

    tracing::info!(
        run_id = ctx.run_id,
        rows_a = profile_a.row_count_estimate,
        rows_b = profile_b.row_count_estimate,
        "profiled input files"
    );
    ctx.profile_a = Some(profile_a);
    ctx.profile_b = Some(profile_b);
    Ok(())
}

// ─── quality (optional pre-stage) ───────────────────────────────────

/// Profiler problems downgrade to a stage note; they never fail the run.
fn quality(ctx: &mut RunContext, deps: &StageDeps<'_>) -> Result<(), RunError> {
    match deps.quality.profile(
        ctx.profile_a(),
        &ctx.sample_a,
        ctx.profile_b(),
        &ctx.sample_b,
    ) {
        Ok(report) => deps.store.set_quality_report(ctx.run_id, &report)?,
        Err(e) => {
            tracing::warn!(run_id = ctx.run_id, error = %e, "quality profiler failed");
            deps.store.stage_note(
                ctx.run_id,
                StageKind::Quality,
                &format!("profiler failed: {e}"),
            )?;
        }
    }
    Ok(())
}

// ─── validating ─────────────────────────────────────────────────────

fn validating(ctx: &mut RunContext, deps: &StageDeps<'_>) -> Result<(), RunError> {
    let header_b = &ctx.profile_b().header;
    let pool: Vec<String> = ctx
        .profile_a()
        .header
        .iter()
        .filter(|col| header_b.contains(col))
        .cloned()
        .collect();

    if pool.is_empty() {
        return Err(RunError::Analysis(AnalysisError::parameter(
            "schema mismatch: the files share no header columns",
        )));
    }
    if ctx.params.num_columns > pool.len() {
        return Err(RunError::Analysis(AnalysisError::parameter(format!(
            "num_columns {} exceeds the {}-column pool",
            ctx.params.num_columns,
            pool.len()
        ))));
    }
    if ctx.params.num_columns == 0 && ctx.params.expected_combinations.is_empty() {
        return Err(RunError::Analysis(AnalysisError::parameter(
            "num_columns is 0 and no expected combinations were given",
        )));
    }

    deps.store.set_column_pool(ctx.run_id, &pool)?;
    ctx.pool = pool;
    Ok(())
}

// ─── analyze ────────────────────────────────────────────────────────

fn analyze(ctx: &mut RunContext, deps: &StageDeps<'_>, side: Side) -> Result<(), RunError> {
    if ctx.candidates.is_none() {
        discover(ctx, deps)?;
    }
    let candidates = ctx.candidates.as_ref().expect("discovery ran");

    let profile = match side {
        Side::A => ctx.profile_a(),
        Side::B => ctx.profile_b(),
    };
    let deadline = Deadline::after_secs(deps.config.effective_analyze_timeout_secs());
    let request = AnalyzeRequest {
        run_id: ctx.run_id,
        side,
        profile,
        candidates,
        cancellation: &ctx.cancellation,
        deadline: Some(deadline),
        memory_cap_keys: deps.config.effective_memory_cap_keys(),
        partitions: deps.config.effective_external_partitions(),
        tmp_dir: deps.config.run_tmp_dir(ctx.run_id),
        temp_budget_bytes: deps.config.effective_temp_budget_bytes(),
    };

    let threshold = deps.config.effective_sample_threshold();
    let sampled = ctx.params.max_rows > 0 || profile.row_count_estimate > threshold;

    let outcome = if sampled {
        let total_rows = count_rows(profile)?;
        let n = if ctx.params.max_rows > 0 {
            ctx.params.max_rows as usize
        } else {
            threshold as usize
        };
        let rows = sample_rows(
            profile,
            n,
            sampling_policy(ctx, deps),
            sample_seed(ctx.run_id, side),
        )?;
        UniquenessAnalyzer::analyze(&request, AnalyzeMode::Sampled { rows: &rows, total_rows })
    } else {
        UniquenessAnalyzer::analyze(&request, AnalyzeMode::Full)
    }
    .map_err(RunError::Analysis)?;

    if outcome.external_mode {
        let kind = match side {
            Side::A => StageKind::AnalyzeA,
            Side::B => StageKind::AnalyzeB,
        };
        deps.store
            .stage_note(ctx.run_id, kind, "memory cap reached, used external counting")?;
    }

    match side {
        Side::A => ctx.results_a = outcome.results,
        Side::B => ctx.results_b = outcome.results,
    }
    Ok(())
}

/// Run key discovery once, using promise scores and sample uniqueness
/// from the smaller side.
fn discover(ctx: &mut RunContext, deps: &StageDeps<'_>) -> Result<(), RunError> {
    let (profile, sample) = if ctx.smaller_side_is_a() {
        (ctx.profile_a(), &ctx.sample_a)
    } else {
        (ctx.profile_b(), &ctx.sample_b)
    };

    let scores = ColumnScorer::score_sample(&profile.header, sample);
    let promise: FxHashMap<String, f64> = scores
        .into_iter()
        .filter(|s| ctx.pool.contains(&s.name))
        .map(|s| (s.name, s.promise_score))
        .collect();

    let mode = if !ctx.params.expected_combinations.is_empty() && ctx.params.num_columns == 0 {
        DiscoveryMode::Explicit
    } else {
        KeyDiscovery::resolve_mode(
            ctx.params.num_columns,
            ctx.pool.len(),
            !ctx.params.expected_combinations.is_empty(),
            ctx.params.use_intelligent_discovery,
        )
    };
    tracing::debug!(run_id = ctx.run_id, mode = mode.as_str(), pool = ctx.pool.len(), "resolved discovery mode");

    let inputs = DiscoveryInputs {
        pool: &ctx.pool,
        promise: &promise,
        k: ctx.params.num_columns,
        pinned: &ctx.params.expected_combinations,
        excluded: &ctx.params.excluded_combinations,
        base: None,
        max_combinations: deps.config.effective_max_combinations(),
        mode,
    };

    let candidates = KeyDiscovery::discover(&inputs, &mut |combination| {
        match profile.column_indices(combination.columns()) {
            Some(indices) => UniquenessAnalyzer::sample_uniqueness(sample, &indices),
            None => 0.0,
        }
    })
    .map_err(RunError::Analysis)?;

    ctx.candidates = Some(candidates);
    Ok(())
}

// ─── storing ────────────────────────────────────────────────────────

fn storing(ctx: &mut RunContext, deps: &StageDeps<'_>) -> Result<(), RunError> {
    use tally_core::traits::IAnalysisResults;

    deps.store.upsert_results(&ctx.results_a)?;
    deps.store.upsert_results(&ctx.results_b)?;
    ctx.selected = select_for_reconciliation(ctx, deps.config.effective_auto_reconcile_limit());

    tracing::info!(
        run_id = ctx.run_id,
        results = ctx.results_a.len() + ctx.results_b.len(),
        selected = ctx.selected.len(),
        "stored analysis results"
    );
    Ok(())
}

/// User-pinned combinations first, then discovered ones ranked by
/// (smaller-side uniqueness desc, size asc, lexicographic), capped.
fn select_for_reconciliation(ctx: &RunContext, limit: usize) -> Vec<Combination> {
    let smaller = if ctx.smaller_side_is_a() {
        &ctx.results_a
    } else {
        &ctx.results_b
    };
    let score_of = |combination: &Combination| -> f64 {
        smaller
            .iter()
            .find(|r| &r.combination == combination)
            .map(|r| r.uniqueness_score)
            .unwrap_or(0.0)
    };

    let Some(candidates) = ctx.candidates.as_ref() else {
        return Vec::new();
    };
    let mut pinned: Vec<Combination> = Vec::new();
    let mut discovered: Vec<Combination> = Vec::new();
    for (combination, provenance) in candidates.iter() {
        match provenance {
            tally_analysis::discovery::Provenance::UserPinned => pinned.push(combination.clone()),
            tally_analysis::discovery::Provenance::Discovered => {
                discovered.push(combination.clone())
            }
        }
    }
    discovered.sort_by(|a, b| {
        score_of(b)
            .partial_cmp(&score_of(a))
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.len().cmp(&b.len()))
            .then_with(|| a.sorted_columns().cmp(&b.sorted_columns()))
    });

    let mut selected = pinned;
    for combination in discovered {
        if selected.len() >= limit {
            break;
        }
        if !selected.contains(&combination) {
            selected.push(combination);
        }
    }
    selected.truncate(limit.max(1));
    selected
}

// ─── generate_cache / generate_comparisons ──────────────────────────

/// Reconcile the top-ranked combination first so summary counts and
/// samples are served as early as possible.
fn generate_cache(ctx: &mut RunContext, deps: &StageDeps<'_>) -> Result<(), RunError> {
    let Some(first) = ctx.selected.first().cloned() else {
        deps.store.stage_note(
            ctx.run_id,
            StageKind::GenerateCache,
            "no combination selected for reconciliation",
        )?;
        return Ok(());
    };
    reconcile_combination(ctx, deps, &first).map_err(RunError::Analysis)
}

/// Reconcile the remaining selected combinations. I/O failure on one
/// combination is fatal to that combination only.
fn generate_comparisons(ctx: &mut RunContext, deps: &StageDeps<'_>) -> Result<(), RunError> {
    let rest: Vec<Combination> = ctx.selected.iter().skip(1).cloned().collect();
    for combination in rest {
        match reconcile_combination(ctx, deps, &combination) {
            Ok(()) => {}
            Err(e @ (AnalysisError::Cancelled | AnalysisError::Timeout { .. })) => {
                return Err(RunError::Analysis(e));
            }
            Err(e) => {
                tracing::warn!(
                    run_id = ctx.run_id,
                    combination = %combination,
                    error = %e,
                    "combination failed, continuing with remaining"
                );
                deps.store.stage_note(
                    ctx.run_id,
                    StageKind::GenerateComparisons,
                    &format!("combination '{combination}' failed: {e}"),
                )?;
            }
        }
    }
    Ok(())
}

fn reconcile_combination(
    ctx: &RunContext,
    deps: &StageDeps<'_>,
    combination: &Combination,
) -> Result<(), AnalysisError> {
    run_reconciliation(
        ctx.run_id,
        combination,
        ctx.profile_a(),
        ctx.profile_b(),
        &ctx.cancellation,
        Some((&ctx.results_a, &ctx.results_b)),
        deps,
    )
}

/// Shared by the staged path and the gateway's on-demand generate.
/// Skips work when a summary already exists (idempotent); otherwise
/// deletes any partial prior attempt and reconciles from scratch.
pub(crate) fn run_reconciliation(
    run_id: i64,
    combination: &Combination,
    profile_a: &FileProfile,
    profile_b: &FileProfile,
    cancellation: &tally_core::RunCancellation,
    results: Option<(&[tally_core::types::results::AnalysisResult], &[tally_core::types::results::AnalysisResult])>,
    deps: &StageDeps<'_>,
) -> Result<(), AnalysisError> {
    if deps
        .store
        .get_summary(run_id, combination)
        .map_err(storage_err)?
        .is_some()
    {
        tracing::debug!(run_id, combination = %combination, "reconciliation already completed");
        return Ok(());
    }

    let hash = combination.stable_hash();
    deps.store.delete_chunks(run_id, &hash).map_err(storage_err)?;

    // The analyzer's distinct counts tell us up front whether the key
    // population fits in memory.
    let memory_cap = deps.config.effective_memory_cap_keys();
    let force_external = results
        .map(|(a, b)| {
            let distinct =
                |rs: &[tally_core::types::results::AnalysisResult]| -> u64 {
                    rs.iter()
                        .find(|r| &r.combination == combination && !r.is_sampled)
                        .map(|r| r.unique_rows)
                        .unwrap_or(0)
                };
            distinct(a) + distinct(b) > memory_cap as u64
        })
        .unwrap_or(false);

    let events = deps.events;
    let progress_hash = hash.clone();
    let progress = move |rows: u64| {
        events.reconcile_progress(&ReconcileProgressEvent {
            run_id,
            combination_hash: progress_hash.clone(),
            rows_processed: rows,
        });
    };

    let request = ReconcileRequest {
        run_id,
        combination,
        profile_a,
        profile_b,
        cancellation,
        deadline: Some(Deadline::after_secs(
            deps.config.effective_reconcile_timeout_secs(),
        )),
        memory_cap_keys: memory_cap,
        partitions: deps.config.effective_external_partitions(),
        tmp_dir: deps.config.run_tmp_dir(run_id),
        temp_budget_bytes: deps.config.effective_temp_budget_bytes(),
        max_rows_per_chunk: deps.config.effective_max_rows_per_chunk(),
        max_bytes_per_chunk: deps.config.effective_max_bytes_per_chunk(),
        cache_sample_limit: deps.config.effective_cache_sample_limit(),
        generated_at: now_ms(),
        progress: Some(&progress),
        force_external,
    };

    let outcome = Reconciler::reconcile(
        &request,
        deps.config.comparison_dir(run_id, &hash),
        Arc::clone(deps.store) as Arc<dyn IExportChunks>,
    )?;

    deps.store
        .upsert_summary(&outcome.summary)
        .map_err(storage_err)?;
    if let Err(e) = deps.cache.store(&CacheEntry {
        summary: outcome.summary,
        sample_matched: outcome.samples.matched,
        sample_only_a: outcome.samples.only_a,
        sample_only_b: outcome.samples.only_b,
    }) {
        // Chunks are authoritative; a cache write failure is degraded
        // service, not a failed reconciliation.
        tracing::warn!(run_id, error = %e, "failed to write comparison cache entry");
    }
    Ok(())
}

fn storage_err(e: tally_core::errors::StorageError) -> AnalysisError {
    AnalysisError::Io {
        message: e.to_string(),
    }
}

fn check_deadline(deadline: &Deadline, stage: StageKind) -> Result<(), RunError> {
    if deadline.exceeded() {
        return Err(RunError::StageTimeout {
            stage: stage.as_str().to_string(),
            budget_secs: deadline.budget_secs,
        });
    }
    Ok(())
}
