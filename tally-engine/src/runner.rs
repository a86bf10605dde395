//! The job runner: a bounded worker pool pulling runs off a queue,
//! driving stages in order with retries, CAS status transitions, and
//! cooperative cancellation.

use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Receiver, Sender};
use tally_analysis::cache::ComparisonCache;
use tally_analysis::quality::{BasicQualityProfiler, QualityProfiler};
use tally_analysis::reader::FileProfile;
use tally_core::errors::{AnalysisError, RunError, StorageError, TallyErrorCode};
use tally_core::events::types::{
    ProgressEvent, RunFinishedEvent, RunStartedEvent, StageCompletedEvent, StageStartedEvent,
};
use tally_core::traits::{IRuns, IStages};
use tally_core::types::run::{RunParams, RunStatus, StageKind, StageStatus};
use tally_core::{Combination, EngineConfig, EventDispatcher, FxHashMap, RunCancellation};
use tally_storage::TallyStorageEngine;

use crate::context::RunContext;
use crate::retry::{retry_with_backoff, BackoffConfig};
use crate::stages::{execute_stage, run_reconciliation, StageDeps};
use crate::now_ms;

enum Job {
    Run(i64),
    Export {
        run_id: i64,
        combination: Combination,
    },
}

/// Accepts jobs without blocking and executes them on a bounded pool
/// of worker threads. One `JobRunner` per process.
pub struct JobRunner {
    store: Arc<TallyStorageEngine>,
    cache: Arc<ComparisonCache>,
    config: EngineConfig,
    events: Arc<EventDispatcher>,
    tx: Sender<Job>,
    workers: Vec<JoinHandle<()>>,
    /// Cancellation flags of currently executing runs.
    active: Arc<Mutex<FxHashMap<i64, RunCancellation>>>,
}

impl JobRunner {
    pub fn new(
        store: Arc<TallyStorageEngine>,
        cache: Arc<ComparisonCache>,
        config: EngineConfig,
        events: EventDispatcher,
    ) -> Self {
        Self::with_quality_profiler(store, cache, config, events, Arc::new(BasicQualityProfiler))
    }

    /// Construct with a custom data-quality profiler.
    pub fn with_quality_profiler(
        store: Arc<TallyStorageEngine>,
        cache: Arc<ComparisonCache>,
        config: EngineConfig,
        events: EventDispatcher,
        quality: Arc<dyn QualityProfiler>,
    ) -> Self {
        let (tx, rx) = unbounded::<Job>();
        let events = Arc::new(events);
        let active: Arc<Mutex<FxHashMap<i64, RunCancellation>>> =
            Arc::new(Mutex::new(FxHashMap::default()));

        let workers = (0..config.effective_workers())
            .map(|i| {
                let rx: Receiver<Job> = rx.clone();
                let store = Arc::clone(&store);
                let cache = Arc::clone(&cache);
                let config = config.clone();
                let events = Arc::clone(&events);
                let active = Arc::clone(&active);
                let quality = Arc::clone(&quality);
                std::thread::Builder::new()
                    .name(format!("tally-worker-{i}"))
                    .spawn(move || {
                        for job in rx.iter() {
                            let deps = StageDeps {
                                store: &store,
                                cache: &cache,
                                config: &config,
                                events: &events,
                                quality: quality.as_ref(),
                            };
                            match job {
                                Job::Run(run_id) => execute_run(run_id, &deps, &active),
                                Job::Export {
                                    run_id,
                                    combination,
                                } => execute_export(run_id, &combination, &deps, &active),
                            }
                        }
                    })
                    .expect("failed to spawn worker thread")
            })
            .collect();

        Self {
            store,
            cache,
            config,
            events,
            tx,
            workers,
            active,
        }
    }

    /// Validate and persist a submission, enqueue it, and return the
    /// run id immediately. On validation failure no run row is created.
    pub fn submit(&self, params: RunParams) -> Result<i64, RunError> {
        if params.num_columns == 0 && params.expected_combinations.is_empty() {
            return Err(RunError::Analysis(AnalysisError::parameter(
                "num_columns must be at least 1",
            )));
        }
        for path in [&params.file_a, &params.file_b] {
            if !std::path::Path::new(path).is_file() {
                return Err(RunError::Read(tally_core::errors::ReadError::FileNotFound {
                    path: path.clone(),
                }));
            }
        }

        let stages = StageKind::sequence(params.data_quality_check);
        let run_id = self.store.create_run(&params, &stages, now_ms())?;
        self.tx
            .send(Job::Run(run_id))
            .map_err(|_| RunError::PoolShutdown)?;
        tracing::info!(run_id, file_a = %params.file_a, file_b = %params.file_b, "run submitted");
        Ok(run_id)
    }

    /// Cancel a run. Queued runs transition straight to `cancelled`;
    /// running runs get their flag flipped and transition at the next
    /// checkpoint. Terminal runs are untouched.
    pub fn cancel(&self, run_id: i64) -> Result<RunStatus, RunError> {
        if self
            .store
            .cas_status(run_id, RunStatus::Queued, RunStatus::Cancelled, now_ms())?
        {
            self.events.run_finished(&RunFinishedEvent {
                run_id,
                status: RunStatus::Cancelled,
                error_message: None,
                duration_ms: 0,
            });
            return Ok(RunStatus::Cancelled);
        }

        if let Some(flag) = self.active.lock().expect("active map").get(&run_id) {
            flag.cancel();
        }
        let run = self
            .store
            .get_run(run_id)?
            .ok_or(RunError::Storage(StorageError::RunNotFound { run_id }))?;
        Ok(run.status)
    }

    /// Ensure a reconciliation exists for (run, combination). Returns
    /// immediately; the work happens on the pool. Idempotent.
    pub fn generate_export(&self, run_id: i64, combination: Combination) -> Result<(), RunError> {
        let run = self
            .store
            .get_run(run_id)?
            .ok_or(RunError::Storage(StorageError::RunNotFound { run_id }))?;
        let pool = run.column_pool.unwrap_or_default();
        for col in combination.columns() {
            if !pool.contains(col) {
                return Err(RunError::Analysis(AnalysisError::parameter(format!(
                    "combination references unknown column '{col}'"
                ))));
            }
        }
        self.tx
            .send(Job::Export {
                run_id,
                combination,
            })
            .map_err(|_| RunError::PoolShutdown)
    }

    /// Remove runs past retention along with their exports and cache
    /// entries. Returns the purged ids.
    pub fn purge_expired(&self) -> Result<Vec<i64>, StorageError> {
        let cutoff =
            now_ms() - i64::from(self.config.effective_retention_days()) * 24 * 60 * 60 * 1000;
        let purged = tally_storage::retention::purge_expired(
            &self.store,
            &self.config.exports_dir(),
            &self.config.cache_dir(),
            cutoff,
        )?;
        if let Err(e) = self.cache.cleanup_older_than(cutoff) {
            tracing::warn!(error = %e, "cache retention sweep failed");
        }
        Ok(purged)
    }

    /// Drop the queue and wait for workers to finish their current job.
    pub fn shutdown(mut self) {
        drop(self.tx);
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

// ─── Worker-side execution ──────────────────────────────────────────

fn execute_run(
    run_id: i64,
    deps: &StageDeps<'_>,
    active: &Arc<Mutex<FxHashMap<i64, RunCancellation>>>,
) {
    // queued → running; losing means a cancel won first.
    let started = now_ms();
    match deps
        .store
        .cas_status(run_id, RunStatus::Queued, RunStatus::Running, started)
    {
        Ok(true) => {}
        Ok(false) => {
            tracing::info!(run_id, "run no longer queued, skipping");
            return;
        }
        Err(e) => {
            tracing::error!(run_id, error = %e, "failed to start run");
            return;
        }
    }

    let Ok(Some(run)) = deps.store.get_run(run_id) else {
        tracing::error!(run_id, "run row vanished after start");
        return;
    };

    let cancellation = RunCancellation::new();
    active
        .lock()
        .expect("active map")
        .insert(run_id, cancellation.clone());
    deps.events.run_started(&RunStartedEvent { run_id });

    let mut ctx = RunContext::new(run_id, run.params.clone(), cancellation.clone());
    let result = drive_stages(&mut ctx, deps);

    active.lock().expect("active map").remove(&run_id);
    finish_run(run_id, started, result, deps);
    cleanup_tmp(deps, run_id);
}

fn drive_stages(ctx: &mut RunContext, deps: &StageDeps<'_>) -> Result<(), (StageKind, RunError)> {
    let stage_list = StageKind::sequence(ctx.params.data_quality_check);
    let backoff = BackoffConfig::default();
    let attempts = deps.config.effective_retry_attempts();

    for kind in stage_list {
        if ctx.cancellation.is_cancelled() {
            return Err((kind, RunError::Cancelled));
        }

        let stage_start = now_ms();
        if let Err(e) = deps.store.stage_started(ctx.run_id, kind, stage_start) {
            return Err((kind, RunError::Storage(e)));
        }
        deps.events.stage_started(&StageStartedEvent {
            run_id: ctx.run_id,
            stage: kind,
        });
        tracing::info!(run_id = ctx.run_id, stage = %kind, "stage started");

        let result = retry_with_backoff(kind.as_str(), attempts, &backoff, || {
            execute_stage(kind, ctx, deps)
        });
        match result {
            Ok(()) => {
                let done = now_ms();
                if let Err(e) = deps.store.stage_completed(ctx.run_id, kind, done) {
                    return Err((kind, RunError::Storage(e)));
                }
                let progress = kind.progress_after();
                let _ = deps.store.set_progress(ctx.run_id, progress, kind);
                deps.events.stage_completed(&StageCompletedEvent {
                    run_id: ctx.run_id,
                    stage: kind,
                    duration_ms: (done - stage_start).max(0) as u64,
                });
                deps.events.progress(&ProgressEvent {
                    run_id: ctx.run_id,
                    stage: kind,
                    progress,
                });
            }
            Err(e) => return Err((kind, e)),
        }
    }
    Ok(())
}

fn finish_run(
    run_id: i64,
    started: i64,
    result: Result<(), (StageKind, RunError)>,
    deps: &StageDeps<'_>,
) {
    let finished = now_ms();
    let duration_ms = (finished - started).max(0) as u64;

    match result {
        Ok(()) => {
            let _ = deps
                .store
                .cas_status(run_id, RunStatus::Running, RunStatus::Completed, finished);
            deps.events.run_finished(&RunFinishedEvent {
                run_id,
                status: RunStatus::Completed,
                error_message: None,
                duration_ms,
            });
            tracing::info!(run_id, duration_ms, "run completed");
        }
        Err((stage, e)) if e.is_cancelled() => {
            // The in-flight stage ends cancelled; downstream stages stay
            // pending and visible as such.
            let _ = deps.store.stage_finished(
                run_id,
                stage,
                StageStatus::Cancelled,
                Some("cancelled by user"),
                finished,
            );
            let _ = deps
                .store
                .cas_status(run_id, RunStatus::Running, RunStatus::Cancelled, finished);
            deps.events.run_finished(&RunFinishedEvent {
                run_id,
                status: RunStatus::Cancelled,
                error_message: None,
                duration_ms,
            });
            tracing::info!(run_id, stage = %stage, "run cancelled");
        }
        Err((stage, e)) => {
            let message = e.to_string();
            let details = format!("{}: {message}", e.error_code());
            let _ = deps.store.stage_finished(
                run_id,
                stage,
                StageStatus::Error,
                Some(&details),
                finished,
            );
            let _ = deps.store.set_error_message(run_id, &message);
            let _ = deps
                .store
                .cas_status(run_id, RunStatus::Running, RunStatus::Error, finished);
            deps.events.run_finished(&RunFinishedEvent {
                run_id,
                status: RunStatus::Error,
                error_message: Some(message.clone()),
                duration_ms,
            });
            tracing::error!(run_id, stage = %stage, error = %message, "run failed");
        }
    }
}

/// On-demand reconciliation for the gateway's generate endpoint.
fn execute_export(
    run_id: i64,
    combination: &Combination,
    deps: &StageDeps<'_>,
    active: &Arc<Mutex<FxHashMap<i64, RunCancellation>>>,
) {
    let Ok(Some(run)) = deps.store.get_run(run_id) else {
        tracing::warn!(run_id, "export requested for unknown run");
        return;
    };

    // Reuse the live flag if the run is still executing so a cancel
    // reaches this work too.
    let cancellation = active
        .lock()
        .expect("active map")
        .get(&run_id)
        .cloned()
        .unwrap_or_default();

    let result = (|| -> Result<(), AnalysisError> {
        let profile_a = FileProfile::detect(std::path::Path::new(&run.params.file_a))
            .map_err(AnalysisError::Read)?;
        let profile_b = FileProfile::detect(std::path::Path::new(&run.params.file_b))
            .map_err(AnalysisError::Read)?;
        run_reconciliation(
            run_id,
            combination,
            &profile_a,
            &profile_b,
            &cancellation,
            None,
            deps,
        )
    })();

    if let Err(e) = result {
        tracing::warn!(run_id, combination = %combination, error = %e, "export generation failed");
    }
    cleanup_tmp(deps, run_id);
}

fn cleanup_tmp(deps: &StageDeps<'_>, run_id: i64) {
    let tmp = deps.config.run_tmp_dir(run_id);
    if tmp.exists() {
        let _ = std::fs::remove_dir_all(&tmp);
    }
}
