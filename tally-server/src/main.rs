//! The `tally` binary: CLI parsing, process wiring, and the HTTP
//! gateway. Exit codes: 0 ok, 2 config error, 3 I/O error, 4 run
//! failure (one-shot mode).

mod cli;
mod error;
mod events;
mod routes;
mod state;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tally_analysis::cache::ComparisonCache;
use tally_core::traits::IRuns;
use tally_core::types::run::{RunParams, RunStatus};
use tally_core::EventDispatcher;
use tally_engine::JobRunner;
use tally_storage::{DataDirLock, TallyStorageEngine};
use tracing_subscriber::EnvFilter;

use crate::state::AppState;

const EXIT_CONFIG: u8 = 2;
const EXIT_IO: u8 = 3;
const EXIT_RUN_FAILED: u8 = 4;

/// Retention sweep cadence while serving.
const RETENTION_INTERVAL: Duration = Duration::from_secs(6 * 60 * 60);

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = cli::Cli::parse();
    let config = match cli.resolve_config() {
        Ok(config) => config,
        Err(message) => {
            eprintln!("config error: {message}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    // One process per data directory.
    let data_dir = config.effective_data_dir();
    let mut lock = match DataDirLock::new(&data_dir) {
        Ok(lock) => lock,
        Err(e) => {
            eprintln!("cannot prepare data dir: {e}");
            return ExitCode::from(EXIT_IO);
        }
    };
    let _guard = match lock.acquire() {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(EXIT_IO);
        }
    };

    let store = match TallyStorageEngine::open(&config.store_path()) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            eprintln!("cannot open store: {e}");
            return ExitCode::from(EXIT_IO);
        }
    };
    let cache = match ComparisonCache::new(config.cache_dir()) {
        Ok(cache) => Arc::new(cache),
        Err(e) => {
            eprintln!("cannot prepare cache dir: {e}");
            return ExitCode::from(EXIT_IO);
        }
    };

    let mut dispatcher = EventDispatcher::new();
    dispatcher.register(Arc::new(events::LoggingHandler));
    let runner = Arc::new(JobRunner::new(
        Arc::clone(&store),
        Arc::clone(&cache),
        config.clone(),
        dispatcher,
    ));

    if let (Some(file_a), Some(file_b)) = (&cli.file_a, &cli.file_b) {
        return one_shot(
            &store,
            &runner,
            RunParams {
                file_a: file_a.display().to_string(),
                file_b: file_b.display().to_string(),
                num_columns: cli.num_columns,
                expected_combinations: vec![],
                excluded_combinations: vec![],
                max_rows: 0,
                data_quality_check: false,
                use_intelligent_discovery: false,
            },
        );
    }

    serve(cli.listen, store, cache, runner, config)
}

/// Submit one run, wait for it, print the outcome as JSON.
fn one_shot(
    store: &Arc<TallyStorageEngine>,
    runner: &Arc<JobRunner>,
    params: RunParams,
) -> ExitCode {
    let run_id = match runner.submit(params) {
        Ok(id) => id,
        Err(e) => {
            eprintln!("submission failed: {e}");
            return ExitCode::from(EXIT_RUN_FAILED);
        }
    };

    let status = loop {
        match store.get_run(run_id) {
            Ok(Some(run)) if run.status.is_terminal() => break run.status,
            Ok(_) => std::thread::sleep(Duration::from_millis(200)),
            Err(e) => {
                eprintln!("status poll failed: {e}");
                return ExitCode::from(EXIT_IO);
            }
        }
    };

    let run = store.get_run(run_id).ok().flatten();
    println!(
        "{}",
        serde_json::json!({
            "run_id": run_id,
            "status": status.as_str(),
            "error_message": run.and_then(|r| r.error_message),
        })
    );
    if status == RunStatus::Completed {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_RUN_FAILED)
    }
}

fn serve(
    listen: String,
    store: Arc<TallyStorageEngine>,
    cache: Arc<ComparisonCache>,
    runner: Arc<JobRunner>,
    config: tally_core::EngineConfig,
) -> ExitCode {
    // Periodic retention sweep.
    {
        let runner = Arc::clone(&runner);
        std::thread::Builder::new()
            .name("tally-retention".to_string())
            .spawn(move || loop {
                std::thread::sleep(RETENTION_INTERVAL);
                match runner.purge_expired() {
                    Ok(purged) if !purged.is_empty() => {
                        tracing::info!(count = purged.len(), "retention purged runs");
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "retention sweep failed"),
                }
            })
            .expect("failed to spawn retention thread");
    }

    let state = AppState {
        store,
        cache,
        runner,
        config: Arc::new(config),
    };
    let app = routes::router(state);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("cannot start runtime: {e}");
            return ExitCode::from(EXIT_IO);
        }
    };

    runtime.block_on(async move {
        let listener = match tokio::net::TcpListener::bind(&listen).await {
            Ok(listener) => listener,
            Err(e) => {
                eprintln!("cannot bind {listen}: {e}");
                return ExitCode::from(EXIT_IO);
            }
        };
        tracing::info!(%listen, "gateway listening");
        match axum::serve(listener, app).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("server error: {e}");
                ExitCode::from(EXIT_IO)
            }
        }
    })
}
