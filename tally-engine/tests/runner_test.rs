//! End-to-end runner tests: full runs over real files, cancellation,
//! concurrent runs, idempotent generation, and submission validation.

use std::fs::File;
use std::io::Write;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tally_analysis::cache::ComparisonCache;
use tally_analysis::quality::QualityProfiler;
use tally_analysis::reader::{FileProfile, Row};
use tally_core::errors::{AnalysisError, RunError};
use tally_core::traits::{IAnalysisResults, IComparisons, IExportChunks, IRuns, IStages};
use tally_core::types::results::ChunkStatus;
use tally_core::types::run::{RunParams, RunStatus, StageKind, StageStatus};
use tally_core::types::side::Side;
use tally_core::{Combination, EngineConfig, EventDispatcher};
use tally_engine::JobRunner;
use tally_storage::TallyStorageEngine;

// ─── Helpers ───────────────────────────────────────────────────────────────

// Field order matters: the runner must drop (closing its queue) before
// the temp dir is removed.
struct Harness {
    runner: JobRunner,
    store: Arc<TallyStorageEngine>,
    dir: tempfile::TempDir,
}

fn harness() -> Harness {
    harness_with(EventDispatcher::new(), None)
}

fn harness_with(
    events: EventDispatcher,
    quality: Option<Arc<dyn QualityProfiler>>,
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig::rooted_at(dir.path());
    let store = Arc::new(TallyStorageEngine::open(&config.store_path()).unwrap());
    let cache = Arc::new(ComparisonCache::new(config.cache_dir()).unwrap());
    let runner = match quality {
        Some(q) => JobRunner::with_quality_profiler(
            Arc::clone(&store),
            cache,
            config,
            events,
            q,
        ),
        None => JobRunner::new(Arc::clone(&store), cache, config, events),
    };
    Harness { runner, store, dir }
}

impl Harness {
    fn write_file(&self, name: &str, content: &str) -> String {
        let path = self.dir.path().join(name);
        File::create(&path)
            .unwrap()
            .write_all(content.as_bytes())
            .unwrap();
        path.display().to_string()
    }

    fn wait_terminal(&self, run_id: i64) -> RunStatus {
        let deadline = Instant::now() + Duration::from_secs(60);
        loop {
            let run = self.store.get_run(run_id).unwrap().unwrap();
            if run.status.is_terminal() {
                return run.status;
            }
            assert!(Instant::now() < deadline, "run {run_id} never finished");
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}

fn params(file_a: String, file_b: String, k: usize) -> RunParams {
    RunParams {
        file_a,
        file_b,
        num_columns: k,
        expected_combinations: vec![],
        excluded_combinations: vec![],
        max_rows: 0,
        data_quality_check: false,
        use_intelligent_discovery: false,
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// HAPPY PATH (scenario: 3-row overlap on id)
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn full_run_produces_results_summary_and_exports() {
    let h = harness();
    let a = h.write_file("a.csv", "id,name\n1,a\n2,b\n3,c\n");
    let b = h.write_file("b.csv", "id,name\n2,b\n3,c\n4,d\n");

    let run_id = h.runner.submit(params(a, b, 1)).unwrap();
    assert_eq!(h.wait_terminal(run_id), RunStatus::Completed);

    let run = h.store.get_run(run_id).unwrap().unwrap();
    assert_eq!(run.progress, 100);
    assert!(run.error_message.is_none());
    assert_eq!(run.column_pool.as_deref(), Some(&["id".to_string(), "name".to_string()][..]));

    // Every stage completed.
    let stages = h.store.get_stages(run_id).unwrap();
    assert_eq!(stages.len(), 7);
    assert!(stages.iter().all(|s| s.status == StageStatus::Completed));

    // AnalysisResult(A, id) is a unique key.
    let id = Combination::new(["id"]);
    let result = h.store.get_result(run_id, Side::A, &id).unwrap().unwrap();
    assert!(result.is_unique_key);
    assert_eq!(result.total_rows, 3);

    // Reconciliation on id: matched {2,3}, only_a {1}, only_b {4}.
    let summary = h.store.get_summary(run_id, &id).unwrap().unwrap();
    assert_eq!(summary.matched, 2);
    assert_eq!(summary.only_a, 1);
    assert_eq!(summary.only_b, 1);

    // Export chunks exist and are completed.
    let chunks = h.store.all_chunks(run_id, &id.stable_hash()).unwrap();
    assert!(!chunks.is_empty());
    assert!(chunks.iter().all(|c| c.status == ChunkStatus::Completed));
    for chunk in &chunks {
        assert!(std::path::Path::new(&chunk.path).is_file());
    }

    // Polling status is side-effect-free.
    let again = h.store.get_run(run_id).unwrap().unwrap();
    assert_eq!(again.progress, run.progress);
    assert_eq!(again.completed_at, run.completed_at);
}

#[test]
fn duplicate_heavy_combination_scores_eighty() {
    let h = harness();
    let content_a = "dept,role\n\
                     eng,ic\neng,ic\neng,ic\n\
                     eng,mgr\nsales,ic\nsales,mgr\nops,ic\nops,mgr\nhr,ic\nhr,mgr\n";
    let a = h.write_file("a.csv", content_a);
    let b = h.write_file("b.csv", content_a);

    let run_id = h.runner.submit(params(a, b, 2)).unwrap();
    assert_eq!(h.wait_terminal(run_id), RunStatus::Completed);

    let combo = Combination::new(["dept", "role"]);
    let r = h.store.get_result(run_id, Side::A, &combo).unwrap().unwrap();
    assert_eq!(r.total_rows, 10);
    assert_eq!(r.unique_rows, 8);
    assert_eq!(r.duplicate_rows, 2);
    assert_eq!(r.duplicate_count, 3);
    assert!((r.uniqueness_score - 80.0).abs() < 1e-9);
    assert!(!r.is_unique_key);
}

// ═══════════════════════════════════════════════════════════════════════════
// SUBMISSION VALIDATION
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn missing_file_fails_submission_without_creating_a_run() {
    let h = harness();
    let b = h.write_file("b.csv", "id\n1\n");
    let err = h
        .runner
        .submit(params("/nonexistent/a.csv".into(), b, 1))
        .unwrap_err();
    assert!(matches!(err, RunError::Read(_)));
    assert!(h.store.get_run(1).unwrap().is_none());
}

#[test]
fn k_larger_than_pool_ends_in_parameter_error() {
    let h = harness();
    let a = h.write_file("a.csv", "id,name\n1,a\n");
    let b = h.write_file("b.csv", "id,name\n1,a\n");

    let run_id = h.runner.submit(params(a, b, 5)).unwrap();
    assert_eq!(h.wait_terminal(run_id), RunStatus::Error);

    let run = h.store.get_run(run_id).unwrap().unwrap();
    let message = run.error_message.unwrap();
    assert!(message.contains('5'), "message names the offending value: {message}");

    // Downstream stages remain pending.
    let stages = h.store.get_stages(run_id).unwrap();
    let validating = stages.iter().find(|s| s.kind == StageKind::Validating).unwrap();
    assert_eq!(validating.status, StageStatus::Error);
    let analyze = stages.iter().find(|s| s.kind == StageKind::AnalyzeA).unwrap();
    assert_eq!(analyze.status, StageStatus::Pending);
}

#[test]
fn schema_mismatch_fails_the_run() {
    let h = harness();
    let a = h.write_file("a.csv", "x,y\n1,2\n");
    let b = h.write_file("b.csv", "p,q\n1,2\n");
    let run_id = h.runner.submit(params(a, b, 1)).unwrap();
    assert_eq!(h.wait_terminal(run_id), RunStatus::Error);
    let run = h.store.get_run(run_id).unwrap().unwrap();
    assert!(run.error_message.unwrap().contains("schema mismatch"));
}

// ═══════════════════════════════════════════════════════════════════════════
// CANCELLATION (cancel while the run is mid-flight)
// ═══════════════════════════════════════════════════════════════════════════

/// Quality profiler that parks the run until the test releases it.
struct GateProfiler {
    started: mpsc::Sender<i64>,
    release: std::sync::Mutex<mpsc::Receiver<()>>,
}

impl QualityProfiler for GateProfiler {
    fn profile(
        &self,
        profile_a: &FileProfile,
        _sample_a: &[Row],
        _profile_b: &FileProfile,
        _sample_b: &[Row],
    ) -> Result<serde_json::Value, AnalysisError> {
        let _ = self.started.send(0);
        let _ = self
            .release
            .lock()
            .unwrap()
            .recv_timeout(Duration::from_secs(30));
        let _ = profile_a;
        Ok(serde_json::json!({}))
    }
}

#[test]
fn cancel_mid_run_preserves_completed_stages() {
    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let gate = Arc::new(GateProfiler {
        started: started_tx,
        release: std::sync::Mutex::new(release_rx),
    });
    let h = harness_with(EventDispatcher::new(), Some(gate));

    let a = h.write_file("a.csv", "id\n1\n2\n3\n");
    let b = h.write_file("b.csv", "id\n2\n3\n4\n");
    let mut p = params(a, b, 1);
    p.data_quality_check = true;

    let run_id = h.runner.submit(p).unwrap();
    started_rx
        .recv_timeout(Duration::from_secs(30))
        .expect("run reached the quality gate");

    h.runner.cancel(run_id).unwrap();
    release_tx.send(()).unwrap();

    assert_eq!(h.wait_terminal(run_id), RunStatus::Cancelled);

    let stages = h.store.get_stages(run_id).unwrap();
    let reading = stages.iter().find(|s| s.kind == StageKind::Reading).unwrap();
    assert_eq!(reading.status, StageStatus::Completed);
    // Stages past the cancellation point stay pending.
    let generate = stages
        .iter()
        .find(|s| s.kind == StageKind::GenerateComparisons)
        .unwrap();
    assert_eq!(generate.status, StageStatus::Pending);
    // Nothing is ever left in writing state.
    for summary in h.store.list_summaries(run_id).unwrap() {
        let hash = summary.combination.stable_hash();
        for chunk in h.store.all_chunks(run_id, &hash).unwrap() {
            assert_ne!(chunk.status, ChunkStatus::Writing);
        }
    }
}

#[test]
fn cancel_a_queued_run_never_runs_it() {
    let h = harness();
    let a = h.write_file("a.csv", "id\n1\n");
    let b = h.write_file("b.csv", "id\n1\n");

    // Create the row directly (no enqueue) to model a still-queued run.
    let run_id = h
        .store
        .create_run(&params(a, b, 1), &StageKind::sequence(false), 0)
        .unwrap();
    assert_eq!(h.runner.cancel(run_id).unwrap(), RunStatus::Cancelled);

    let run = h.store.get_run(run_id).unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Cancelled);
    assert_eq!(run.started_at, None);
}

// ═══════════════════════════════════════════════════════════════════════════
// CONCURRENT RUNS
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn two_runs_complete_independently_with_disjoint_exports() {
    let h = harness();
    let a1 = h.write_file("a1.csv", "id\n1\n2\n");
    let b1 = h.write_file("b1.csv", "id\n2\n3\n");
    let a2 = h.write_file("a2.csv", "id\n10\n20\n");
    let b2 = h.write_file("b2.csv", "id\n20\n30\n");

    let run1 = h.runner.submit(params(a1, b1, 1)).unwrap();
    let run2 = h.runner.submit(params(a2, b2, 1)).unwrap();

    assert_eq!(h.wait_terminal(run1), RunStatus::Completed);
    assert_eq!(h.wait_terminal(run2), RunStatus::Completed);

    let exports = h.dir.path().join("exports");
    assert!(exports.join(format!("run_{run1}")).is_dir());
    assert!(exports.join(format!("run_{run2}")).is_dir());

    // Cancelling a completed run is a no-op for it and for the other.
    assert_eq!(h.runner.cancel(run1).unwrap(), RunStatus::Completed);
    assert_eq!(
        h.store.get_run(run2).unwrap().unwrap().status,
        RunStatus::Completed
    );
}

// ═══════════════════════════════════════════════════════════════════════════
// ON-DEMAND GENERATION
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn generate_export_is_idempotent() {
    let h = harness();
    let a = h.write_file("a.csv", "id,name\n1,a\n2,b\n");
    let b = h.write_file("b.csv", "id,name\n2,b\n3,c\n");

    let run_id = h.runner.submit(params(a, b, 1)).unwrap();
    assert_eq!(h.wait_terminal(run_id), RunStatus::Completed);

    let name = Combination::new(["name"]);
    h.runner.generate_export(run_id, name.clone()).unwrap();

    let deadline = Instant::now() + Duration::from_secs(30);
    let summary = loop {
        if let Some(s) = h.store.get_summary(run_id, &name).unwrap() {
            break s;
        }
        assert!(Instant::now() < deadline, "export never generated");
        std::thread::sleep(Duration::from_millis(10));
    };
    assert_eq!(summary.matched, 1);

    // Re-generating a completed pair changes nothing.
    let chunks_before = h.store.all_chunks(run_id, &name.stable_hash()).unwrap();
    let bytes_before: Vec<Vec<u8>> = chunks_before
        .iter()
        .map(|c| std::fs::read(&c.path).unwrap())
        .collect();

    h.runner.generate_export(run_id, name.clone()).unwrap();
    std::thread::sleep(Duration::from_millis(200));

    let chunks_after = h.store.all_chunks(run_id, &name.stable_hash()).unwrap();
    assert_eq!(chunks_before.len(), chunks_after.len());
    let bytes_after: Vec<Vec<u8>> = chunks_after
        .iter()
        .map(|c| std::fs::read(&c.path).unwrap())
        .collect();
    assert_eq!(bytes_before, bytes_after);

    // Unknown columns are rejected up front.
    assert!(h
        .runner
        .generate_export(run_id, Combination::new(["ghost"]))
        .is_err());
}
