//! Storage engine integration tests: run lifecycle, CAS transitions,
//! result pagination, chunk lifecycle, corruption tolerance, retention.

use tally_core::traits::{IAnalysisResults, IComparisons, IExportChunks, IRuns, IStages};
use tally_core::types::results::{
    AnalysisResult, ChunkStatus, ComparisonSummary, ExportCategory, ExportChunkMeta,
};
use tally_core::types::run::{RunParams, RunStatus, StageKind, StageStatus};
use tally_core::types::side::Side;
use tally_core::Combination;
use tally_storage::TallyStorageEngine;

// ─── Helpers ───────────────────────────────────────────────────────────────

fn params() -> RunParams {
    RunParams {
        file_a: "/data/a.csv".into(),
        file_b: "/data/b.csv".into(),
        num_columns: 2,
        expected_combinations: vec![Combination::new(["id"])],
        excluded_combinations: vec![],
        max_rows: 0,
        data_quality_check: true,
        use_intelligent_discovery: false,
    }
}

fn create(engine: &TallyStorageEngine) -> i64 {
    engine
        .create_run(&params(), &StageKind::sequence(true), 1_000)
        .unwrap()
}

fn result(run_id: i64, side: Side, cols: &[&str], unique: u64, total: u64) -> AnalysisResult {
    AnalysisResult::from_counts(
        run_id,
        side,
        Combination::new(cols.iter().copied()),
        total,
        unique,
        0,
        false,
        total,
        false,
    )
}

// ═══════════════════════════════════════════════════════════════════════════
// RUNS & STAGES
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn create_run_persists_params_and_pending_stages() {
    let engine = TallyStorageEngine::open_in_memory().unwrap();
    let run_id = create(&engine);
    assert!(run_id >= 1);

    let run = engine.get_run(run_id).unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Queued);
    assert_eq!(run.progress, 0);
    assert_eq!(run.params.file_a, "/data/a.csv");
    assert_eq!(run.params.expected_combinations, vec![Combination::new(["id"])]);
    assert!(run.params.data_quality_check);

    let stages = engine.get_stages(run_id).unwrap();
    assert_eq!(stages.len(), 8);
    assert!(stages.iter().all(|s| s.status == StageStatus::Pending));
    assert_eq!(stages[0].kind, StageKind::Reading);
    assert_eq!(stages[1].kind, StageKind::Quality);
    assert_eq!(stages.last().unwrap().kind, StageKind::GenerateComparisons);
}

#[test]
fn run_ids_are_monotonic() {
    let engine = TallyStorageEngine::open_in_memory().unwrap();
    let first = create(&engine);
    let second = create(&engine);
    assert!(second > first);
}

#[test]
fn cas_status_is_exclusive() {
    let engine = TallyStorageEngine::open_in_memory().unwrap();
    let run_id = create(&engine);

    assert!(engine
        .cas_status(run_id, RunStatus::Queued, RunStatus::Running, 2_000)
        .unwrap());
    // A second queued→running loses.
    assert!(!engine
        .cas_status(run_id, RunStatus::Queued, RunStatus::Running, 2_001)
        .unwrap());
    // Cancel on a running run wins exactly once.
    assert!(engine
        .cas_status(run_id, RunStatus::Running, RunStatus::Cancelled, 3_000)
        .unwrap());
    assert!(!engine
        .cas_status(run_id, RunStatus::Running, RunStatus::Completed, 3_001)
        .unwrap());

    let run = engine.get_run(run_id).unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Cancelled);
    assert_eq!(run.started_at, Some(2_000));
    assert_eq!(run.completed_at, Some(3_000));
}

#[test]
fn progress_never_regresses() {
    let engine = TallyStorageEngine::open_in_memory().unwrap();
    let run_id = create(&engine);
    engine.set_progress(run_id, 40, StageKind::AnalyzeA).unwrap();
    engine.set_progress(run_id, 20, StageKind::Validating).unwrap();
    let run = engine.get_run(run_id).unwrap().unwrap();
    assert_eq!(run.progress, 40);
}

#[test]
fn stage_transitions_and_notes() {
    let engine = TallyStorageEngine::open_in_memory().unwrap();
    let run_id = create(&engine);

    engine.stage_started(run_id, StageKind::Reading, 10).unwrap();
    engine.stage_completed(run_id, StageKind::Reading, 20).unwrap();
    engine
        .stage_note(run_id, StageKind::AnalyzeA, "switched to external counting")
        .unwrap();
    engine
        .stage_finished(
            run_id,
            StageKind::AnalyzeA,
            StageStatus::Cancelled,
            Some("cancelled by user"),
            30,
        )
        .unwrap();

    let stages = engine.get_stages(run_id).unwrap();
    let reading = stages.iter().find(|s| s.kind == StageKind::Reading).unwrap();
    assert_eq!(reading.status, StageStatus::Completed);
    assert_eq!(reading.started_at, Some(10));
    assert_eq!(reading.completed_at, Some(20));

    let analyze = stages.iter().find(|s| s.kind == StageKind::AnalyzeA).unwrap();
    assert_eq!(analyze.status, StageStatus::Cancelled);
    let details = analyze.details.as_deref().unwrap();
    assert!(details.contains("external counting"));
    assert!(details.contains("cancelled by user"));
}

// ═══════════════════════════════════════════════════════════════════════════
// RESULTS
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn results_upsert_and_paginate_by_score() {
    let engine = TallyStorageEngine::open_in_memory().unwrap();
    let run_id = create(&engine);

    let results = vec![
        result(run_id, Side::A, &["dept"], 5, 10),
        result(run_id, Side::A, &["id"], 10, 10),
        result(run_id, Side::A, &["dept", "role"], 8, 10),
        result(run_id, Side::B, &["id"], 9, 9),
    ];
    assert_eq!(engine.upsert_results(&results).unwrap(), 4);
    assert_eq!(engine.count_results(run_id, Side::A).unwrap(), 3);

    let page = engine.page_results(run_id, Side::A, 0, 2).unwrap();
    assert_eq!(page.len(), 2);
    assert_eq!(page[0].combination, Combination::new(["id"]));
    assert!(page[0].is_unique_key);
    assert_eq!(page[1].combination, Combination::new(["dept", "role"]));

    let rest = engine.page_results(run_id, Side::A, 2, 2).unwrap();
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].combination, Combination::new(["dept"]));

    // Upsert with the same natural key replaces, not duplicates.
    engine
        .upsert_results(&[result(run_id, Side::A, &["id"], 9, 10)])
        .unwrap();
    assert_eq!(engine.count_results(run_id, Side::A).unwrap(), 3);
    let updated = engine
        .get_result(run_id, Side::A, &Combination::new(["id"]))
        .unwrap()
        .unwrap();
    assert_eq!(updated.unique_rows, 9);
    assert!(!updated.is_unique_key);
}

// ═══════════════════════════════════════════════════════════════════════════
// SUMMARIES & CHUNKS
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn summary_round_trip() {
    let engine = TallyStorageEngine::open_in_memory().unwrap();
    let run_id = create(&engine);
    let combo = Combination::new(["id"]);

    let summary = ComparisonSummary {
        run_id,
        combination: combo.clone(),
        matched: 999_990,
        only_a: 10,
        only_b: 0,
        total_a: 1_000_000,
        total_b: 999_990,
        generated_at: 5_000,
    };
    engine.upsert_summary(&summary).unwrap();

    let loaded = engine.get_summary(run_id, &combo).unwrap().unwrap();
    assert_eq!(loaded.matched, 999_990);
    assert_eq!(loaded.matched + loaded.only_a, loaded.total_a);
    assert_eq!(engine.list_summaries(run_id).unwrap().len(), 1);
}

#[test]
fn chunk_lifecycle_enforces_single_transition() {
    let engine = TallyStorageEngine::open_in_memory().unwrap();
    let run_id = create(&engine);
    let hash = Combination::new(["id"]).stable_hash();

    let meta = ExportChunkMeta {
        run_id,
        combination_hash: hash.clone(),
        category: ExportCategory::OnlyA,
        chunk_index: 1,
        row_count: 0,
        byte_size: 0,
        path: "/exports/only_a_chunk_0001.csv".into(),
        status: ChunkStatus::Writing,
    };
    engine.begin_chunk(&meta).unwrap();

    // Writing chunks are not readable.
    assert!(engine
        .completed_chunks(run_id, &hash, ExportCategory::OnlyA)
        .unwrap()
        .is_empty());

    engine
        .complete_chunk(run_id, &hash, ExportCategory::OnlyA, 1, 10, 120)
        .unwrap();
    let chunks = engine
        .completed_chunks(run_id, &hash, ExportCategory::OnlyA)
        .unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].row_count, 10);

    // A second completion attempt finds no writing row.
    assert!(engine
        .complete_chunk(run_id, &hash, ExportCategory::OnlyA, 1, 10, 120)
        .is_err());

    // fail_chunk only touches writing rows.
    engine
        .fail_chunk(run_id, &hash, ExportCategory::OnlyA, 1)
        .unwrap();
    assert_eq!(
        engine
            .completed_chunks(run_id, &hash, ExportCategory::OnlyA)
            .unwrap()
            .len(),
        1
    );

    engine.delete_chunks(run_id, &hash).unwrap();
    assert!(engine.all_chunks(run_id, &hash).unwrap().is_empty());
}

// ═══════════════════════════════════════════════════════════════════════════
// CORRUPTION TOLERANCE
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn blob_in_text_field_reads_back_as_string() {
    let engine = TallyStorageEngine::open_in_memory().unwrap();
    let run_id = create(&engine);

    // Simulate the bytes-where-text-expected defect directly.
    engine
        .with_writer(|conn| {
            conn.execute(
                "UPDATE runs SET error_message = ?2, progress = ?3 WHERE run_id = ?1",
                rusqlite::params![run_id, &[0x66u8, 0xff, 0x6f][..], "not-a-number"],
            )
            .map_err(tally_core::errors::StorageError::from)?;
            Ok(())
        })
        .unwrap();

    // Reads must not fail; values coerce.
    let run = engine.get_run(run_id).unwrap().unwrap();
    let message = run.error_message.unwrap();
    assert!(message.starts_with('f') && message.ends_with('o'));
    assert_eq!(run.progress, 0);
}

// ═══════════════════════════════════════════════════════════════════════════
// RETENTION
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn retention_purges_expired_terminal_runs_only() {
    let dir = tempfile::tempdir().unwrap();
    let engine = TallyStorageEngine::open(&dir.path().join("store.db")).unwrap();

    let old_done = create(&engine);
    let old_running = create(&engine);
    let fresh = engine
        .create_run(&params(), &StageKind::sequence(false), 10_000)
        .unwrap();

    engine
        .cas_status(old_done, RunStatus::Queued, RunStatus::Running, 1_100)
        .unwrap();
    engine
        .cas_status(old_done, RunStatus::Running, RunStatus::Completed, 1_200)
        .unwrap();
    engine
        .cas_status(old_running, RunStatus::Queued, RunStatus::Running, 1_100)
        .unwrap();

    // Artifacts for the expired run.
    let exports = dir.path().join("exports");
    let cache = dir.path().join("cache");
    std::fs::create_dir_all(exports.join(format!("run_{old_done}/comparison_x"))).unwrap();
    std::fs::create_dir_all(&cache).unwrap();
    std::fs::write(cache.join(format!("run_{old_done}_x.json")), b"{}").unwrap();

    let purged =
        tally_storage::retention::purge_expired(&engine, &exports, &cache, 5_000).unwrap();
    assert_eq!(purged, vec![old_done]);
    assert!(engine.get_run(old_done).unwrap().is_none());
    // Non-terminal and fresh runs survive.
    assert!(engine.get_run(old_running).unwrap().is_some());
    assert!(engine.get_run(fresh).unwrap().is_some());
    // Artifacts removed together.
    assert!(!exports.join(format!("run_{old_done}")).exists());
    assert!(!cache.join(format!("run_{old_done}_x.json")).exists());
}
