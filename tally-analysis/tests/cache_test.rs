//! Comparison cache tests: round-trip, corruption tolerance, and
//! rebuild from export chunks.

use std::fs::File;
use std::io::Write;

use tally_analysis::cache::ComparisonCache;
use tally_core::types::results::{
    CacheEntry, ChunkStatus, ComparisonSummary, ExportCategory, ExportChunkMeta,
};
use tally_core::Combination;

fn summary(run_id: i64, combo: &Combination) -> ComparisonSummary {
    ComparisonSummary {
        run_id,
        combination: combo.clone(),
        matched: 2,
        only_a: 1,
        only_b: 1,
        total_a: 3,
        total_b: 3,
        generated_at: 1_700_000_000_000,
    }
}

#[test]
fn store_then_load_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let cache = ComparisonCache::new(dir.path().join("cache")).unwrap();
    let combo = Combination::new(["id"]);

    let entry = CacheEntry {
        summary: summary(7, &combo),
        sample_matched: vec!["2".into(), "3".into()],
        sample_only_a: vec!["1".into()],
        sample_only_b: vec!["4".into()],
    };
    cache.store(&entry).unwrap();

    let loaded = cache.load(7, &combo).unwrap().unwrap();
    assert_eq!(loaded.summary.matched, 2);
    assert_eq!(loaded.sample_matched, vec!["2", "3"]);

    // Missing entries are None, not errors.
    assert!(cache.load(8, &combo).unwrap().is_none());
}

#[test]
fn list_run_returns_only_that_runs_entries() {
    let dir = tempfile::tempdir().unwrap();
    let cache = ComparisonCache::new(dir.path().join("cache")).unwrap();
    let c1 = Combination::new(["id"]);
    let c2 = Combination::new(["dept", "role"]);

    for (run, combo) in [(1, &c1), (1, &c2), (2, &c1)] {
        cache
            .store(&CacheEntry {
                summary: summary(run, combo),
                sample_matched: vec![],
                sample_only_a: vec![],
                sample_only_b: vec![],
            })
            .unwrap();
    }
    assert_eq!(cache.list_run(1).unwrap().len(), 2);
    assert_eq!(cache.list_run(2).unwrap().len(), 1);

    cache.remove_run(1).unwrap();
    assert!(cache.list_run(1).unwrap().is_empty());
    assert_eq!(cache.list_run(2).unwrap().len(), 1);
}

#[test]
fn corrupt_entry_is_an_error_for_load_but_skipped_by_list() {
    let dir = tempfile::tempdir().unwrap();
    let cache = ComparisonCache::new(dir.path().join("cache")).unwrap();
    let combo = Combination::new(["id"]);

    let path = cache.entry_path(5, &combo.stable_hash());
    File::create(&path)
        .unwrap()
        .write_all(b"{not json")
        .unwrap();

    assert!(cache.load(5, &combo).is_err());
    assert!(cache.list_run(5).unwrap().is_empty());
}

#[test]
fn rebuild_from_chunks_restores_summary_and_samples() {
    let dir = tempfile::tempdir().unwrap();
    let cache = ComparisonCache::new(dir.path().join("cache")).unwrap();
    let combo = Combination::new(["id"]);

    // Handcraft a completed matched chunk.
    let chunk_path = dir.path().join("matched_chunk_0001.csv");
    File::create(&chunk_path)
        .unwrap()
        .write_all(b"key_id,id,name\n2,2,b\n3,3,c\n")
        .unwrap();
    let matched_chunks = vec![ExportChunkMeta {
        run_id: 9,
        combination_hash: combo.stable_hash(),
        category: ExportCategory::Matched,
        chunk_index: 1,
        row_count: 2,
        byte_size: 30,
        path: chunk_path.display().to_string(),
        status: ChunkStatus::Completed,
    }];

    let entry = cache
        .rebuild(
            summary(9, &combo),
            &move |category| match category {
                ExportCategory::Matched => matched_chunks.clone(),
                _ => Vec::new(),
            },
            100,
        )
        .unwrap();

    assert_eq!(entry.sample_matched, vec!["2", "3"]);
    assert!(entry.sample_only_a.is_empty());
    // The rebuilt entry is persisted.
    let loaded = cache.load(9, &combo).unwrap().unwrap();
    assert_eq!(loaded.sample_matched, vec!["2", "3"]);
}
