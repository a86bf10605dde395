//! Property tests: reconciliation counts against a set-algebra model,
//! and key projection round-trips.

use std::collections::HashSet;
use std::fs::File;
use std::io::Write;
use std::sync::{Arc, Mutex};

use proptest::prelude::*;
use tally_analysis::reader::FileProfile;
use tally_analysis::reconcile::{ReconcileRequest, Reconciler};
use tally_core::errors::StorageError;
use tally_core::traits::IExportChunks;
use tally_core::types::results::{ChunkStatus, ExportCategory, ExportChunkMeta};
use tally_core::{Combination, RunCancellation};

/// Store stub: records rows, no behavior.
#[derive(Default)]
struct NullChunkStore(Mutex<Vec<ExportChunkMeta>>);

impl IExportChunks for NullChunkStore {
    fn begin_chunk(&self, meta: &ExportChunkMeta) -> Result<(), StorageError> {
        self.0.lock().unwrap().push(meta.clone());
        Ok(())
    }
    fn complete_chunk(
        &self,
        _: i64,
        _: &str,
        _: ExportCategory,
        _: u32,
        _: u64,
        _: u64,
    ) -> Result<(), StorageError> {
        Ok(())
    }
    fn fail_chunk(&self, _: i64, _: &str, _: ExportCategory, _: u32) -> Result<(), StorageError> {
        Ok(())
    }
    fn completed_chunks(
        &self,
        _: i64,
        _: &str,
        _: ExportCategory,
    ) -> Result<Vec<ExportChunkMeta>, StorageError> {
        Ok(Vec::new())
    }
    fn all_chunks(&self, _: i64, _: &str) -> Result<Vec<ExportChunkMeta>, StorageError> {
        Ok(Vec::new())
    }
    fn delete_chunks(&self, _: i64, _: &str) -> Result<(), StorageError> {
        self.0.lock().unwrap().clear();
        Ok(())
    }
}

fn write_side(dir: &tempfile::TempDir, name: &str, ids: &[u16]) -> FileProfile {
    let path = dir.path().join(name);
    let mut f = File::create(&path).unwrap();
    writeln!(f, "id").unwrap();
    for id in ids {
        writeln!(f, "{id}").unwrap();
    }
    FileProfile::detect(&path).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Invariant: matched + only_a = |distinct A| and matched + only_b
    /// = |distinct B|, for arbitrary multisets on both sides, in both
    /// memory modes.
    #[test]
    fn reconcile_counts_match_set_model(
        ids_a in proptest::collection::vec(0u16..200, 0..300),
        ids_b in proptest::collection::vec(0u16..200, 0..300),
        external in any::<bool>(),
    ) {
        let dir = tempfile::tempdir().unwrap();
        let profile_a = write_side(&dir, "a.csv", &ids_a);
        let profile_b = write_side(&dir, "b.csv", &ids_b);
        let combo = Combination::new(["id"]);
        let cancel = RunCancellation::new();

        let request = ReconcileRequest {
            run_id: 1,
            combination: &combo,
            profile_a: &profile_a,
            profile_b: &profile_b,
            cancellation: &cancel,
            deadline: None,
            memory_cap_keys: 1_000_000,
            partitions: 3,
            tmp_dir: dir.path().join("tmp"),
            temp_budget_bytes: u64::MAX,
            max_rows_per_chunk: 64,
            max_bytes_per_chunk: 1024 * 1024,
            cache_sample_limit: 10,
            generated_at: 0,
            progress: None,
            force_external: external,
        };
        let store = Arc::new(NullChunkStore::default());
        let out = Reconciler::reconcile(
            &request,
            dir.path().join("exports"),
            store as Arc<dyn IExportChunks>,
        )
        .unwrap();

        let set_a: HashSet<u16> = ids_a.iter().copied().collect();
        let set_b: HashSet<u16> = ids_b.iter().copied().collect();
        let matched = set_a.intersection(&set_b).count() as u64;

        prop_assert_eq!(out.summary.total_a, set_a.len() as u64);
        prop_assert_eq!(out.summary.total_b, set_b.len() as u64);
        prop_assert_eq!(out.summary.matched, matched);
        prop_assert_eq!(out.summary.matched + out.summary.only_a, out.summary.total_a);
        prop_assert_eq!(out.summary.matched + out.summary.only_b, out.summary.total_b);
    }

    /// Keys never collide for rows that differ in any field, because
    /// the separator cannot survive inside a field value.
    #[test]
    fn projected_keys_are_injective(
        a in "[a-z0-9]{0,6}",
        b in "[a-z0-9]{0,6}",
        c in "[a-z0-9]{0,6}",
        d in "[a-z0-9]{0,6}",
    ) {
        use tally_analysis::keys::project_key;
        let row1 = vec![a.clone(), b.clone()];
        let row2 = vec![c.clone(), d.clone()];
        let k1 = project_key(&row1, &[0, 1]);
        let k2 = project_key(&row2, &[0, 1]);
        if (a, b) == (c, d) {
            prop_assert_eq!(k1, k2);
        } else {
            prop_assert_ne!(k1, k2);
        }
    }
}

#[test]
fn writing_chunks_are_never_left_behind_on_success() {
    let dir = tempfile::tempdir().unwrap();
    let profile_a = write_side(&dir, "a.csv", &[1, 2, 3]);
    let profile_b = write_side(&dir, "b.csv", &[2, 3, 4]);
    let combo = Combination::new(["id"]);
    let cancel = RunCancellation::new();

    let request = ReconcileRequest {
        run_id: 1,
        combination: &combo,
        profile_a: &profile_a,
        profile_b: &profile_b,
        cancellation: &cancel,
        deadline: None,
        memory_cap_keys: 1_000_000,
        partitions: 2,
        tmp_dir: dir.path().join("tmp"),
        temp_budget_bytes: u64::MAX,
        max_rows_per_chunk: 10_000,
        max_bytes_per_chunk: 1024 * 1024,
        cache_sample_limit: 10,
        generated_at: 0,
        progress: None,
        force_external: false,
    };
    let store = Arc::new(NullChunkStore::default());
    let out = Reconciler::reconcile(
        &request,
        dir.path().join("exports"),
        Arc::clone(&store) as Arc<dyn IExportChunks>,
    )
    .unwrap();
    assert!(out
        .chunks
        .iter()
        .all(|c| c.status == ChunkStatus::Completed));
}
