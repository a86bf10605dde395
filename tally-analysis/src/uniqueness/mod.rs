//! Uniqueness scoring: one streaming pass scores every candidate
//! combination simultaneously, with an external spill mode when the
//! in-memory counters exceed the configured cap.

mod spill;

use std::path::PathBuf;

use tally_core::constants::ROWS_PER_CHECK;
use tally_core::errors::AnalysisError;
use tally_core::types::results::AnalysisResult;
use tally_core::types::side::Side;
use tally_core::{FxHashMap, RunCancellation};

use crate::discovery::{CandidateSet, Provenance};
use crate::keys::project_key;
use crate::limits::{checkpoint, Deadline};
use crate::reader::{FileProfile, Row, RowStream};

/// How one side's data is supplied.
pub enum AnalyzeMode<'a> {
    /// Stream the whole file.
    Full,
    /// Score an in-memory sample; `total_rows` is the full file count.
    Sampled { rows: &'a [Row], total_rows: u64 },
}

/// Everything one analyze call needs.
pub struct AnalyzeRequest<'a> {
    pub run_id: i64,
    pub side: Side,
    pub profile: &'a FileProfile,
    pub candidates: &'a CandidateSet,
    pub cancellation: &'a RunCancellation,
    pub deadline: Option<Deadline>,
    /// Distinct keys held in memory (across all counters) before
    /// spilling to external mode.
    pub memory_cap_keys: usize,
    pub partitions: usize,
    pub tmp_dir: PathBuf,
    pub temp_budget_bytes: u64,
}

/// The analyze output plus whether external mode was used (surfaced as
/// a stage note).
#[derive(Debug)]
pub struct AnalyzeOutcome {
    pub results: Vec<AnalysisResult>,
    pub external_mode: bool,
}

/// Raw per-combination counts before derivation.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct KeyCounts {
    pub distinct: u64,
    pub duplicate_count: u64,
}

pub struct UniquenessAnalyzer;

impl UniquenessAnalyzer {
    /// Score all candidates for one side.
    pub fn analyze(
        request: &AnalyzeRequest<'_>,
        mode: AnalyzeMode<'_>,
    ) -> Result<AnalyzeOutcome, AnalysisError> {
        let indices = combination_indices(request.profile, request.candidates)?;

        match mode {
            AnalyzeMode::Sampled { rows, total_rows } => {
                let counts = count_in_memory_rows(rows, &indices);
                let sample_size = rows.len() as u64;
                let is_sampled = sample_size != total_rows;
                Ok(AnalyzeOutcome {
                    results: build_results(request, counts, total_rows, is_sampled, sample_size),
                    external_mode: false,
                })
            }
            AnalyzeMode::Full => match count_streaming(request, &indices)? {
                StreamOutcome::Done { counts, total_rows } => Ok(AnalyzeOutcome {
                    results: build_results(request, counts, total_rows, false, total_rows),
                    external_mode: false,
                }),
                StreamOutcome::CapHit => {
                    tracing::info!(
                        run_id = request.run_id,
                        side = %request.side,
                        cap = request.memory_cap_keys,
                        "uniqueness counters hit the memory cap, switching to external mode"
                    );
                    let (counts, total_rows) = spill::count_external(request, &indices)?;
                    Ok(AnalyzeOutcome {
                        results: build_results(request, counts, total_rows, false, total_rows),
                        external_mode: true,
                    })
                }
            },
        }
    }

    /// Uniqueness (0–100) of one combination over an in-memory sample.
    /// Discovery uses this to steer its beam.
    pub fn sample_uniqueness(rows: &[Row], indices: &[usize]) -> f64 {
        if rows.is_empty() {
            return 0.0;
        }
        let mut seen: rustc_hash::FxHashSet<String> =
            rustc_hash::FxHashSet::with_capacity_and_hasher(rows.len(), Default::default());
        for row in rows {
            seen.insert(project_key(row, indices));
        }
        100.0 * seen.len() as f64 / rows.len() as f64
    }
}

/// Resolve each candidate's column indices against the header once.
pub(crate) fn combination_indices(
    profile: &FileProfile,
    candidates: &CandidateSet,
) -> Result<Vec<Vec<usize>>, AnalysisError> {
    candidates
        .combinations()
        .iter()
        .map(|c| {
            profile.column_indices(c.columns()).ok_or_else(|| {
                AnalysisError::parameter(format!(
                    "combination '{c}' references a column not present in {}",
                    profile.path.display()
                ))
            })
        })
        .collect()
}

enum StreamOutcome {
    Done {
        counts: Vec<KeyCounts>,
        total_rows: u64,
    },
    CapHit,
}

/// One pass, all combinations at once. Returns `CapHit` the moment the
/// total distinct-key population crosses the cap.
fn count_streaming(
    request: &AnalyzeRequest<'_>,
    indices: &[Vec<usize>],
) -> Result<StreamOutcome, AnalysisError> {
    let mut counters: Vec<FxHashMap<String, u32>> =
        indices.iter().map(|_| FxHashMap::default()).collect();
    let mut stored_keys = 0usize;
    let mut total_rows = 0u64;

    for row in RowStream::open(request.profile)? {
        let row = row?;
        total_rows += 1;
        if total_rows % ROWS_PER_CHECK == 0 {
            checkpoint(request.cancellation, request.deadline.as_ref())?;
        }
        for (combo, counter) in indices.iter().zip(counters.iter_mut()) {
            let key = project_key(&row, combo);
            match counter.get_mut(&key) {
                Some(count) => *count += 1,
                None => {
                    counter.insert(key, 1);
                    stored_keys += 1;
                    if stored_keys > request.memory_cap_keys {
                        return Ok(StreamOutcome::CapHit);
                    }
                }
            }
        }
    }

    let counts = counters.into_iter().map(finish_counter).collect();
    Ok(StreamOutcome::Done { counts, total_rows })
}

fn count_in_memory_rows(rows: &[Row], indices: &[Vec<usize>]) -> Vec<KeyCounts> {
    let mut counters: Vec<FxHashMap<String, u32>> =
        indices.iter().map(|_| FxHashMap::default()).collect();
    for row in rows {
        for (combo, counter) in indices.iter().zip(counters.iter_mut()) {
            *counter.entry(project_key(row, combo)).or_insert(0) += 1;
        }
    }
    counters.into_iter().map(finish_counter).collect()
}

pub(crate) fn finish_counter(counter: FxHashMap<String, u32>) -> KeyCounts {
    let distinct = counter.len() as u64;
    let duplicate_count = counter
        .values()
        .filter(|&&c| c >= 2)
        .map(|&c| c as u64)
        .sum();
    KeyCounts {
        distinct,
        duplicate_count,
    }
}

fn build_results(
    request: &AnalyzeRequest<'_>,
    counts: Vec<KeyCounts>,
    total_rows: u64,
    is_sampled: bool,
    sample_size: u64,
) -> Vec<AnalysisResult> {
    request
        .candidates
        .iter()
        .zip(counts)
        .map(|((combination, provenance), kc)| {
            AnalysisResult::from_counts(
                request.run_id,
                request.side,
                combination.clone(),
                total_rows,
                kc.distinct,
                kc.duplicate_count,
                is_sampled,
                sample_size,
                provenance == Provenance::UserPinned,
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::{DiscoveryInputs, KeyDiscovery};
    use std::io::Write;
    use tally_core::types::run::DiscoveryMode;
    use tally_core::Combination;

    fn profile_for(content: &str) -> (tempfile::TempDir, FileProfile) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("u.csv");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(content.as_bytes())
            .unwrap();
        let p = FileProfile::detect(&path).unwrap();
        (dir, p)
    }

    fn candidates_for(combos: &[Combination], pool: &[String]) -> CandidateSet {
        let promise = tally_core::FxHashMap::default();
        let inputs = DiscoveryInputs {
            pool,
            promise: &promise,
            k: 0,
            pinned: combos,
            excluded: &[],
            base: None,
            max_combinations: 50,
            mode: DiscoveryMode::Explicit,
        };
        KeyDiscovery::discover(&inputs, &mut |_| 0.0).unwrap()
    }

    fn request<'a>(
        profile: &'a FileProfile,
        candidates: &'a CandidateSet,
        cancellation: &'a RunCancellation,
        tmp: PathBuf,
        cap: usize,
    ) -> AnalyzeRequest<'a> {
        AnalyzeRequest {
            run_id: 1,
            side: Side::A,
            profile,
            candidates,
            cancellation,
            deadline: None,
            memory_cap_keys: cap,
            partitions: 4,
            tmp_dir: tmp,
            temp_budget_bytes: u64::MAX,
        }
    }

    #[test]
    fn duplicate_counting_matches_expectations() {
        // 10 rows with ("eng","ic") appearing three times.
        let (_d, p) = profile_for(
            "dept,role\n\
             eng,ic\neng,ic\neng,ic\n\
             eng,mgr\nsales,ic\nsales,mgr\nops,ic\nops,mgr\nhr,ic\nhr,mgr\n",
        );
        let pool = p.header.clone();
        let set = candidates_for(&[Combination::new(["dept", "role"])], &pool);
        let cancel = RunCancellation::new();
        let tmp = tempfile::tempdir().unwrap();
        let req = request(&p, &set, &cancel, tmp.path().to_path_buf(), 1_000_000);
        let out = UniquenessAnalyzer::analyze(&req, AnalyzeMode::Full).unwrap();
        let r = &out.results[0];
        assert_eq!(r.total_rows, 10);
        assert_eq!(r.unique_rows, 8);
        assert_eq!(r.duplicate_rows, 2);
        assert_eq!(r.duplicate_count, 3);
        assert!((r.uniqueness_score - 80.0).abs() < 1e-9);
        assert!(!r.is_unique_key);
        assert!(!out.external_mode);
    }

    #[test]
    fn unique_key_is_detected_on_full_data() {
        let (_d, p) = profile_for("id,name\n1,a\n2,b\n3,c\n");
        let pool = p.header.clone();
        let set = candidates_for(&[Combination::new(["id"])], &pool);
        let cancel = RunCancellation::new();
        let tmp = tempfile::tempdir().unwrap();
        let req = request(&p, &set, &cancel, tmp.path().to_path_buf(), 1_000_000);
        let out = UniquenessAnalyzer::analyze(&req, AnalyzeMode::Full).unwrap();
        assert!(out.results[0].is_unique_key);
        assert_eq!(out.results[0].uniqueness_score, 100.0);
    }

    #[test]
    fn all_candidates_scored_in_one_pass() {
        let (_d, p) = profile_for("a,b,c\n1,x,q\n2,x,q\n3,y,q\n");
        let pool = p.header.clone();
        let set = candidates_for(
            &[
                Combination::new(["a"]),
                Combination::new(["b"]),
                Combination::new(["a", "b"]),
            ],
            &pool,
        );
        let cancel = RunCancellation::new();
        let tmp = tempfile::tempdir().unwrap();
        let req = request(&p, &set, &cancel, tmp.path().to_path_buf(), 1_000_000);
        let out = UniquenessAnalyzer::analyze(&req, AnalyzeMode::Full).unwrap();
        assert_eq!(out.results.len(), 3);
        assert!(out.results[0].is_unique_key); // a
        assert!(!out.results[1].is_unique_key); // b: {x,x,y}
        assert!(out.results[2].is_unique_key); // (a,b)
    }

    #[test]
    fn external_mode_produces_identical_counts() {
        let mut content = String::from("id,grp\n");
        for i in 0..500 {
            content.push_str(&format!("{i},{}\n", i % 7));
        }
        // One duplicated id.
        content.push_str("42,0\n");
        let (_d, p) = profile_for(&content);
        let pool = p.header.clone();
        let set = candidates_for(
            &[Combination::new(["id"]), Combination::new(["grp"])],
            &pool,
        );
        let cancel = RunCancellation::new();
        let tmp = tempfile::tempdir().unwrap();

        // Generous cap: in-memory path.
        let req = request(&p, &set, &cancel, tmp.path().join("m"), 1_000_000);
        let mem = UniquenessAnalyzer::analyze(&req, AnalyzeMode::Full).unwrap();
        assert!(!mem.external_mode);

        // Tiny cap: spills.
        let req = request(&p, &set, &cancel, tmp.path().join("x"), 64);
        let ext = UniquenessAnalyzer::analyze(&req, AnalyzeMode::Full).unwrap();
        assert!(ext.external_mode);

        for (m, e) in mem.results.iter().zip(&ext.results) {
            assert_eq!(m.total_rows, e.total_rows);
            assert_eq!(m.unique_rows, e.unique_rows);
            assert_eq!(m.duplicate_count, e.duplicate_count);
        }
        assert_eq!(ext.results[0].unique_rows, 501);
        assert_eq!(ext.results[0].duplicate_count, 2);
    }

    #[test]
    fn sampled_results_are_marked_and_never_unique() {
        let (_d, p) = profile_for("id\n1\n2\n3\n4\n5\n");
        let pool = p.header.clone();
        let set = candidates_for(&[Combination::new(["id"])], &pool);
        let cancel = RunCancellation::new();
        let tmp = tempfile::tempdir().unwrap();
        let req = request(&p, &set, &cancel, tmp.path().to_path_buf(), 1_000_000);
        let rows: Vec<Row> = vec![vec!["1".into()], vec!["2".into()], vec!["3".into()]];
        let out = UniquenessAnalyzer::analyze(
            &req,
            AnalyzeMode::Sampled {
                rows: &rows,
                total_rows: 5,
            },
        )
        .unwrap();
        let r = &out.results[0];
        assert!(r.is_sampled);
        assert!(!r.is_unique_key);
        assert_eq!(r.sample_size, 3);
        assert_eq!(r.total_rows, 5);
        assert_eq!(r.uniqueness_score, 100.0);
    }

    #[test]
    fn cancellation_stops_the_stream() {
        let mut content = String::from("id\n");
        for i in 0..(ROWS_PER_CHECK * 2) {
            content.push_str(&format!("{i}\n"));
        }
        let (_d, p) = profile_for(&content);
        let pool = p.header.clone();
        let set = candidates_for(&[Combination::new(["id"])], &pool);
        let cancel = RunCancellation::new();
        cancel.cancel();
        let tmp = tempfile::tempdir().unwrap();
        let req = request(&p, &set, &cancel, tmp.path().to_path_buf(), 1_000_000);
        let err = UniquenessAnalyzer::analyze(&req, AnalyzeMode::Full).unwrap_err();
        assert!(matches!(err, AnalysisError::Cancelled));
    }
}
