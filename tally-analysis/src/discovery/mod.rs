//! Candidate key discovery.
//!
//! Emits bare combinations — uniqueness scores live in the analyzer's
//! results, never on the combinations themselves. User-pinned
//! combinations are always included and labeled.

pub mod guard;

use tally_core::constants::{
    INTELLIGENT_BEAM_WIDTH, INTELLIGENT_MAX_SIZE, INTELLIGENT_MAX_TESTED,
    INTELLIGENT_POOL_CAP, INTELLIGENT_POOL_THRESHOLD,
};
use tally_core::errors::AnalysisError;
use tally_core::types::run::DiscoveryMode;
use tally_core::{Combination, FxHashMap, FxHashSet};

/// Where a candidate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    UserPinned,
    Discovered,
}

/// The discovery output: combinations plus parallel provenance labels.
#[derive(Debug, Default)]
pub struct CandidateSet {
    combinations: Vec<Combination>,
    provenance: Vec<Provenance>,
}

impl CandidateSet {
    /// Append, deduplicating by combination identity. A pinned label
    /// wins over a discovered one for the same member set.
    fn push(&mut self, combination: Combination, provenance: Provenance) {
        if let Some(pos) = self.combinations.iter().position(|c| *c == combination) {
            if provenance == Provenance::UserPinned {
                self.provenance[pos] = Provenance::UserPinned;
            }
            return;
        }
        self.combinations.push(combination);
        self.provenance.push(provenance);
    }

    pub fn len(&self) -> usize {
        self.combinations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.combinations.is_empty()
    }

    pub fn combinations(&self) -> &[Combination] {
        &self.combinations
    }

    pub fn provenance(&self, index: usize) -> Provenance {
        self.provenance[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Combination, Provenance)> {
        self.combinations.iter().zip(self.provenance.iter().copied())
    }
}

/// Inputs to a discovery pass. Promise scores are per-column on the
/// smaller side.
pub struct DiscoveryInputs<'a> {
    pub pool: &'a [String],
    pub promise: &'a FxHashMap<String, f64>,
    pub k: usize,
    pub pinned: &'a [Combination],
    pub excluded: &'a [Combination],
    pub base: Option<&'a Combination>,
    pub max_combinations: usize,
    pub mode: DiscoveryMode,
}

pub struct KeyDiscovery;

impl KeyDiscovery {
    /// Pick the mode for a run.
    ///
    /// Explicit is a library-level mode for callers that want exactly
    /// their own list (`k == 0` with pinned combinations); the gateway
    /// always submits `k ≥ 1`. Intelligent is forced by user opt-in, a
    /// large pool, or the enumeration guard — the guard never fails the
    /// run.
    pub fn resolve_mode(
        k: usize,
        pool_len: usize,
        has_pinned: bool,
        intelligent_opt_in: bool,
    ) -> DiscoveryMode {
        if k == 0 && has_pinned {
            return DiscoveryMode::Explicit;
        }
        if intelligent_opt_in
            || pool_len > INTELLIGENT_POOL_THRESHOLD
            || !guard::enumeration_allowed(pool_len, k)
        {
            return DiscoveryMode::Intelligent;
        }
        DiscoveryMode::Heuristic
    }

    /// Produce the bounded candidate sequence.
    ///
    /// `sample_uniqueness` scores a combination's uniqueness (0–100) on
    /// the smaller side's sample; intelligent mode uses it to steer the
    /// beam.
    pub fn discover(
        inputs: &DiscoveryInputs<'_>,
        sample_uniqueness: &mut dyn FnMut(&Combination) -> f64,
    ) -> Result<CandidateSet, AnalysisError> {
        validate(inputs)?;

        let mut set = CandidateSet::default();
        for pinned in inputs.pinned {
            set.push(pinned.clone(), Provenance::UserPinned);
        }
        if inputs.mode == DiscoveryMode::Explicit {
            return Ok(set);
        }

        let excluded: FxHashSet<&Combination> = inputs.excluded.iter().collect();
        match inputs.mode {
            DiscoveryMode::Heuristic => heuristic(inputs, &excluded, &mut set),
            DiscoveryMode::Intelligent => {
                intelligent(inputs, &excluded, sample_uniqueness, &mut set)
            }
            DiscoveryMode::Explicit => unreachable!("handled above"),
        }
        Ok(set)
    }
}

fn validate(inputs: &DiscoveryInputs<'_>) -> Result<(), AnalysisError> {
    if inputs.pool.is_empty() {
        return Err(AnalysisError::parameter(
            "column pool is empty: files share no header columns",
        ));
    }
    if inputs.mode != DiscoveryMode::Explicit && inputs.k > inputs.pool.len() {
        return Err(AnalysisError::parameter(format!(
            "num_columns {} exceeds the {}-column pool",
            inputs.k,
            inputs.pool.len()
        )));
    }
    let known: FxHashSet<&str> = inputs.pool.iter().map(String::as_str).collect();
    for combination in inputs.pinned.iter().chain(inputs.excluded.iter()) {
        for col in combination.columns() {
            if !known.contains(col.as_str()) {
                return Err(AnalysisError::parameter(format!(
                    "combination '{combination}' references unknown column '{col}'"
                )));
            }
        }
    }
    if let Some(base) = inputs.base {
        for col in base.columns() {
            if !known.contains(col.as_str()) {
                return Err(AnalysisError::parameter(format!(
                    "base combination references unknown column '{col}'"
                )));
            }
        }
    }
    Ok(())
}

/// Enumerate every k-subset, rank by summed promise on the smaller
/// side, keep the top `max_combinations`. Only reached when the guard
/// allowed enumeration.
fn heuristic(
    inputs: &DiscoveryInputs<'_>,
    excluded: &FxHashSet<&Combination>,
    set: &mut CandidateSet,
) {
    let mut subsets: Vec<Combination> = Vec::new();
    let mut current: Vec<usize> = Vec::with_capacity(inputs.k);
    enumerate_subsets(inputs.pool.len(), inputs.k, 0, &mut current, &mut |indices| {
        subsets.push(Combination::new(indices.iter().map(|&i| inputs.pool[i].clone())));
    });

    let promise_sum = |c: &Combination| -> f64 {
        c.columns()
            .iter()
            .map(|col| inputs.promise.get(col).copied().unwrap_or(0.0))
            .sum()
    };

    subsets.retain(|c| !excluded.contains(c));
    if let Some(base) = inputs.base {
        subsets.retain(|c| c.is_superset_of(base));
    }
    subsets.sort_by(|a, b| {
        promise_sum(b)
            .partial_cmp(&promise_sum(a))
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.sorted_columns().cmp(&b.sorted_columns()))
    });

    for combination in subsets.into_iter().take(inputs.max_combinations) {
        set.push(combination, Provenance::Discovered);
    }
}

fn enumerate_subsets(
    n: usize,
    k: usize,
    start: usize,
    current: &mut Vec<usize>,
    emit: &mut impl FnMut(&[usize]),
) {
    if current.len() == k {
        emit(current);
        return;
    }
    let remaining = k - current.len();
    for i in start..=(n - remaining) {
        current.push(i);
        enumerate_subsets(n, k, i + 1, current, emit);
        current.pop();
    }
}

/// Sample-uniqueness threshold a candidate must meet to survive a beam
/// round, by combination size.
fn survival_threshold(size: usize) -> f64 {
    match size {
        0 | 1 | 2 => 50.0,
        3 => 60.0,
        4 => 70.0,
        _ => 80.0,
    }
}

/// Beam search that never enumerates C(n, k): reduce the pool to the
/// most promising columns, grow combinations one column at a time, keep
/// the best survivors per size, stop on a perfect key or the size cap.
fn intelligent(
    inputs: &DiscoveryInputs<'_>,
    excluded: &FxHashSet<&Combination>,
    sample_uniqueness: &mut dyn FnMut(&Combination) -> f64,
    set: &mut CandidateSet,
) {
    // Pool reduction: top P by promise, name as tiebreak.
    let mut ranked: Vec<&String> = inputs.pool.iter().collect();
    ranked.sort_by(|a, b| {
        let pa = inputs.promise.get(*a).copied().unwrap_or(0.0);
        let pb = inputs.promise.get(*b).copied().unwrap_or(0.0);
        pb.partial_cmp(&pa)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.cmp(b))
    });
    ranked.truncate(INTELLIGENT_POOL_CAP);
    let reduced: Vec<String> = ranked.into_iter().cloned().collect();

    let mut tested = 0usize;
    let mut scored: Vec<(Combination, f64)> = Vec::new();
    let mut seen: FxHashSet<Combination> = FxHashSet::default();

    // Seed the frontier: extensions of the base if given, else pairs.
    // A requested size of 1 also seeds the single columns, which the
    // size-2 default would otherwise never test.
    let mut frontier: Vec<Combination> = match inputs.base {
        Some(base) if !base.is_empty() => reduced
            .iter()
            .filter_map(|col| base.extended(col))
            .collect(),
        _ => {
            let mut seed = Vec::new();
            if inputs.k == 1 {
                seed.extend(reduced.iter().map(|c| Combination::new([c.clone()])));
            }
            for i in 0..reduced.len() {
                for j in (i + 1)..reduced.len() {
                    seed.push(Combination::new([reduced[i].clone(), reduced[j].clone()]));
                }
            }
            seed
        }
    };

    'sizes: loop {
        let mut survivors: Vec<(Combination, f64)> = Vec::new();
        let mut perfect = false;

        for candidate in frontier.drain(..) {
            if tested >= INTELLIGENT_MAX_TESTED {
                break;
            }
            if excluded.contains(&candidate) || !seen.insert(candidate.clone()) {
                continue;
            }
            let uniqueness = sample_uniqueness(&candidate);
            tested += 1;
            if uniqueness >= survival_threshold(candidate.len()) {
                if uniqueness >= 100.0 {
                    perfect = true;
                }
                survivors.push((candidate, uniqueness));
            }
        }

        survivors.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.len().cmp(&b.0.len()))
                .then_with(|| a.0.sorted_columns().cmp(&b.0.sorted_columns()))
        });
        survivors.truncate(INTELLIGENT_BEAM_WIDTH);

        let next_size = survivors.first().map(|(c, _)| c.len() + 1).unwrap_or(0);
        let expand = !perfect
            && !survivors.is_empty()
            && next_size <= INTELLIGENT_MAX_SIZE
            && tested < INTELLIGENT_MAX_TESTED;

        if expand {
            for (survivor, _) in &survivors {
                for col in &reduced {
                    if let Some(extended) = survivor.extended(col) {
                        frontier.push(extended);
                    }
                }
            }
        }

        scored.extend(survivors);

        if !expand || frontier.is_empty() {
            break 'sizes;
        }
    }

    // Deterministic ordering: sample uniqueness desc, size asc, lex.
    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.len().cmp(&b.0.len()))
            .then_with(|| a.0.sorted_columns().cmp(&b.0.sorted_columns()))
    });

    for (combination, _) in scored.into_iter().take(inputs.max_combinations) {
        set.push(combination, Provenance::Discovered);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn promise(pairs: &[(&str, f64)]) -> FxHashMap<String, f64> {
        pairs.iter().map(|(n, p)| (n.to_string(), *p)).collect()
    }

    fn pool(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn heuristic_emits_ranked_k_subsets_without_scores() {
        let pool = pool(&["a", "b", "c"]);
        let promise = promise(&[("a", 0.9), ("b", 0.5), ("c", 0.1)]);
        let inputs = DiscoveryInputs {
            pool: &pool,
            promise: &promise,
            k: 2,
            pinned: &[],
            excluded: &[],
            base: None,
            max_combinations: 10,
            mode: DiscoveryMode::Heuristic,
        };
        let set = KeyDiscovery::discover(&inputs, &mut |_| 0.0).unwrap();
        assert_eq!(set.len(), 3);
        // Highest summed promise first.
        assert_eq!(set.combinations()[0], Combination::new(["a", "b"]));
        assert!(set.iter().all(|(_, p)| p == Provenance::Discovered));
    }

    #[test]
    fn pinned_combinations_are_always_included_and_labeled() {
        let pool = pool(&["a", "b", "c"]);
        let promise = promise(&[("a", 0.5), ("b", 0.5), ("c", 0.5)]);
        let pinned = vec![Combination::new(["c"])];
        let inputs = DiscoveryInputs {
            pool: &pool,
            promise: &promise,
            k: 2,
            pinned: &pinned,
            excluded: &[],
            base: None,
            max_combinations: 2,
            mode: DiscoveryMode::Heuristic,
        };
        let set = KeyDiscovery::discover(&inputs, &mut |_| 0.0).unwrap();
        assert_eq!(set.provenance(0), Provenance::UserPinned);
        assert_eq!(set.combinations()[0], Combination::new(["c"]));
    }

    #[test]
    fn excluded_combinations_are_never_discovered() {
        let pool = pool(&["a", "b", "c"]);
        let promise = promise(&[("a", 0.9), ("b", 0.8), ("c", 0.1)]);
        let excluded = vec![Combination::new(["a", "b"])];
        let inputs = DiscoveryInputs {
            pool: &pool,
            promise: &promise,
            k: 2,
            pinned: &[],
            excluded: &excluded,
            base: None,
            max_combinations: 10,
            mode: DiscoveryMode::Heuristic,
        };
        let set = KeyDiscovery::discover(&inputs, &mut |_| 0.0).unwrap();
        assert!(!set.combinations().contains(&Combination::new(["a", "b"])));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn k_larger_than_pool_is_a_parameter_error() {
        let pool = pool(&["a", "b"]);
        let promise = promise(&[]);
        let inputs = DiscoveryInputs {
            pool: &pool,
            promise: &promise,
            k: 3,
            pinned: &[],
            excluded: &[],
            base: None,
            max_combinations: 10,
            mode: DiscoveryMode::Heuristic,
        };
        let err = KeyDiscovery::discover(&inputs, &mut |_| 0.0).unwrap_err();
        assert!(matches!(err, AnalysisError::Parameter { .. }));
        assert!(err.to_string().contains('3'));
    }

    #[test]
    fn unknown_column_in_pinned_is_a_parameter_error() {
        let pool = pool(&["a", "b"]);
        let promise = promise(&[]);
        let pinned = vec![Combination::new(["ghost"])];
        let inputs = DiscoveryInputs {
            pool: &pool,
            promise: &promise,
            k: 1,
            pinned: &pinned,
            excluded: &[],
            base: None,
            max_combinations: 10,
            mode: DiscoveryMode::Heuristic,
        };
        let err = KeyDiscovery::discover(&inputs, &mut |_| 0.0).unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn large_pool_forces_intelligent_mode() {
        let mode = KeyDiscovery::resolve_mode(5, 300, false, false);
        assert_eq!(mode, DiscoveryMode::Intelligent);
        // Guard also forces it when the pool is small but C(n, k) huge.
        let mode = KeyDiscovery::resolve_mode(10, 40, false, false);
        assert_eq!(mode, DiscoveryMode::Intelligent);
        let mode = KeyDiscovery::resolve_mode(2, 10, false, false);
        assert_eq!(mode, DiscoveryMode::Heuristic);
    }

    #[test]
    fn intelligent_stays_under_the_test_budget() {
        let names: Vec<String> = (0..300).map(|i| format!("col{i:03}")).collect();
        let promise: FxHashMap<String, f64> =
            names.iter().map(|n| (n.clone(), 0.5)).collect();
        let inputs = DiscoveryInputs {
            pool: &names,
            promise: &promise,
            k: 5,
            pinned: &[],
            excluded: &[],
            base: None,
            max_combinations: 50,
            mode: DiscoveryMode::Intelligent,
        };
        let mut tested = 0usize;
        let set = KeyDiscovery::discover(&inputs, &mut |_| {
            tested += 1;
            60.0
        })
        .unwrap();
        assert!(tested <= INTELLIGENT_MAX_TESTED, "tested {tested}");
        assert!(!set.is_empty());
        assert!(set.len() <= 50);
    }

    #[test]
    fn intelligent_stops_on_a_perfect_key() {
        let names = pool(&["a", "b", "c", "d"]);
        let promise: FxHashMap<String, f64> =
            names.iter().map(|n| (n.clone(), 0.5)).collect();
        let inputs = DiscoveryInputs {
            pool: &names,
            promise: &promise,
            k: 2,
            pinned: &[],
            excluded: &[],
            base: None,
            max_combinations: 50,
            mode: DiscoveryMode::Intelligent,
        };
        let target = Combination::new(["a", "b"]);
        let mut tested = 0usize;
        let set = KeyDiscovery::discover(&inputs, &mut |c| {
            tested += 1;
            if *c == target {
                100.0
            } else {
                55.0
            }
        })
        .unwrap();
        // Perfect key found at size 2: no size-3 candidates were tested.
        assert!(tested <= 6, "tested {tested}");
        assert_eq!(set.combinations()[0], target);
    }

    #[test]
    fn intelligent_respects_base_supersets() {
        let names = pool(&["a", "b", "c", "d"]);
        let promise: FxHashMap<String, f64> =
            names.iter().map(|n| (n.clone(), 0.5)).collect();
        let base = Combination::new(["a"]);
        let inputs = DiscoveryInputs {
            pool: &names,
            promise: &promise,
            k: 2,
            pinned: &[],
            excluded: &[],
            base: Some(&base),
            max_combinations: 50,
            mode: DiscoveryMode::Intelligent,
        };
        let set = KeyDiscovery::discover(&inputs, &mut |_| 90.0).unwrap();
        assert!(!set.is_empty());
        for combination in set.combinations() {
            assert!(combination.is_superset_of(&base), "{combination}");
        }
    }
}
