//! Column profiling: cardinality, null rate, id/date-likeness, and the
//! promise score that ranks columns for key discovery.

mod hll;

use std::sync::OnceLock;

use regex::Regex;
use tally_core::errors::ReadError;
use tally_core::FxHashSet;

use crate::reader::{FileProfile, Row, RowStream};
use hll::HyperLogLog;

/// Promise-score weights. Fixed: scoring must be deterministic and
/// comparable across runs.
const WEIGHT_CARDINALITY: f64 = 0.5;
const WEIGHT_ID_LIKE: f64 = 0.2;
const WEIGHT_DATE_LIKE: f64 = 0.1;
const WEIGHT_LOW_NULL: f64 = 0.2;

/// Cardinality/non-null ratio above which a column counts as id-like
/// even without an id-ish name.
const ID_CARDINALITY_RATIO: f64 = 0.8;

/// Share of non-null values that must look like dates.
const DATE_MATCH_RATIO: f64 = 0.9;

fn id_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)(id|key|code|identifier|guid|uuid)").unwrap())
}

fn date_res() -> &'static [Regex] {
    static RES: OnceLock<Vec<Regex>> = OnceLock::new();
    RES.get_or_init(|| {
        [
            r"^\d{4}-\d{2}-\d{2}([ T].*)?$",
            r"^\d{2}/\d{2}/\d{4}$",
            r"^\d{2}-\d{2}-\d{4}$",
            r"^\d{4}/\d{2}/\d{2}$",
        ]
        .iter()
        .map(|p| Regex::new(p).unwrap())
        .collect()
    })
}

/// Per-column profile for one side.
#[derive(Debug, Clone)]
pub struct ColumnScore {
    pub name: String,
    pub cardinality: u64,
    pub total: u64,
    pub non_null: u64,
    pub null_rate: f64,
    pub is_id_like: bool,
    pub is_date_like: bool,
    /// In [0, 1]; higher means a better key candidate.
    pub promise_score: f64,
}

/// Exact on samples, sketched on streams.
enum Distinct {
    Exact(FxHashSet<String>),
    Sketch(HyperLogLog),
}

impl Distinct {
    fn insert(&mut self, value: &str) {
        match self {
            Distinct::Exact(set) => {
                if !set.contains(value) {
                    set.insert(value.to_string());
                }
            }
            Distinct::Sketch(hll) => hll.insert(value),
        }
    }

    fn count(&self) -> u64 {
        match self {
            Distinct::Exact(set) => set.len() as u64,
            Distinct::Sketch(hll) => hll.estimate(),
        }
    }
}

struct ColumnAccumulator {
    name: String,
    distinct: Distinct,
    total: u64,
    non_null: u64,
    date_matches: u64,
}

impl ColumnAccumulator {
    fn new(name: &str, exact: bool) -> Self {
        Self {
            name: name.to_string(),
            distinct: if exact {
                Distinct::Exact(FxHashSet::default())
            } else {
                Distinct::Sketch(HyperLogLog::new())
            },
            total: 0,
            non_null: 0,
            date_matches: 0,
        }
    }

    fn observe(&mut self, value: &str) {
        self.total += 1;
        if value.is_empty() {
            return;
        }
        self.non_null += 1;
        self.distinct.insert(value);
        if date_res().iter().any(|re| re.is_match(value)) {
            self.date_matches += 1;
        }
    }

    fn finish(self) -> ColumnScore {
        let cardinality = self.distinct.count();
        let null_rate = if self.total == 0 {
            0.0
        } else {
            1.0 - self.non_null as f64 / self.total as f64
        };
        let cardinality_ratio = if self.non_null == 0 {
            0.0
        } else {
            (cardinality as f64 / self.non_null as f64).min(1.0)
        };
        let is_id_like =
            id_name_re().is_match(&self.name) || cardinality_ratio >= ID_CARDINALITY_RATIO;
        let is_date_like = self.non_null > 0
            && self.date_matches as f64 / self.non_null as f64 >= DATE_MATCH_RATIO;

        let promise_score = WEIGHT_CARDINALITY * cardinality_ratio
            + WEIGHT_ID_LIKE * if is_id_like { 1.0 } else { 0.0 }
            + WEIGHT_DATE_LIKE * if is_date_like { 1.0 } else { 0.0 }
            + WEIGHT_LOW_NULL * (1.0 - null_rate);

        ColumnScore {
            name: self.name,
            cardinality,
            total: self.total,
            non_null: self.non_null,
            null_rate,
            is_id_like,
            is_date_like,
            promise_score,
        }
    }
}

/// Scores every column of one side.
pub struct ColumnScorer;

impl ColumnScorer {
    /// Score from an in-memory sample. Exact distinct counts;
    /// deterministic for a given sample.
    pub fn score_sample(header: &[String], rows: &[Row]) -> Vec<ColumnScore> {
        let mut accs: Vec<ColumnAccumulator> = header
            .iter()
            .map(|name| ColumnAccumulator::new(name, true))
            .collect();
        for row in rows {
            for (i, acc) in accs.iter_mut().enumerate() {
                acc.observe(row.get(i).map(String::as_str).unwrap_or(""));
            }
        }
        accs.into_iter().map(ColumnAccumulator::finish).collect()
    }

    /// Score from a full single pass over the file. Cardinalities are
    /// sketch estimates.
    pub fn score_stream(profile: &FileProfile) -> Result<Vec<ColumnScore>, ReadError> {
        let mut accs: Vec<ColumnAccumulator> = profile
            .header
            .iter()
            .map(|name| ColumnAccumulator::new(name, false))
            .collect();
        for row in RowStream::open(profile)? {
            let row = row?;
            for (i, acc) in accs.iter_mut().enumerate() {
                acc.observe(row.get(i).map(String::as_str).unwrap_or(""));
            }
        }
        Ok(accs.into_iter().map(ColumnAccumulator::finish).collect())
    }
}
