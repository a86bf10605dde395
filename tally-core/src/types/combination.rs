//! Column combinations — ordered tuples of column names whose value
//! tuple serves as a candidate key.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use xxhash_rust::xxh3::xxh3_64;

use crate::constants::KEY_SEPARATOR;

/// An ordered tuple of column names drawn from the column pool.
///
/// Identity is the *sorted* tuple: two combinations with the same member
/// set compare equal and hash identically, regardless of column order.
/// The original order is preserved for display and key projection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Combination {
    columns: SmallVec<[String; 4]>,
}

impl Combination {
    /// Build from column names in projection order.
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }

    /// Column names in projection order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Member set sorted lexicographically — the identity tuple.
    pub fn sorted_columns(&self) -> Vec<&str> {
        let mut cols: Vec<&str> = self.columns.iter().map(String::as_str).collect();
        cols.sort_unstable();
        cols
    }

    /// True if `self` contains every column of `base`.
    pub fn is_superset_of(&self, base: &Combination) -> bool {
        base.columns
            .iter()
            .all(|c| self.columns.iter().any(|own| own == c))
    }

    /// A new combination with `column` appended. Returns `None` if the
    /// column is already a member.
    pub fn extended(&self, column: &str) -> Option<Self> {
        if self.columns.iter().any(|c| c == column) {
            return None;
        }
        let mut columns = self.columns.clone();
        columns.push(column.to_string());
        Some(Self { columns })
    }

    /// Stable 64-bit hash of the sorted member tuple, rendered as 16 hex
    /// chars. Used in export paths, cache file names, and store keys.
    pub fn stable_hash(&self) -> String {
        let mut joined = String::new();
        for (i, col) in self.sorted_columns().iter().enumerate() {
            if i > 0 {
                joined.push(KEY_SEPARATOR);
            }
            joined.push_str(col);
        }
        format!("{:016x}", xxh3_64(joined.as_bytes()))
    }

    /// Human-readable form: members joined with `, `.
    pub fn display(&self) -> String {
        self.columns.join(", ")
    }

    /// Parse the gateway's `columns=` parameter: names separated by
    /// commas, surrounding whitespace trimmed, empties dropped.
    pub fn parse(spec: &str) -> Option<Self> {
        let columns: SmallVec<[String; 4]> = spec
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(String::from)
            .collect();
        if columns.is_empty() {
            None
        } else {
            Some(Self { columns })
        }
    }
}

impl PartialEq for Combination {
    fn eq(&self, other: &Self) -> bool {
        self.sorted_columns() == other.sorted_columns()
    }
}

impl Eq for Combination {}

impl std::hash::Hash for Combination {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        for col in self.sorted_columns() {
            col.hash(state);
        }
    }
}

impl std::fmt::Display for Combination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.display())
    }
}
