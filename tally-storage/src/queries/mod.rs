//! Table query modules. All statements are parameterized and
//! prepared-cached; writes use upsert semantics on natural keys.

pub mod chunks;
pub mod results;
pub mod runs;
pub mod stages;
pub mod summaries;

use tally_core::Combination;

/// Combinations are stored as JSON arrays of column names in
/// projection order.
pub(crate) fn combination_to_json(combination: &Combination) -> String {
    serde_json::to_string(combination.columns()).expect("column names serialize")
}

pub(crate) fn combination_from_json(json: &str) -> Combination {
    match serde_json::from_str::<Vec<String>>(json) {
        Ok(columns) => Combination::new(columns),
        Err(e) => {
            tracing::warn!(error = %e, "corrupt combination JSON in store, substituting empty");
            Combination::new(Vec::<String>::new())
        }
    }
}

pub(crate) fn combination_list_to_json(combinations: &[Combination]) -> String {
    let lists: Vec<&[String]> = combinations.iter().map(|c| c.columns()).collect();
    serde_json::to_string(&lists).expect("column names serialize")
}

pub(crate) fn combination_list_from_json(json: &str) -> Vec<Combination> {
    match serde_json::from_str::<Vec<Vec<String>>>(json) {
        Ok(lists) => lists.into_iter().map(Combination::new).collect(),
        Err(e) => {
            tracing::warn!(error = %e, "corrupt combination list JSON in store, substituting empty");
            Vec::new()
        }
    }
}
