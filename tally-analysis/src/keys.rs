//! Key projection and rendering.
//!
//! A key is the tuple of a row's combination-column values joined with
//! the unit separator. The reader strips the separator from field
//! values after unquoting, so the join is unambiguous. Null fields
//! (empty after CSV unquoting) are keyed with an internal sentinel that
//! is distinct from the empty string and renders as `<null>` anywhere
//! user-visible.

use tally_core::constants::{KEY_SEPARATOR, NULL_DISPLAY, NULL_FIELD};

/// Project a row to its key for the given column indices.
pub fn project_key(row: &[String], indices: &[usize]) -> String {
    let mut key = String::new();
    for (i, &idx) in indices.iter().enumerate() {
        if i > 0 {
            key.push(KEY_SEPARATOR);
        }
        match row.get(idx) {
            Some(v) if !v.is_empty() => key.push_str(v),
            _ => key.push_str(NULL_FIELD),
        }
    }
    key
}

/// The key's component values, null sentinels rendered as `<null>`.
/// Used for the key columns of export rows.
pub fn key_parts(key: &str) -> Vec<String> {
    key.split(KEY_SEPARATOR)
        .map(|part| {
            if part == NULL_FIELD {
                NULL_DISPLAY.to_string()
            } else {
                part.to_string()
            }
        })
        .collect()
}

/// Human-readable single-string form, used for cache samples.
pub fn display_key(key: &str) -> String {
    key_parts(key).join(", ")
}

/// True when every component of the key is the null sentinel.
pub fn is_null_key(key: &str) -> bool {
    key.split(KEY_SEPARATOR).all(|part| part == NULL_FIELD)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_fields_key_as_null_sentinel_not_empty_string() {
        let row = vec!["".to_string(), "x".to_string()];
        let key = project_key(&row, &[0, 1]);
        assert_ne!(key, format!("{KEY_SEPARATOR}x"));
        assert!(key.starts_with(NULL_FIELD));
        assert!(!is_null_key(&key));
    }

    #[test]
    fn all_null_key_is_detected_and_displayed() {
        let row = vec!["".to_string(), "".to_string()];
        let key = project_key(&row, &[0, 1]);
        assert!(is_null_key(&key));
        assert_eq!(display_key(&key), "<null>, <null>");
    }

    #[test]
    fn distinct_rows_produce_distinct_keys() {
        let a = project_key(&["ab".into(), "c".into()], &[0, 1]);
        let b = project_key(&["a".into(), "bc".into()], &[0, 1]);
        assert_ne!(a, b);
    }

    #[test]
    fn key_parts_round_trip() {
        let row = vec!["1".to_string(), "ny".to_string()];
        let key = project_key(&row, &[0, 1]);
        assert_eq!(key_parts(&key), vec!["1".to_string(), "ny".to_string()]);
    }
}
