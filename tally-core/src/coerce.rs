//! Read-boundary value normalization.
//!
//! The store may hold blobs where text was expected, or nulls where a
//! number was expected. These helpers decode at the read boundary so
//! user-facing code always sees typed values and JSON serialization can
//! never fail on a stored value.

use rusqlite::types::ValueRef;

/// Coerce a stored value to `i64`, returning `default` for null,
/// unparseable text, and undecodable blobs. A warning is logged when a
/// value had to be coerced lossily.
pub fn safe_int(value: ValueRef<'_>, default: i64) -> i64 {
    match value {
        ValueRef::Integer(i) => i,
        ValueRef::Real(f) => f as i64,
        ValueRef::Null => default,
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            match std::str::from_utf8(bytes).ok().and_then(|s| s.trim().parse::<i64>().ok()) {
                Some(i) => i,
                None => {
                    tracing::warn!(len = bytes.len(), "coerced undecodable stored value to int default");
                    default
                }
            }
        }
    }
}

/// Coerce a stored value to `String`, returning `default` for null and
/// decoding blobs lossily. A warning is logged on lossy decode.
pub fn safe_str(value: ValueRef<'_>, default: &str) -> String {
    match value {
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => match std::str::from_utf8(bytes) {
            Ok(s) => s.to_string(),
            Err(_) => {
                tracing::warn!(len = bytes.len(), "lossy decode of stored bytes to text");
                String::from_utf8_lossy(bytes).into_owned()
            }
        },
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Null => default.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ints_pass_through_and_text_parses() {
        assert_eq!(safe_int(ValueRef::Integer(42), 0), 42);
        assert_eq!(safe_int(ValueRef::Text(b" 7 "), 0), 7);
        assert_eq!(safe_int(ValueRef::Null, -1), -1);
        assert_eq!(safe_int(ValueRef::Blob(&[0xff, 0xfe]), 9), 9);
    }

    #[test]
    fn strings_never_fail() {
        assert_eq!(safe_str(ValueRef::Text(b"ok"), ""), "ok");
        assert_eq!(safe_str(ValueRef::Null, "d"), "d");
        assert_eq!(safe_str(ValueRef::Integer(3), ""), "3");
        // Invalid UTF-8 decodes lossily instead of erroring.
        let s = safe_str(ValueRef::Blob(&[0x66, 0xff, 0x6f]), "");
        assert!(s.starts_with('f') && s.ends_with('o'));
    }
}
