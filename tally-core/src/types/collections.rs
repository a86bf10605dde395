//! Hash collection aliases.
//!
//! FxHash is not DoS-resistant; keys here are column values from
//! operator-supplied files, not untrusted network input.

pub use rustc_hash::{FxHashMap, FxHashSet};
