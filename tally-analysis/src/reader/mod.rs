//! Streaming tabular file reading: delimiter/encoding detection, row
//! streaming, cheap row counting, and bounded sampling.

mod detect;
mod sample;
mod stream;

pub use detect::{FileProfile, TextEncoding};
pub use sample::sample_rows;
pub use stream::{count_rows, RowStream};

/// A decoded, normalized row.
pub type Row = Vec<String>;
