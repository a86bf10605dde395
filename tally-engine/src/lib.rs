//! # tally-engine
//!
//! The job runner: accepts submissions without blocking, drives each
//! run through its ordered stages on a bounded worker pool, publishes
//! progress events, and isolates failures per run.

mod context;
mod runner;
mod stages;

pub mod retry;

pub use runner::JobRunner;

/// Current wall-clock time as Unix epoch milliseconds.
pub(crate) fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
