//! # tally-analysis
//!
//! The analysis engine: streaming CSV reading, column profiling, key
//! discovery, uniqueness scoring, two-sided reconciliation, chunked
//! export writing, and the comparison cache.

pub mod cache;
pub mod discovery;
pub mod export;
pub mod keys;
pub mod limits;
pub mod profile;
pub mod quality;
pub mod reader;
pub mod reconcile;
pub mod uniqueness;

pub use cache::ComparisonCache;
pub use discovery::{CandidateSet, DiscoveryInputs, KeyDiscovery, Provenance};
pub use export::{ExportRecord, ExportSpec, ExportWriter};
pub use limits::Deadline;
pub use profile::{ColumnScore, ColumnScorer};
pub use quality::{BasicQualityProfiler, QualityProfiler};
pub use reader::{FileProfile, RowStream, TextEncoding};
pub use reconcile::{CategorySamples, ReconcileOutcome, ReconcileRequest, Reconciler};
pub use uniqueness::{AnalyzeMode, AnalyzeOutcome, AnalyzeRequest, UniquenessAnalyzer};
