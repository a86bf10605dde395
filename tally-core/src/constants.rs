//! Engine-wide constants. Tunables that operators may need to change
//! live in [`crate::config::EngineConfig`] instead.

/// Hard cap on combinations scored per run in heuristic mode.
pub const MAX_COMBINATIONS_PER_RUN: usize = 50;

/// Hard cap on candidates tested by intelligent discovery.
pub const INTELLIGENT_MAX_TESTED: usize = 2_000;

/// If C(pool, k) exceeds this, enumeration is refused and discovery
/// switches to intelligent mode.
pub const MAX_ENUMERATION: u64 = 100_000;

/// Pool size above which intelligent discovery is selected automatically.
pub const INTELLIGENT_POOL_THRESHOLD: usize = 50;

/// Columns kept after the intelligent-mode pool reduction.
pub const INTELLIGENT_POOL_CAP: usize = 30;

/// Beam width for intelligent discovery.
pub const INTELLIGENT_BEAM_WIDTH: usize = 10;

/// Maximum combination size reached by intelligent discovery.
pub const INTELLIGENT_MAX_SIZE: usize = 10;

/// Row count above which the uniqueness analyzer samples.
pub const SAMPLE_THRESHOLD: u64 = 50_000;

/// Separator joining column values into a key. Stripped from field
/// values by the reader after CSV unquoting, so the join is unambiguous.
pub const KEY_SEPARATOR: char = '\u{1f}';

/// Internal representation of a null field inside a key. Distinct from
/// the empty string and cannot appear in reader output.
pub const NULL_FIELD: &str = "\u{1}\u{3}";

/// User-visible rendering of a null key component in exports, cache
/// samples, and API payloads.
pub const NULL_DISPLAY: &str = "<null>";

/// Default export chunk rollover: rows.
pub const DEFAULT_CHUNK_ROWS: usize = 10_000;

/// Default export chunk rollover: bytes.
pub const DEFAULT_CHUNK_BYTES: u64 = 1024 * 1024;

/// Keys sampled per category into a comparison cache entry.
pub const CACHE_SAMPLE_LIMIT: usize = 100;

/// Rows between cancellation / deadline checkpoints while streaming.
pub const ROWS_PER_CHECK: u64 = 8_192;

/// Bytes of file head inspected for delimiter detection.
pub const SNIFF_BYTES: usize = 64 * 1024;

/// Files below this size may use the estimated row count; above it a
/// linear scan is mandatory before any sampling decision.
pub const ESTIMATE_SIZE_CAP: u64 = 256 * 1024 * 1024;

/// Maximum page size served by paginated endpoints.
pub const MAX_PAGE_SIZE: usize = 500;

/// Delimiter candidates in tie-break order.
pub const DELIMITER_CANDIDATES: [u8; 5] = [b',', b'\t', b'|', b';', b' '];
