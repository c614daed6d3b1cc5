//! Telemetry metric name constants.
//!
//! Centralised metric names for mimir operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `mimir_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `category` — payload category ("code" | "article")
//! - `source` — tier that answered ("fast", "shared", "durable", "generated", "peer")
//! - `tier` — cache/store tier ("fast", "shared", "durable")
//! - `status` — outcome: "ok" or "error"

/// Total resolutions completed.
///
/// Labels: `category`, `source`.
pub const RESOLUTIONS_TOTAL: &str = "mimir_resolutions_total";

/// Total resolutions that ended in an error.
///
/// Labels: `category`.
pub const RESOLUTION_ERRORS_TOTAL: &str = "mimir_resolution_errors_total";

/// End-to-end resolution duration in seconds.
///
/// Labels: `category`.
pub const RESOLVE_DURATION_SECONDS: &str = "mimir_resolve_duration_seconds";

/// Total generator invocations.
///
/// Labels: `category`, `status` ("ok" | "error").
pub const GENERATIONS_TOTAL: &str = "mimir_generations_total";

/// Total retry attempts against the generator (not counting the first).
///
/// Labels: `generator`.
pub const GENERATION_RETRIES_TOTAL: &str = "mimir_generation_retries_total";

/// Total cache tier hits.
///
/// Labels: `tier`.
pub const CACHE_HITS_TOTAL: &str = "mimir_cache_hits_total";

/// Total cache tier misses.
///
/// Labels: `tier`.
pub const CACHE_MISSES_TOTAL: &str = "mimir_cache_misses_total";

/// Total infrastructure errors swallowed by best-effort degradation.
///
/// Labels: `tier`, `op`.
pub const TIER_ERRORS_TOTAL: &str = "mimir_tier_errors_total";

/// Total lease acquisitions that found the key busy.
pub const LOCK_CONTENDED_TOTAL: &str = "mimir_lock_contended_total";

/// Total waiters that exhausted their polling budget.
pub const LOCK_TIMEOUTS_TOTAL: &str = "mimir_lock_timeouts_total";

/// Total lease releases rejected because the holder no longer owned the lease.
pub const LOCK_STALE_RELEASES_TOTAL: &str = "mimir_lock_stale_releases_total";

/// Total capacity filter rebuilds.
///
/// Labels: `status` ("ok" | "error").
pub const FILTER_REBUILDS_TOTAL: &str = "mimir_filter_rebuilds_total";

/// Filter lookups that returned "definitely absent".
pub const FILTER_NEGATIVES_TOTAL: &str = "mimir_filter_negatives_total";
