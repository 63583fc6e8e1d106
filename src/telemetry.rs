//! Telemetry metric name constants.
//!
//! Centralised metric names for parley operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `parley_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `model` - model id from the registry (e.g. "gpt-4")
//! - `operation` - "generate" or "stream"
//! - `status` - outcome: "ok" or "error"
//! - `plugin` - plugin name

/// Total orchestrated replies.
///
/// Labels: `model`, `operation`, `status` ("ok" | "error").
pub const REQUESTS_TOTAL: &str = "parley_requests_total";

/// Reply duration in seconds, measured across retries and fallback.
///
/// Labels: `model`, `operation`.
pub const REQUEST_DURATION_SECONDS: &str = "parley_request_duration_seconds";

/// Total retry attempts (not counting the initial request).
///
/// Labels: `model`, `operation`.
pub const RETRIES_TOTAL: &str = "parley_retries_total";

/// Total fallback-model swaps.
///
/// Labels: `from`, `to`.
pub const FALLBACKS_TOTAL: &str = "parley_fallbacks_total";

/// Total plugin invocations.
///
/// Labels: `plugin`, `status` ("accepted" | "declined" | "error").
pub const PLUGIN_CALLS_TOTAL: &str = "parley_plugin_calls_total";

/// Chains dropped by the idle sweep.
pub const CHAINS_EVICTED_TOTAL: &str = "parley_chains_evicted_total";
