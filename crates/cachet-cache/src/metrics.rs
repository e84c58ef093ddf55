//! Cache counters, reported through the `metrics` facade.
//!
//! No recorder is installed here; the embedding process decides where the
//! numbers go.

use metrics::counter;

use crate::tier::Tier;

/// Metric names as constants for consistency.
pub mod names {
    pub const CACHE_HITS_TOTAL: &str = "cachet_cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "cachet_cache_misses_total";
    pub const CACHE_FALLBACKS_TOTAL: &str = "cachet_cache_fallbacks_total";
    pub const RATE_LIMIT_REJECTIONS_TOTAL: &str = "cachet_rate_limit_rejections_total";
}

/// Record a read served by `tier`.
pub fn record_lookup(tier: Tier, hit: bool) {
    if hit {
        counter!(names::CACHE_HITS_TOTAL, "tier" => tier.as_str()).increment(1);
    } else {
        counter!(names::CACHE_MISSES_TOTAL, "tier" => tier.as_str()).increment(1);
    }
}

/// Record an operation rerouted from an unavailable tier.
pub fn record_fallback(from: Tier, to: Tier) {
    counter!(
        names::CACHE_FALLBACKS_TOTAL,
        "from" => from.as_str(),
        "to" => to.as_str()
    )
    .increment(1);
}

pub fn record_rate_limit_rejection() {
    counter!(names::RATE_LIMIT_REJECTIONS_TOTAL).increment(1);
}
