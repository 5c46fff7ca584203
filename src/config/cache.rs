//! Semantic cache configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the response cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Whether caching is active at all.
    pub enabled: bool,

    /// Base TTL in seconds before the domain/cost multipliers apply.
    pub ttl_seconds: u64,

    /// Cache keys longer than this are truncated after hashing.
    pub max_key_length: usize,

    /// Responses whose text exceeds this many bytes are stored compressed.
    pub compression_threshold: usize,

    /// Contractual hit-rate floor for the frequent-query set.
    pub hit_rate_target: f64,

    /// Maximum number of live entries before eviction kicks in.
    pub max_cache_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_seconds: 3_600,
            max_key_length: 128,
            compression_threshold: 4_096,
            hit_rate_target: 0.8,
            max_cache_size: 10_000,
        }
    }
}

/// Configuration for the hit-rate optimizer loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Observations within the analysis window needed to call a query
    /// pattern frequent.
    pub frequent_query_threshold: u64,

    /// Hit-rate target for the frequent set; an on-demand cycle runs when
    /// the observed rate drops below 0.6 x this.
    pub target_hit_rate: f64,

    /// Maximum warm-up inserts per optimizer cycle.
    pub warmup_batch_size: usize,

    /// Refresh an entry once its remaining TTL fraction falls below this.
    pub refresh_threshold: f64,

    /// Sliding window over which query patterns are analyzed.
    pub analysis_window_ms: u64,

    /// Cadence of the periodic optimizer cycle.
    pub interval_ms: u64,

    /// How warm-up entries are produced.
    pub warmup_strategy: WarmupStrategy,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            frequent_query_threshold: 5,
            target_hit_rate: 0.8,
            warmup_batch_size: 50,
            refresh_threshold: 0.2,
            analysis_window_ms: 24 * 60 * 60 * 1_000,
            interval_ms: 30 * 60 * 1_000,
            warmup_strategy: WarmupStrategy::Synthetic,
        }
    }
}

/// Source of warm-up responses for frequent queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarmupStrategy {
    /// Insert a canonical placeholder built from the pattern itself.
    Synthetic,
    /// Run the real invocation path once and cache its answer.
    Live,
}
