//! Fallback engine and circuit breaker configuration.

use serde::{Deserialize, Serialize};

/// What the engine answers with once retries and fallbacks are exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradationMode {
    /// A static per-domain answer.
    FastAnswer,
    /// The closest cached response for the same domain and prompt prefix.
    CachedResponse,
    /// One more attempt against the minimum-capability model.
    SimplifiedModel,
}

/// Configuration for retry, degradation, and circuit breaking.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// Maximum invocation attempts per request.
    pub max_retries: u32,

    /// Base delay for the exponential backoff between attempts.
    pub retry_base_delay_ms: u64,

    /// Consecutive failures that open a provider's breaker.
    pub circuit_breaker_threshold: u32,

    /// How long a breaker stays open before the half-open probe.
    pub circuit_cooldown_ms: u64,

    /// Degradation behavior once all attempts fail.
    pub degradation_mode: DegradationMode,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_base_delay_ms: 100,
            circuit_breaker_threshold: 5,
            circuit_cooldown_ms: 5 * 60 * 1_000,
            degradation_mode: DegradationMode::FastAnswer,
        }
    }
}
