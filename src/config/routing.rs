//! Routing policy configuration.

use serde::{Deserialize, Serialize};

/// Weights for the affinity scoring formula
/// `affinity - lambda * normalized_latency - mu * normalized_cost`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    /// Penalty weight for normalized default latency (lambda).
    pub latency_weight: f64,

    /// Penalty weight for normalized blended cost (mu).
    pub cost_weight: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            latency_weight: 0.3,
            cost_weight: 0.2,
        }
    }
}

/// Configuration for the router.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Scoring weights for candidate ranking.
    pub weights: ScoringWeights,

    /// Whether the bandit suggestion can override the top-scored candidate.
    pub bandit_enabled: bool,

    /// Sampling temperature attached to route decisions.
    pub default_temperature: f32,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            weights: ScoringWeights::default(),
            bandit_enabled: true,
            default_temperature: 0.7,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bandit_enabled_by_default() {
        let config = RoutingConfig::default();
        assert!(config.bandit_enabled);
        assert!(config.weights.latency_weight > 0.0);
    }
}
