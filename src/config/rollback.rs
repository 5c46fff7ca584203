//! Rollback manager configuration.

use serde::{Deserialize, Serialize};

/// Single-window thresholds that trigger an emergency rollback on their own.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmergencyThresholds {
    /// Error-rate fraction, 0..1.
    pub error_rate: f64,
    /// p95 latency in milliseconds.
    pub p95_ms: f64,
    /// Cost per request in euro.
    pub cost_per_request: f64,
}

impl Default for EmergencyThresholds {
    fn default() -> Self {
        Self {
            error_rate: 0.15,
            p95_ms: 30_000.0,
            cost_per_request: 0.50,
        }
    }
}

/// One step of a gradual rollback, executed in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackStep {
    /// Disable experimental feature flags.
    FeatureFlagDisable,
    /// Restore model capabilities from the previous snapshot.
    ModelSwap,
    /// Restore provider weights from the previous snapshot.
    ProviderWeightShift,
}

/// Gradual rollback stage plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GradualRollbackConfig {
    /// Ordered steps; each gets a validation window before escalating.
    pub steps: Vec<RollbackStep>,

    /// Validation window per step.
    pub step_duration_ms: u64,
}

impl Default for GradualRollbackConfig {
    fn default() -> Self {
        Self {
            steps: vec![
                RollbackStep::FeatureFlagDisable,
                RollbackStep::ModelSwap,
                RollbackStep::ProviderWeightShift,
            ],
            step_duration_ms: 60_000,
        }
    }
}

/// Configuration for snapshots and automatic rollback.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RollbackConfig {
    /// Master switch; when false the manager only takes snapshots.
    pub enabled: bool,

    /// Consecutive windows with a critical SLO alert before a gradual
    /// rollback starts.
    pub slo_violation_threshold: u32,

    /// Minimum spacing between rollback attempts.
    pub rollback_cooldown_ms: u64,

    /// Upper bound on waiting for a step's validation window.
    pub validation_timeout_ms: u64,

    /// Single-window emergency thresholds.
    pub emergency: EmergencyThresholds,

    /// Gradual rollback plan.
    pub gradual: GradualRollbackConfig,

    /// Snapshots retained, oldest dropped first.
    pub max_snapshots: usize,
}

impl Default for RollbackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            slo_violation_threshold: 3,
            rollback_cooldown_ms: 10 * 60 * 1_000,
            validation_timeout_ms: 2 * 60 * 1_000,
            emergency: EmergencyThresholds::default(),
            gradual: GradualRollbackConfig::default(),
            max_snapshots: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_gradual_plan_is_ordered() {
        let config = RollbackConfig::default();
        assert_eq!(
            config.gradual.steps,
            vec![
                RollbackStep::FeatureFlagDisable,
                RollbackStep::ModelSwap,
                RollbackStep::ProviderWeightShift,
            ]
        );
        assert_eq!(config.slo_violation_threshold, 3);
    }

    #[test]
    fn rollback_step_parses_snake_case() {
        let parsed: RollbackStep = serde_json::from_str("\"model_swap\"").unwrap();
        assert_eq!(parsed, RollbackStep::ModelSwap);
    }
}
