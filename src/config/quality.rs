//! Quality monitor configuration.

use serde::{Deserialize, Serialize};

/// Thresholds for quality and drift alerting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Mean-score drop against baseline that raises a warning.
    pub degradation_warning: f64,

    /// Mean-score drop against baseline that raises a critical alert.
    pub degradation_critical: f64,

    /// Relative shift between window halves that raises a drift warning.
    pub drift_warning: f64,

    /// Relative shift between window halves that raises a critical drift
    /// alert.
    pub drift_critical: f64,

    /// Assessments kept per model for trend analysis.
    pub window_size: usize,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            degradation_warning: 0.10,
            degradation_critical: 0.25,
            drift_warning: 0.30,
            drift_critical: 0.60,
            window_size: 1_000,
        }
    }
}
