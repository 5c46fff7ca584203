//! Performance monitor and SLO configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the performance monitor window and the three standing
/// SLOs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Completed requests kept in the ring buffer.
    pub window_size: usize,

    /// p95 latency SLO threshold in milliseconds.
    pub p95_threshold_ms: f64,

    /// Error-rate SLO threshold, 0..1.
    pub error_rate_threshold: f64,

    /// Availability SLO floor, 0..1.
    pub availability_threshold: f64,

    /// Cost-per-request warning threshold in euro, used by the snapshot
    /// health gate.
    pub cost_per_request_warning: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            window_size: 1_000,
            p95_threshold_ms: 5_000.0,
            error_rate_threshold: 0.05,
            availability_threshold: 0.99,
            cost_per_request_warning: 0.10,
        }
    }
}
