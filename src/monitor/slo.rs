//! SLO definitions and alerts.

use serde::{Deserialize, Serialize};

/// The three standing service-level objectives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SloKind {
    P95Latency,
    ErrorRate,
    Availability,
}

impl SloKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SloKind::P95Latency => "p95_latency",
            SloKind::ErrorRate => "error_rate",
            SloKind::Availability => "availability",
        }
    }
}

/// Alert severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

/// One SLO violation, published on the monitor's alert bus.
///
/// Alerts are idempotent per SLO: while a violation is unresolved, further
/// breaching windows do not produce duplicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SloAlert {
    pub slo: SloKind,
    pub severity: AlertSeverity,
    /// Measured value in the violating window.
    pub measured: f64,
    /// The configured threshold.
    pub threshold: f64,
    /// Clock time the alert fired.
    pub at_ms: u64,
}

impl SloAlert {
    /// Severity policy: latency beyond twice its threshold or error rate
    /// beyond ten times its threshold is critical; availability shortfalls
    /// deeper than ten points are critical too.
    pub fn severity_for(slo: SloKind, measured: f64, threshold: f64) -> AlertSeverity {
        match slo {
            SloKind::P95Latency if measured > 2.0 * threshold => AlertSeverity::Critical,
            SloKind::ErrorRate if measured > 10.0 * threshold => AlertSeverity::Critical,
            SloKind::Availability if measured < threshold - 0.10 => AlertSeverity::Critical,
            _ => AlertSeverity::Warning,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latency_twice_threshold_is_critical() {
        assert_eq!(
            SloAlert::severity_for(SloKind::P95Latency, 10_001.0, 5_000.0),
            AlertSeverity::Critical
        );
        assert_eq!(
            SloAlert::severity_for(SloKind::P95Latency, 6_000.0, 5_000.0),
            AlertSeverity::Warning
        );
    }

    #[test]
    fn error_rate_ten_times_threshold_is_critical() {
        assert_eq!(
            SloAlert::severity_for(SloKind::ErrorRate, 0.51, 0.05),
            AlertSeverity::Critical
        );
        assert_eq!(
            SloAlert::severity_for(SloKind::ErrorRate, 0.10, 0.05),
            AlertSeverity::Warning
        );
    }

    #[test]
    fn availability_deep_shortfall_is_critical() {
        assert_eq!(
            SloAlert::severity_for(SloKind::Availability, 0.80, 0.99),
            AlertSeverity::Critical
        );
        assert_eq!(
            SloAlert::severity_for(SloKind::Availability, 0.95, 0.99),
            AlertSeverity::Warning
        );
    }
}
