//! Health status payloads.

use crate::cache::CacheStats;
use crate::fallback::{BreakerSnapshot, BreakerState};
use crate::monitor::{PerformanceMetrics, SloAlert};
use crate::types::Provider;

/// Overall system health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// One provider's slice of the health report.
#[derive(Debug, Clone)]
pub struct ProviderHealth {
    pub provider: Provider,
    pub breaker: BreakerSnapshot,
    pub metrics: PerformanceMetrics,
}

/// The read-only health report.
#[derive(Debug, Clone)]
pub struct HealthStatus {
    pub overall: HealthState,
    pub metrics: PerformanceMetrics,
    pub providers: Vec<ProviderHealth>,
    pub alerts: Vec<SloAlert>,
    pub cache: CacheStats,
}

impl HealthStatus {
    /// Derive the overall state: every breaker open means unhealthy; any
    /// open breaker or unresolved alert means degraded.
    pub fn derive_overall(breakers: &[BreakerSnapshot], alerts: &[SloAlert]) -> HealthState {
        let open = breakers
            .iter()
            .filter(|b| b.state == BreakerState::Open)
            .count();
        if open == breakers.len() && !breakers.is_empty() {
            return HealthState::Unhealthy;
        }
        if open > 0 || !alerts.is_empty() {
            return HealthState::Degraded;
        }
        HealthState::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::{AlertSeverity, SloKind};

    fn breaker(provider: Provider, state: BreakerState) -> BreakerSnapshot {
        BreakerSnapshot {
            provider,
            state,
            consecutive_failures: 0,
            last_failure_ms: 0,
            open_until_ms: 0,
        }
    }

    #[test]
    fn all_closed_no_alerts_is_healthy() {
        let breakers: Vec<BreakerSnapshot> = Provider::ALL
            .iter()
            .map(|&p| breaker(p, BreakerState::Closed))
            .collect();
        assert_eq!(
            HealthStatus::derive_overall(&breakers, &[]),
            HealthState::Healthy
        );
    }

    #[test]
    fn one_open_breaker_is_degraded() {
        let mut breakers: Vec<BreakerSnapshot> = Provider::ALL
            .iter()
            .map(|&p| breaker(p, BreakerState::Closed))
            .collect();
        breakers[0].state = BreakerState::Open;
        assert_eq!(
            HealthStatus::derive_overall(&breakers, &[]),
            HealthState::Degraded
        );
    }

    #[test]
    fn all_open_is_unhealthy() {
        let breakers: Vec<BreakerSnapshot> = Provider::ALL
            .iter()
            .map(|&p| breaker(p, BreakerState::Open))
            .collect();
        assert_eq!(
            HealthStatus::derive_overall(&breakers, &[]),
            HealthState::Unhealthy
        );
    }

    #[test]
    fn active_alert_is_degraded() {
        let breakers: Vec<BreakerSnapshot> = Provider::ALL
            .iter()
            .map(|&p| breaker(p, BreakerState::Closed))
            .collect();
        let alert = SloAlert {
            slo: SloKind::ErrorRate,
            severity: AlertSeverity::Warning,
            measured: 0.1,
            threshold: 0.05,
            at_ms: 0,
        };
        assert_eq!(
            HealthStatus::derive_overall(&breakers, &[alert]),
            HealthState::Degraded
        );
    }
}
