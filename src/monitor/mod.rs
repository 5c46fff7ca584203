//! Performance monitor
//!
//! Keeps a ring buffer of the last M completed requests and computes window
//! metrics on demand, globally and per provider. Evaluates the three
//! standing SLOs on every recorded sample and publishes idempotent alerts
//! on a broadcast bus the rollback manager subscribes to; the two
//! components never hold references to each other's internals.

pub mod slo;

pub use slo::{AlertSeverity, SloAlert, SloKind};

use crate::clock::SharedClock;
use crate::config::MonitorConfig;
use crate::types::{Provider, Response};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::broadcast;

/// Samples required before SLO evaluation starts; avoids alerting on the
/// first few requests after startup.
const MIN_SAMPLES_FOR_SLO: usize = 20;

/// One completed request in the window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RequestSample {
    pub provider: Provider,
    pub success: bool,
    pub latency_ms: u64,
    pub cost_euro: f64,
    pub cached: bool,
    pub at_ms: u64,
}

impl RequestSample {
    /// Build a sample from a finished response.
    pub fn from_response(response: &Response, at_ms: u64) -> Self {
        Self {
            provider: response.provider,
            success: response.success,
            latency_ms: response.latency_ms,
            cost_euro: response.cost_euro,
            cached: response.cached,
            at_ms,
        }
    }
}

/// Window metrics computed on demand.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PerformanceMetrics {
    pub request_count: usize,
    pub success_count: usize,
    pub error_count: usize,
    pub error_rate: f64,
    pub availability: f64,
    pub average_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub p99_latency_ms: f64,
    pub total_cost_euro: f64,
    pub cost_per_request: f64,
    pub throughput_rps: f64,
}

/// The monitor.
pub struct PerformanceMonitor {
    config: MonitorConfig,
    clock: SharedClock,
    window: Mutex<VecDeque<RequestSample>>,
    alert_tx: broadcast::Sender<SloAlert>,
    /// Unresolved alerts, keyed by SLO. Guarantees idempotent emission.
    active: Mutex<HashMap<SloKind, SloAlert>>,
    lifetime_requests: AtomicU64,
}

impl PerformanceMonitor {
    pub fn new(config: MonitorConfig, clock: SharedClock) -> Self {
        let (alert_tx, _) = broadcast::channel(64);
        Self {
            config,
            clock,
            window: Mutex::new(VecDeque::new()),
            alert_tx,
            active: Mutex::new(HashMap::new()),
            lifetime_requests: AtomicU64::new(0),
        }
    }

    /// Subscribe to SLO alerts.
    pub fn subscribe(&self) -> broadcast::Receiver<SloAlert> {
        self.alert_tx.subscribe()
    }

    /// Record one completed request and evaluate the SLOs.
    pub fn record(&self, sample: RequestSample) {
        {
            let mut window = match self.window.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            window.push_back(sample);
            while window.len() > self.config.window_size {
                window.pop_front();
            }
        }
        self.lifetime_requests.fetch_add(1, Ordering::Relaxed);

        metrics::counter!(
            "conductor_requests_total",
            "provider" => sample.provider.as_str(),
            "status" => if sample.success { "success" } else { "error" },
        )
        .increment(1);
        metrics::histogram!(
            "conductor_request_duration_seconds",
            "provider" => sample.provider.as_str(),
        )
        .record(sample.latency_ms as f64 / 1_000.0);
        metrics::histogram!("conductor_request_cost_euro").record(sample.cost_euro);

        self.evaluate_slos();
    }

    /// Metrics over the whole window.
    pub fn metrics(&self) -> PerformanceMetrics {
        let window = match self.window.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        compute_metrics(window.iter(), self.clock.now_ms())
    }

    /// Metrics over one provider's partition of the window.
    pub fn provider_metrics(&self, provider: Provider) -> PerformanceMetrics {
        let window = match self.window.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        compute_metrics(
            window.iter().filter(|s| s.provider == provider),
            self.clock.now_ms(),
        )
    }

    /// Requests observed since startup, across window evictions.
    pub fn lifetime_requests(&self) -> u64 {
        self.lifetime_requests.load(Ordering::Relaxed)
    }

    /// Currently unresolved alerts.
    pub fn active_alerts(&self) -> Vec<SloAlert> {
        let active = match self.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut alerts: Vec<SloAlert> = active.values().cloned().collect();
        alerts.sort_by_key(|a| a.at_ms);
        alerts
    }

    /// Whether any unresolved alert is critical.
    pub fn has_critical_alert(&self) -> bool {
        self.active_alerts()
            .iter()
            .any(|a| a.severity == AlertSeverity::Critical)
    }

    fn evaluate_slos(&self) {
        let snapshot = self.metrics();
        if snapshot.request_count < MIN_SAMPLES_FOR_SLO {
            return;
        }

        let evaluations = [
            (
                SloKind::P95Latency,
                snapshot.p95_latency_ms,
                self.config.p95_threshold_ms,
                snapshot.p95_latency_ms > self.config.p95_threshold_ms,
            ),
            (
                SloKind::ErrorRate,
                snapshot.error_rate,
                self.config.error_rate_threshold,
                snapshot.error_rate > self.config.error_rate_threshold,
            ),
            (
                SloKind::Availability,
                snapshot.availability,
                self.config.availability_threshold,
                snapshot.availability < self.config.availability_threshold,
            ),
        ];

        let mut active = match self.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        for (slo, measured, threshold, violated) in evaluations {
            if violated {
                if active.contains_key(&slo) {
                    // Idempotent: one alert per unresolved violation.
                    continue;
                }
                let alert = SloAlert {
                    slo,
                    severity: SloAlert::severity_for(slo, measured, threshold),
                    measured,
                    threshold,
                    at_ms: self.clock.now_ms(),
                };
                tracing::warn!(
                    slo = slo.as_str(),
                    severity = ?alert.severity,
                    measured,
                    threshold,
                    "SLO violated"
                );
                metrics::counter!(
                    "conductor_slo_violations_total",
                    "slo" => slo.as_str(),
                )
                .increment(1);
                active.insert(slo, alert.clone());
                let _ = self.alert_tx.send(alert);
            } else if active.remove(&slo).is_some() {
                tracing::info!(slo = slo.as_str(), measured, "SLO recovered");
            }
        }
    }
}

fn compute_metrics<'a>(
    samples: impl Iterator<Item = &'a RequestSample>,
    now_ms: u64,
) -> PerformanceMetrics {
    let mut latencies: Vec<u64> = Vec::new();
    let mut success_count = 0usize;
    let mut total_cost = 0.0f64;
    let mut total_latency = 0u64;
    let mut oldest_ms = now_ms;

    for sample in samples {
        latencies.push(sample.latency_ms);
        if sample.success {
            success_count += 1;
        }
        total_cost += sample.cost_euro;
        total_latency += sample.latency_ms;
        oldest_ms = oldest_ms.min(sample.at_ms);
    }

    let request_count = latencies.len();
    if request_count == 0 {
        return PerformanceMetrics::default();
    }

    latencies.sort_unstable();
    let error_count = request_count - success_count;
    let span_seconds = (now_ms.saturating_sub(oldest_ms) as f64 / 1_000.0).max(1.0);

    PerformanceMetrics {
        request_count,
        success_count,
        error_count,
        error_rate: error_count as f64 / request_count as f64,
        availability: success_count as f64 / request_count as f64,
        average_latency_ms: total_latency as f64 / request_count as f64,
        p95_latency_ms: percentile(&latencies, 0.95),
        p99_latency_ms: percentile(&latencies, 0.99),
        total_cost_euro: total_cost,
        cost_per_request: total_cost / request_count as f64,
        throughput_rps: request_count as f64 / span_seconds,
    }
}

/// Nearest-rank percentile over a sorted slice.
fn percentile(sorted: &[u64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = ((sorted.len() as f64 * q).ceil() as usize).clamp(1, sorted.len());
    sorted[rank - 1] as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use std::sync::Arc;

    fn monitor() -> (PerformanceMonitor, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        (
            PerformanceMonitor::new(MonitorConfig::default(), clock.clone()),
            clock,
        )
    }

    fn sample(success: bool, latency_ms: u64, at_ms: u64) -> RequestSample {
        RequestSample {
            provider: Provider::Gemini,
            success,
            latency_ms,
            cost_euro: 0.01,
            cached: false,
            at_ms,
        }
    }

    #[test]
    fn window_metrics_are_computed_on_demand() {
        let (monitor, clock) = monitor();
        for i in 0..10 {
            clock.advance(100);
            monitor.record(sample(i != 0, 100 + i * 10, clock.now_ms()));
        }

        let metrics = monitor.metrics();
        assert_eq!(metrics.request_count, 10);
        assert_eq!(metrics.error_count, 1);
        assert!((metrics.error_rate - 0.1).abs() < 1e-9);
        assert!(metrics.average_latency_ms > 100.0);
        assert!(metrics.p95_latency_ms >= metrics.average_latency_ms);
        assert!(metrics.p99_latency_ms >= metrics.p95_latency_ms);
        assert!(metrics.throughput_rps > 0.0);
        assert!((metrics.cost_per_request - 0.01).abs() < 1e-9);
    }

    #[test]
    fn ring_buffer_is_bounded() {
        let clock = Arc::new(ManualClock::new(0));
        let monitor = PerformanceMonitor::new(
            MonitorConfig {
                window_size: 5,
                ..Default::default()
            },
            clock.clone(),
        );
        for _ in 0..20 {
            monitor.record(sample(true, 100, clock.now_ms()));
        }
        assert_eq!(monitor.metrics().request_count, 5);
        assert_eq!(monitor.lifetime_requests(), 20);
    }

    #[test]
    fn provider_partition_is_separate() {
        let (monitor, clock) = monitor();
        for _ in 0..5 {
            monitor.record(sample(true, 100, clock.now_ms()));
        }
        let mut bedrock = sample(false, 900, clock.now_ms());
        bedrock.provider = Provider::Bedrock;
        monitor.record(bedrock);

        let gemini = monitor.provider_metrics(Provider::Gemini);
        assert_eq!(gemini.request_count, 5);
        assert_eq!(gemini.error_count, 0);

        let bedrock = monitor.provider_metrics(Provider::Bedrock);
        assert_eq!(bedrock.request_count, 1);
        assert_eq!(bedrock.error_count, 1);
    }

    #[test]
    fn error_rate_violation_emits_one_alert() {
        let (monitor, clock) = monitor();
        let mut rx = monitor.subscribe();

        // 25 samples at 20% error rate: well past the 5% threshold.
        for i in 0..25 {
            monitor.record(sample(i % 5 != 0, 100, clock.now_ms()));
        }

        let alert = rx.try_recv().unwrap();
        assert_eq!(alert.slo, SloKind::ErrorRate);
        assert_eq!(alert.severity, AlertSeverity::Warning);
        // Availability breaches in the same window.
        let second = rx.try_recv().unwrap();
        assert_eq!(second.slo, SloKind::Availability);

        // Continued violation must not emit duplicates.
        for i in 0..25 {
            monitor.record(sample(i % 5 != 0, 100, clock.now_ms()));
        }
        assert!(rx.try_recv().is_err());
        assert_eq!(monitor.active_alerts().len(), 2); // error rate + availability
    }

    #[test]
    fn recovery_resolves_the_alert() {
        let (monitor, clock) = monitor();
        for i in 0..25 {
            monitor.record(sample(i % 2 == 0, 100, clock.now_ms()));
        }
        assert!(!monitor.active_alerts().is_empty());

        // Flood the window with successes until the failures age out
        // entirely.
        for _ in 0..1_000 {
            monitor.record(sample(true, 100, clock.now_ms()));
        }
        assert!(monitor.active_alerts().is_empty());
    }

    #[test]
    fn p95_violation_severity_scales() {
        let clock = Arc::new(ManualClock::new(0));
        let monitor = PerformanceMonitor::new(
            MonitorConfig {
                p95_threshold_ms: 500.0,
                ..Default::default()
            },
            clock.clone(),
        );
        for _ in 0..30 {
            monitor.record(sample(true, 2_000, clock.now_ms()));
        }
        let alerts = monitor.active_alerts();
        let latency = alerts.iter().find(|a| a.slo == SloKind::P95Latency).unwrap();
        assert_eq!(latency.severity, AlertSeverity::Critical);
        assert!(monitor.has_critical_alert());
    }

    #[test]
    fn no_evaluation_below_minimum_samples() {
        let (monitor, clock) = monitor();
        for _ in 0..10 {
            monitor.record(sample(false, 9_000, clock.now_ms()));
        }
        assert!(monitor.active_alerts().is_empty());
    }
}
