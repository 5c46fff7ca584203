//! Rollback manager
//!
//! Takes configuration snapshots while the system is provably healthy and
//! restores them when it is not. Two triggers: a single catastrophic window
//! (emergency) or persistent critical SLO alerts (gradual, stepwise). The
//! manager consumes the monitor's alert bus; neither component references
//! the other's internals.

pub mod snapshot;

pub use snapshot::{ConfigurationSnapshot, PerformanceBaseline};

use crate::audit::{AuditTrail, ContentType, EventDraft, EventType};
use crate::capability::CapabilityMatrix;
use crate::clock::SharedClock;
use crate::config::{RollbackConfig, RollbackStep};
use crate::fallback::CircuitBreakerRegistry;
use crate::flags::FeatureFlags;
use crate::monitor::{PerformanceMonitor, SloAlert};
use crate::provider::SnapshotStore;
use crate::types::Provider;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Why a rollback ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackSeverity {
    Emergency,
    SloBased,
    Manual,
}

/// Lifecycle of one rollback attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackStatus {
    InProgress,
    Completed,
    Cancelled,
    Failed,
}

/// One executed step inside a rollback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: RollbackStep,
    pub at_ms: u64,
    pub detail: String,
}

/// Audit record of one rollback attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackState {
    pub id: String,
    pub reason: String,
    pub severity: RollbackSeverity,
    pub status: RollbackStatus,
    pub started_ms: u64,
    pub completed_ms: Option<u64>,
    pub steps: Vec<StepRecord>,
}

/// The manager.
pub struct RollbackManager {
    config: RollbackConfig,
    clock: SharedClock,
    window_size: usize,
    flags: Arc<FeatureFlags>,
    matrix: Arc<CapabilityMatrix>,
    breakers: Arc<CircuitBreakerRegistry>,
    monitor: Arc<PerformanceMonitor>,
    audit: Arc<AuditTrail>,

    snapshots: Mutex<VecDeque<ConfigurationSnapshot>>,
    states: Mutex<Vec<RollbackState>>,
    /// Optional external mirror. Write-through, last-writer-wins; failures
    /// are logged and never block the manager.
    store: Mutex<Option<Arc<dyn SnapshotStore>>>,

    last_rollback_ms: AtomicU64,
    /// Consecutive full windows carrying a critical SLO alert.
    consecutive_critical_windows: AtomicU32,
    /// Last full-window index that was evaluated.
    last_window_index: AtomicU64,
    /// Lifetime request count at the last snapshot.
    last_snapshot_at: AtomicU64,
    gradual_in_progress: AtomicBool,
}

impl RollbackManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: RollbackConfig,
        window_size: usize,
        clock: SharedClock,
        flags: Arc<FeatureFlags>,
        matrix: Arc<CapabilityMatrix>,
        breakers: Arc<CircuitBreakerRegistry>,
        monitor: Arc<PerformanceMonitor>,
        audit: Arc<AuditTrail>,
    ) -> Self {
        Self {
            config,
            clock,
            window_size: window_size.max(1),
            flags,
            matrix,
            breakers,
            monitor,
            audit,
            snapshots: Mutex::new(VecDeque::new()),
            states: Mutex::new(Vec::new()),
            store: Mutex::new(None),
            last_rollback_ms: AtomicU64::new(0),
            consecutive_critical_windows: AtomicU32::new(0),
            last_window_index: AtomicU64::new(0),
            last_snapshot_at: AtomicU64::new(0),
            gradual_in_progress: AtomicBool::new(false),
        }
    }

    /// Hook called by the orchestrator after every completed request.
    ///
    /// Checks the emergency thresholds on every call and advances the
    /// window bookkeeping whenever a full window of requests has elapsed.
    pub fn on_request_completed(self: &Arc<Self>) {
        if !self.config.enabled {
            return;
        }

        let metrics = self.monitor.metrics();
        if metrics.request_count >= self.window_size.min(100) {
            let emergency = metrics.error_rate >= self.config.emergency.error_rate
                || metrics.p95_latency_ms >= self.config.emergency.p95_ms
                || metrics.cost_per_request >= self.config.emergency.cost_per_request;
            if emergency {
                self.emergency_rollback(format!(
                    "emergency window: error_rate={:.3} p95={:.0}ms cost={:.4}",
                    metrics.error_rate, metrics.p95_latency_ms, metrics.cost_per_request
                ));
                return;
            }
        }

        let window_index = self.monitor.lifetime_requests() / self.window_size as u64;
        let previous = self.last_window_index.swap(window_index, Ordering::SeqCst);
        if window_index <= previous {
            return;
        }

        // A full window elapsed.
        if self.monitor.has_critical_alert() {
            let streak = self
                .consecutive_critical_windows
                .fetch_add(1, Ordering::SeqCst)
                + 1;
            if streak >= self.config.slo_violation_threshold {
                self.consecutive_critical_windows.store(0, Ordering::SeqCst);
                let manager = Arc::clone(self);
                tokio::spawn(async move {
                    manager
                        .gradual_rollback(format!(
                            "{} consecutive windows with critical SLO alerts",
                            streak
                        ))
                        .await;
                });
            }
        } else {
            self.consecutive_critical_windows.store(0, Ordering::SeqCst);
            self.maybe_snapshot(&metrics);
        }
    }

    /// Capture a snapshot when the window was healthy: p95 under its
    /// warning threshold, error rate under 5%, cost per request under the
    /// warning threshold.
    fn maybe_snapshot(&self, metrics: &crate::monitor::PerformanceMetrics) {
        let healthy = metrics.request_count >= self.window_size.min(100)
            && metrics.error_rate < 0.05
            && metrics.p95_latency_ms < self.config.emergency.p95_ms / 2.0
            && metrics.cost_per_request < self.config.emergency.cost_per_request / 2.0;
        if !healthy {
            return;
        }
        let lifetime = self.monitor.lifetime_requests();
        let last = self.last_snapshot_at.load(Ordering::SeqCst);
        if lifetime.saturating_sub(last) < self.window_size as u64 {
            return;
        }
        self.last_snapshot_at.store(lifetime, Ordering::SeqCst);
        self.take_snapshot(metrics);
    }

    fn take_snapshot(&self, metrics: &crate::monitor::PerformanceMetrics) {
        let flags = self.flags.snapshot();
        let provider_weights: HashMap<String, f64> = Provider::ALL
            .iter()
            .map(|p| {
                (
                    p.as_str().to_string(),
                    self.flags.number(&format!("provider_weight_{}", p), 1.0),
                )
            })
            .collect();

        let snapshot = ConfigurationSnapshot {
            timestamp_ms: self.clock.now_ms(),
            provider_weights,
            model_overrides: self.matrix.all(),
            feature_flags: flags,
            performance_baseline: PerformanceBaseline {
                p95_latency_ms: metrics.p95_latency_ms,
                error_rate: metrics.error_rate,
                cost_per_request: metrics.cost_per_request,
            },
            checksum: String::new(),
        }
        .sealed();

        self.mirror_snapshot(&snapshot);

        let mut snapshots = match self.snapshots.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        snapshots.push_back(snapshot);
        while snapshots.len() > self.config.max_snapshots {
            snapshots.pop_front();
        }
        metrics::gauge!("conductor_config_snapshots").set(snapshots.len() as f64);
        tracing::info!(snapshots = snapshots.len(), "configuration snapshot taken");
    }

    /// Attach an external store; every subsequent snapshot is mirrored.
    pub fn set_snapshot_store(&self, store: Arc<dyn SnapshotStore>) {
        let mut guard = match self.store.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Some(store);
    }

    fn mirror_snapshot(&self, snapshot: &ConfigurationSnapshot) {
        let store = {
            let guard = match self.store.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.clone()
        };
        let Some(store) = store else { return };
        let Ok(bytes) = serde_json::to_vec(snapshot) else {
            return;
        };
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(error) = store.put("conductor/snapshot/latest", bytes).await {
                    tracing::warn!(error, "snapshot mirror write failed");
                }
            });
        }
    }

    /// Force a snapshot now, regardless of health gates. Used at shutdown.
    pub fn snapshot_now(&self) {
        let metrics = self.monitor.metrics();
        self.take_snapshot(&metrics);
    }

    /// Latest snapshot, if any.
    pub fn latest_snapshot(&self) -> Option<ConfigurationSnapshot> {
        let snapshots = match self.snapshots.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        snapshots.back().cloned()
    }

    pub fn snapshot_count(&self) -> usize {
        self.snapshots.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// All recorded rollback states, oldest first.
    pub fn states(&self) -> Vec<RollbackState> {
        match self.states.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn within_cooldown(&self) -> bool {
        let last = self.last_rollback_ms.load(Ordering::SeqCst);
        last != 0
            && self
                .clock
                .now_ms()
                .saturating_sub(last)
                < self.config.rollback_cooldown_ms
    }

    fn push_state(&self, state: RollbackState) {
        let mut states = match self.states.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        states.push(state);
    }

    fn audit_rollback(&self, state: &RollbackState) {
        let draft = EventDraft::new(
            EventType::Rollback,
            serde_json::to_string(state).unwrap_or_default(),
            ContentType::Metadata,
        )
        .meta("severity", serde_json::json!(state.severity))
        .meta("status", serde_json::json!(state.status))
        .meta("steps", serde_json::json!(state.steps.len()));
        if let Err(error) = self.audit.log_event(draft) {
            tracing::warn!(error = %error, "failed to audit rollback state");
        }
    }

    /// Emergency rollback: open every breaker, kill experimental flags,
    /// record one state, then refuse further attempts for the cooldown.
    pub fn emergency_rollback(&self, reason: String) -> Option<RollbackState> {
        if self.within_cooldown() {
            tracing::debug!("emergency rollback suppressed by cooldown");
            return None;
        }
        let now_ms = self.clock.now_ms();
        self.last_rollback_ms.store(now_ms, Ordering::SeqCst);

        self.breakers.force_open_all();
        let flipped = self.flags.disable_experimental();

        let state = RollbackState {
            id: format!("rb-{}", uuid::Uuid::new_v4()),
            reason,
            severity: RollbackSeverity::Emergency,
            status: RollbackStatus::Completed,
            started_ms: now_ms,
            completed_ms: Some(now_ms),
            steps: vec![
                StepRecord {
                    step: RollbackStep::FeatureFlagDisable,
                    at_ms: now_ms,
                    detail: format!("disabled experimental flags: {:?}", flipped),
                },
                StepRecord {
                    step: RollbackStep::ProviderWeightShift,
                    at_ms: now_ms,
                    detail: "all circuit breakers forced open".to_string(),
                },
            ],
        };
        metrics::counter!("conductor_rollbacks_total", "severity" => "emergency").increment(1);
        tracing::error!(reason = %state.reason, "emergency rollback executed");
        self.audit_rollback(&state);
        self.push_state(state.clone());
        Some(state)
    }

    /// Gradual rollback: ordered steps, each with a validation window.
    /// Stops at the first step that restores health; records every step.
    pub async fn gradual_rollback(&self, reason: String) -> Option<RollbackState> {
        if self.within_cooldown() {
            tracing::debug!("gradual rollback suppressed by cooldown");
            return None;
        }
        if self.gradual_in_progress.swap(true, Ordering::SeqCst) {
            return None;
        }
        let started_ms = self.clock.now_ms();
        self.last_rollback_ms.store(started_ms, Ordering::SeqCst);

        let mut state = RollbackState {
            id: format!("rb-{}", uuid::Uuid::new_v4()),
            reason,
            severity: RollbackSeverity::SloBased,
            status: RollbackStatus::InProgress,
            started_ms,
            completed_ms: None,
            steps: Vec::new(),
        };
        tracing::warn!(reason = %state.reason, "gradual rollback started");

        let snapshot = self.latest_snapshot();
        let step_wait = std::time::Duration::from_millis(
            self.config
                .gradual
                .step_duration_ms
                .min(self.config.validation_timeout_ms),
        );

        let mut recovered = false;
        for step in self.config.gradual.steps.clone() {
            let detail = self.apply_step(step, snapshot.as_ref());
            state.steps.push(StepRecord {
                step,
                at_ms: self.clock.now_ms(),
                detail,
            });

            // Validation window: give the step time to show effect.
            tokio::time::sleep(step_wait).await;
            if !self.monitor.has_critical_alert() {
                recovered = true;
                break;
            }
        }

        state.status = if recovered {
            RollbackStatus::Completed
        } else {
            RollbackStatus::Failed
        };
        state.completed_ms = Some(self.clock.now_ms());
        metrics::counter!("conductor_rollbacks_total", "severity" => "slo_based").increment(1);
        self.audit_rollback(&state);
        self.push_state(state.clone());
        self.gradual_in_progress.store(false, Ordering::SeqCst);
        Some(state)
    }

    fn apply_step(&self, step: RollbackStep, snapshot: Option<&ConfigurationSnapshot>) -> String {
        match step {
            RollbackStep::FeatureFlagDisable => {
                let flipped = self.flags.disable_experimental();
                format!("disabled experimental flags: {:?}", flipped)
            }
            RollbackStep::ModelSwap => match snapshot {
                Some(snap) if snap.verify() => {
                    self.matrix.restore(snap.model_overrides.clone());
                    format!("capability matrix restored from snapshot {}", snap.timestamp_ms)
                }
                Some(_) => "snapshot checksum mismatch, model swap skipped".to_string(),
                None => "no snapshot available, model swap skipped".to_string(),
            },
            RollbackStep::ProviderWeightShift => match snapshot {
                Some(snap) => {
                    for (provider, weight) in &snap.provider_weights {
                        self.flags.set(
                            format!("provider_weight_{}", provider),
                            serde_json::json!(weight),
                        );
                    }
                    "provider weights restored from snapshot".to_string()
                }
                None => "no snapshot available, provider weights untouched".to_string(),
            },
        }
    }

    /// Admin-triggered rollback. Bypasses the cooldown; restores the latest
    /// snapshot outright.
    pub fn trigger_manual(&self, reason: String) -> RollbackState {
        let now_ms = self.clock.now_ms();
        let snapshot = self.latest_snapshot();
        let mut steps = Vec::new();

        if let Some(snap) = &snapshot {
            if snap.verify() {
                self.flags.restore(snap.feature_flags.clone());
                self.matrix.restore(snap.model_overrides.clone());
                steps.push(StepRecord {
                    step: RollbackStep::ModelSwap,
                    at_ms: now_ms,
                    detail: format!("restored snapshot {}", snap.timestamp_ms),
                });
            } else {
                steps.push(StepRecord {
                    step: RollbackStep::ModelSwap,
                    at_ms: now_ms,
                    detail: "snapshot checksum mismatch, nothing restored".to_string(),
                });
            }
        }

        let status = if snapshot.is_some() {
            RollbackStatus::Completed
        } else {
            RollbackStatus::Cancelled
        };
        let state = RollbackState {
            id: format!("rb-{}", uuid::Uuid::new_v4()),
            reason,
            severity: RollbackSeverity::Manual,
            status,
            started_ms: now_ms,
            completed_ms: Some(now_ms),
            steps,
        };
        metrics::counter!("conductor_rollbacks_total", "severity" => "manual").increment(1);
        self.last_rollback_ms.store(now_ms, Ordering::SeqCst);
        self.audit_rollback(&state);
        self.push_state(state.clone());
        state
    }

    /// Background task consuming the monitor's alert bus. Keeps the
    /// manager reactive between completed requests.
    pub fn spawn_subscriber(
        self: Arc<Self>,
        mut alerts: tokio::sync::broadcast::Receiver<SloAlert>,
        token: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    received = alerts.recv() => match received {
                        Ok(alert) => {
                            tracing::debug!(
                                slo = alert.slo.as_str(),
                                severity = ?alert.severity,
                                "rollback manager received alert"
                            );
                            self.on_request_completed();
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                            tracing::warn!(missed, "rollback manager lagged on alert bus");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        })
    }
}
