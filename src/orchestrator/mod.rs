//! Orchestrator façade
//!
//! Owns every component and runs the per-request pipeline: route → safety →
//! cache → invoke (through the fallback engine) → safety → cache store →
//! quality → audit → monitor → rollback. Components never reach into each
//! other; everything is wired here.
//!
//! Lock order, for deadlock freedom by inspection: matrix → flags →
//! breaker → cache → monitor → rollback → audit. No component takes two of
//! these locks at once.

pub mod health;

pub use health::{HealthState, HealthStatus, ProviderHealth};

use crate::audit::{
    AuditFilter, AuditTrail, ContentType, EventDraft, EventType, IntegrityReport, MemorySink,
};
use crate::bandit::{Bucket, ThompsonSampler};
use crate::cache::{HitRateOptimizer, SemanticCache, SyntheticWarmup, WarmupSource};
use crate::capability::{CapabilityError, CapabilityMatrix, CapabilityUpdate, ModelCapability};
use crate::clock::{SharedClock, SystemClock};
use crate::config::{OrchestratorConfig, WarmupStrategy};
use crate::fallback::{CircuitBreakerRegistry, FallbackEngine};
use crate::flags::FeatureFlags;
use crate::monitor::{PerformanceMonitor, RequestSample};
use crate::provider::ProviderInvoker;
use crate::quality::QualityMonitor;
use crate::rollback::{RollbackManager, RollbackState};
use crate::routing::{RoutePlan, Router};
use crate::safety::{CheckStage, ComplianceValidator, SafetyValidator, SsrfValidator};
use crate::types::{ErrorKind, Provider, Request, RequestContext, Response};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Warm-up source that runs the real invocation path once per pattern.
struct LiveWarmup {
    router: Arc<Router>,
    engine: Arc<FallbackEngine>,
    invoker: Arc<dyn ProviderInvoker>,
    cache: Arc<SemanticCache>,
}

#[async_trait::async_trait]
impl WarmupSource for LiveWarmup {
    async fn produce(&self, request: &Request) -> Option<Response> {
        let plan = self.router.route(request).ok()?;
        let primary = plan.candidates.first()?.clone();
        let response = self
            .engine
            .run(
                request,
                primary,
                plan.candidates,
                self.invoker.as_ref(),
                &self.cache,
                &CancellationToken::new(),
            )
            .await;
        if response.success && response.provider != Provider::Fallback {
            Some(response)
        } else {
            None
        }
    }
}

/// The orchestrator.
pub struct Orchestrator {
    config: OrchestratorConfig,
    clock: SharedClock,
    flags: Arc<FeatureFlags>,
    matrix: Arc<CapabilityMatrix>,
    breakers: Arc<CircuitBreakerRegistry>,
    bandit: Arc<ThompsonSampler>,
    router: Arc<Router>,
    engine: Arc<FallbackEngine>,
    cache: Arc<SemanticCache>,
    optimizer: Arc<HitRateOptimizer>,
    safety: SafetyValidator,
    ssrf: SsrfValidator,
    compliance: ComplianceValidator,
    monitor: Arc<PerformanceMonitor>,
    rollback: Arc<RollbackManager>,
    quality: Arc<QualityMonitor>,
    audit: Arc<AuditTrail>,
    invoker: Arc<dyn ProviderInvoker>,

    shutdown: CancellationToken,
    in_flight: AtomicU64,
    background: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl Orchestrator {
    /// Build with the system clock and an in-memory audit sink.
    pub fn new(config: OrchestratorConfig, invoker: Arc<dyn ProviderInvoker>) -> Self {
        Self::with_parts(
            config,
            invoker,
            Arc::new(SystemClock),
            Box::new(MemorySink::new()),
        )
    }

    /// Build with an injected clock and audit sink. Tests use a manual
    /// clock here; production passes a file or stdout sink.
    pub fn with_parts(
        config: OrchestratorConfig,
        invoker: Arc<dyn ProviderInvoker>,
        clock: SharedClock,
        sink: Box<dyn crate::audit::AuditSink>,
    ) -> Self {
        let flags = Arc::new(FeatureFlags::from_map(config.feature_flags.clone()));
        let matrix = Arc::new(CapabilityMatrix::new(if config.models.is_empty() {
            crate::capability::default_fleet()
        } else {
            config.models.clone()
        }));
        let breakers = Arc::new(CircuitBreakerRegistry::new(
            config.fallback.circuit_breaker_threshold,
            config.fallback.circuit_cooldown_ms,
            clock.clone(),
        ));
        let bandit = Arc::new(ThompsonSampler::new());
        let router = Arc::new(Router::new(
            Arc::clone(&matrix),
            Arc::clone(&breakers),
            Arc::clone(&bandit),
            Arc::clone(&flags),
            config.routing.clone(),
        ));
        let engine = Arc::new(FallbackEngine::new(
            config.fallback.clone(),
            Arc::clone(&breakers),
        ));
        let cache = Arc::new(SemanticCache::new(config.cache.clone(), clock.clone()));
        let optimizer = Arc::new(HitRateOptimizer::new(config.optimizer.clone(), clock.clone()));
        let monitor = Arc::new(PerformanceMonitor::new(config.monitor.clone(), clock.clone()));
        let audit = Arc::new(AuditTrail::new(config.audit.clone(), clock.clone(), sink));
        let rollback = Arc::new(RollbackManager::new(
            config.rollback.clone(),
            config.monitor.window_size,
            clock.clone(),
            Arc::clone(&flags),
            Arc::clone(&matrix),
            Arc::clone(&breakers),
            Arc::clone(&monitor),
            Arc::clone(&audit),
        ));
        let quality = Arc::new(QualityMonitor::new(config.quality.clone(), clock.clone()));

        Self {
            safety: SafetyValidator::new(config.safety.clone()),
            ssrf: SsrfValidator::new(config.ssrf.clone()),
            compliance: ComplianceValidator::new(config.compliance.clone()),
            config,
            clock,
            flags,
            matrix,
            breakers,
            bandit,
            router,
            engine,
            cache,
            optimizer,
            monitor,
            rollback,
            quality,
            audit,
            invoker,
            shutdown: CancellationToken::new(),
            in_flight: AtomicU64::new(0),
            background: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the background tasks: the optimizer loop and the rollback
    /// manager's alert subscriber. Idempotent per orchestrator instance.
    pub fn start(&self) {
        let mut background = match self.background.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !background.is_empty() {
            return;
        }

        let warmup = self.warmup_source();
        background.push(Arc::clone(&self.optimizer).spawn_loop(
            Arc::clone(&self.cache),
            warmup,
            self.shutdown.child_token(),
        ));
        background.push(Arc::clone(&self.rollback).spawn_subscriber(
            self.monitor.subscribe(),
            self.shutdown.child_token(),
        ));

        // Quality alerts feed the rollback manager the same way SLO alerts
        // do: over a channel, never through direct references.
        let rollback = Arc::clone(&self.rollback);
        let mut quality_alerts = self.quality.subscribe();
        let token = self.shutdown.child_token();
        background.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    received = quality_alerts.recv() => match received {
                        Ok(alert) => {
                            if alert.severity == crate::quality::QualityAlertSeverity::Critical {
                                tracing::warn!(
                                    model = %alert.model_id,
                                    kind = ?alert.kind,
                                    "critical quality alert forwarded to rollback manager"
                                );
                                rollback.on_request_completed();
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        }));
        tracing::info!("orchestrator background tasks started");
    }

    fn warmup_source(&self) -> Arc<dyn WarmupSource> {
        match self.config.optimizer.warmup_strategy {
            WarmupStrategy::Synthetic => Arc::new(SyntheticWarmup),
            WarmupStrategy::Live => Arc::new(LiveWarmup {
                router: Arc::clone(&self.router),
                engine: Arc::clone(&self.engine),
                invoker: Arc::clone(&self.invoker),
                cache: Arc::clone(&self.cache),
            }),
        }
    }

    /// Primary entry point.
    pub async fn execute(&self, request: Request) -> Response {
        self.execute_with_cancel(request, self.shutdown.child_token())
            .await
    }

    /// Entry point with caller-controlled cancellation. Cancelling the
    /// token is equivalent to an immediate deadline expiry.
    pub async fn execute_with_cancel(
        &self,
        request: Request,
        cancel: CancellationToken,
    ) -> Response {
        if self.shutdown.is_cancelled() {
            return Response::failure(
                Provider::Fallback,
                "shutdown",
                ErrorKind::AllProvidersUnavailable,
                &request.id,
            );
        }

        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let started = std::time::Instant::now();
        let response = self.run_pipeline(&request, &cancel).await;
        let total_ms = started.elapsed().as_millis() as u64;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        tracing::info!(
            request_id = %request.id,
            provider = %response.provider,
            model = %response.model_id,
            success = response.success,
            cached = response.cached,
            latency_ms = total_ms,
            "request finished"
        );
        response
    }

    async fn run_pipeline(&self, request: &Request, cancel: &CancellationToken) -> Response {
        self.log_audit(
            EventDraft::new(EventType::AiRequestStart, &request.prompt, ContentType::Prompt)
                .for_request(request),
        );
        self.optimizer.observe(request);

        // Outbound URLs inside tool descriptors go through the SSRF
        // validator before anything else can touch them.
        if let Some(response) = self.check_tool_urls(request) {
            return self.finish(request, response, None).await;
        }

        // Pre-invocation safety.
        let prompt_check = self.safety.check(&request.prompt, CheckStage::Prompt);
        let pii_types = prompt_check.pii_types();
        if !pii_types.is_empty() {
            self.log_audit(
                EventDraft::new(EventType::PiiDetection, &request.prompt, ContentType::Prompt)
                    .for_request(request)
                    .pii_types(pii_types),
            );
        }
        if !prompt_check.allowed {
            tracing::warn!(
                request_id = %request.id,
                violations = prompt_check.violations.len(),
                "prompt rejected by safety policy"
            );
            let response = Response::failure(
                Provider::Fallback,
                "safety",
                ErrorKind::SafetyRejectedInput,
                &request.id,
            );
            return self.finish(request, response, None).await;
        }

        // Routing.
        let plan = match self.router.route(request) {
            Ok(plan) => plan,
            Err(error) => {
                let kind = error.error_kind();
                tracing::warn!(request_id = %request.id, error = %error, "routing failed");
                let response =
                    Response::failure(Provider::Fallback, "router", kind, &request.id);
                return self.finish(request, response, None).await;
            }
        };

        // Compliance gate on the chosen route.
        let classification = ComplianceValidator::classify(
            request.context.pii,
            request.context.domain,
            request.context.tenant.as_deref(),
        );
        let check = self
            .compliance
            .validate_route(plan.decision.provider, classification);
        if !check.compliant {
            let reason = check.reason.unwrap_or_default();
            self.log_audit(
                EventDraft::new(EventType::ComplianceViolation, &reason, ContentType::Metadata)
                    .for_request(request)
                    .route(plan.decision.provider, &plan.decision.model_id),
            );
            let response = Response::failure(
                plan.decision.provider,
                &plan.decision.model_id,
                ErrorKind::ComplianceViolation,
                &request.id,
            );
            return self.finish(request, response, None).await;
        }

        // Cache lookup.
        if let Some(hit) = self.cache.lookup(request) {
            self.optimizer.record_cache_result(request, true);
            self.log_audit(
                EventDraft::new(EventType::CacheHit, &hit.text, ContentType::Response)
                    .for_request(request)
                    .route(hit.provider, &hit.model_id),
            );
            return self.finish(request, hit, None).await;
        }
        self.optimizer.record_cache_result(request, false);
        self.maybe_spawn_on_demand_cycle();

        // Invocation through the fallback engine.
        let primary = plan.candidates[0].clone();
        let mut response = self
            .engine
            .run(
                request,
                primary,
                plan.candidates.clone(),
                self.invoker.as_ref(),
                &self.cache,
                cancel,
            )
            .await;

        // Post-invocation safety.
        if response.success {
            let response_check = self.safety.check(&response.text, CheckStage::Response);
            let response_pii = response_check.pii_types();
            if !response_pii.is_empty() {
                self.log_audit(
                    EventDraft::new(
                        EventType::PiiDetection,
                        &response.text,
                        ContentType::Response,
                    )
                    .for_request(request)
                    .route(response.provider, &response.model_id)
                    .pii_types(response_pii),
                );
            }
            if !response_check.allowed {
                tracing::warn!(
                    request_id = %request.id,
                    "response rejected by safety policy"
                );
                response = Response::failure(
                    response.provider,
                    &response.model_id,
                    ErrorKind::SafetyRejectedOutput,
                    &request.id,
                )
                .with_latency(response.latency_ms);
            }
        }

        // Cache store: live successful responses only; degraded answers
        // never enter the cache.
        if response.success && !response.cached && response.provider != Provider::Fallback {
            self.cache.insert(request, &response);
            self.optimizer
                .record_outcome(request, response.latency_ms, response.cost_euro);
        }

        // Quality assessment.
        if response.success && response.provider != Provider::Fallback {
            let assessment = self.quality.assess(request, &response);
            tracing::debug!(
                request_id = %request.id,
                score = assessment.score,
                "quality assessed"
            );
        }

        self.finish(request, response, Some(plan)).await
    }

    /// Shared tail of the pipeline: audit completion, monitor sample,
    /// rollback hook, bandit outcome.
    async fn finish(
        &self,
        request: &Request,
        response: Response,
        plan: Option<RoutePlan>,
    ) -> Response {
        let event_type = if response.success {
            EventType::AiRequestComplete
        } else {
            EventType::AiRequestError
        };
        self.log_audit(
            EventDraft::new(event_type, &response.text, ContentType::Response)
                .for_request(request)
                .route(response.provider, &response.model_id)
                .outcome(
                    response.latency_ms,
                    response.cost_euro,
                    response.tokens_used,
                    response.error_kind,
                ),
        );

        self.monitor
            .record(RequestSample::from_response(&response, self.clock.now_ms()));
        self.rollback.on_request_completed();

        // Bandit outcome: composite success over live invocations only.
        if let Some(plan) = plan {
            if !response.cached && response.provider != Provider::Fallback {
                let reward = response.success
                    && response.latency_ms <= request.context.sla_ms
                    && response.text.chars().count() > 10;
                self.bandit.record(
                    plan.bucket,
                    response.provider,
                    reward,
                    response.cost_euro,
                    response.latency_ms,
                );
            }
        }

        response
    }

    /// Scan tool descriptors for outbound URLs and validate each one.
    fn check_tool_urls(&self, request: &Request) -> Option<Response> {
        for tool in &request.tools {
            for url in collect_urls(&tool.parameters) {
                let verdict = self.ssrf.validate(&url);
                if !verdict.allowed {
                    let category = verdict
                        .blocked_category
                        .map(|c| c.as_str())
                        .unwrap_or("unknown");
                    self.log_audit(
                        EventDraft::new(EventType::SsrfViolation, &url, ContentType::Metadata)
                            .for_request(request)
                            .meta("category", serde_json::json!(category))
                            .meta("tool", serde_json::json!(tool.name)),
                    );
                    tracing::warn!(
                        request_id = %request.id,
                        tool = %tool.name,
                        category,
                        "outbound URL blocked"
                    );
                    return Some(Response::failure(
                        Provider::Fallback,
                        "ssrf",
                        ErrorKind::SsrfBlocked,
                        &request.id,
                    ));
                }
            }
        }
        None
    }

    fn maybe_spawn_on_demand_cycle(&self) {
        if !self.optimizer.needs_cycle() {
            return;
        }
        let optimizer = Arc::clone(&self.optimizer);
        let cache = Arc::clone(&self.cache);
        let warmup = self.warmup_source();
        tokio::spawn(async move {
            tracing::info!("frequent-query hit rate below target, running optimizer cycle");
            optimizer.run_cycle(cache.as_ref(), warmup.as_ref()).await;
        });
    }

    fn log_audit(&self, draft: EventDraft) {
        if let Err(error) = self.audit.log_event(draft) {
            tracing::warn!(error = %error, "audit event dropped");
        }
    }

    // ----- administrative and read-only operations -----

    /// Validate an outbound URL against the SSRF policy, recording any
    /// violation in the audit trail.
    pub fn validate_outbound_url(&self, url: &str) -> crate::safety::SsrfVerdict {
        let verdict = self.ssrf.validate(url);
        if !verdict.allowed {
            let category = verdict
                .blocked_category
                .map(|c| c.as_str())
                .unwrap_or("unknown");
            self.log_audit(
                EventDraft::new(EventType::SsrfViolation, url, ContentType::Metadata)
                    .meta("category", serde_json::json!(category)),
            );
        }
        verdict
    }

    /// Models a request with this context could route to right now.
    pub fn available_models(&self, context: &RequestContext) -> Vec<ModelCapability> {
        self.router.available_models(context)
    }

    /// Admin: apply a partial capability update. Effective immediately for
    /// new requests.
    pub fn update_capability(
        &self,
        provider: Provider,
        model_id: &str,
        update: &CapabilityUpdate,
    ) -> Result<ModelCapability, CapabilityError> {
        let updated = self.matrix.update(provider, model_id, update)?;
        self.log_audit(
            EventDraft::new(
                EventType::ConfigChange,
                serde_json::to_string(update).unwrap_or_default(),
                ContentType::Metadata,
            )
            .route(provider, model_id),
        );
        Ok(updated)
    }

    /// Admin: clear bandit state for one bucket, or all buckets.
    pub fn reset_bandit(&self, bucket: Option<Bucket>) {
        self.bandit.reset(bucket);
        self.log_audit(
            EventDraft::new(EventType::ConfigChange, "bandit reset", ContentType::Metadata)
                .meta("scope", serde_json::json!(bucket.map(|b| b.to_string()))),
        );
    }

    /// Read-only health report.
    pub fn health_status(&self) -> HealthStatus {
        let breakers = self.breakers.snapshot();
        let alerts = self.monitor.active_alerts();
        let providers = breakers
            .iter()
            .map(|snapshot| ProviderHealth {
                provider: snapshot.provider,
                breaker: *snapshot,
                metrics: self.monitor.provider_metrics(snapshot.provider),
            })
            .collect();
        HealthStatus {
            overall: HealthStatus::derive_overall(&breakers, &alerts),
            metrics: self.monitor.metrics(),
            providers,
            alerts,
            cache: self.cache.stats(),
        }
    }

    /// Admin: run a manual rollback to the latest healthy snapshot.
    pub fn trigger_manual_rollback(&self, reason: impl Into<String>) -> RollbackState {
        self.rollback.trigger_manual(reason.into())
    }

    /// Query the audit trail.
    pub fn audit_events(&self, filter: &AuditFilter) -> Vec<crate::audit::AuditEvent> {
        self.audit.events(filter)
    }

    /// Verify hashes and chain linkage for a set of events.
    pub fn verify_integrity(&self, events: &[crate::audit::AuditEvent]) -> IntegrityReport {
        AuditTrail::verify_integrity(events)
    }

    /// All rollback states recorded so far.
    pub fn rollback_states(&self) -> Vec<RollbackState> {
        self.rollback.states()
    }

    /// Frequent-set cache hit rate, None before any frequent lookup.
    pub fn frequent_hit_rate(&self) -> Option<f64> {
        self.optimizer.frequent_hit_rate()
    }

    /// Runtime feature flags, for embedders that toggle behavior live.
    pub fn feature_flags(&self) -> &Arc<FeatureFlags> {
        &self.flags
    }

    /// Attach an external key-value store; configuration snapshots are
    /// mirrored to it write-through for crash recovery.
    pub fn set_snapshot_store(&self, store: Arc<dyn crate::provider::SnapshotStore>) {
        self.rollback.set_snapshot_store(store);
    }

    /// Run one optimizer cycle inline. Admin/test affordance; the
    /// background loop does this on its own cadence.
    pub async fn run_optimizer_cycle(&self) -> crate::cache::CycleReport {
        let warmup = self.warmup_source();
        self.optimizer
            .run_cycle(self.cache.as_ref(), warmup.as_ref())
            .await
    }

    /// Graceful shutdown: stop intake, drain in-flight requests up to the
    /// grace period, stop background tasks, flush the audit sink, and write
    /// a final snapshot.
    pub async fn shutdown(&self) {
        tracing::info!("orchestrator shutdown started");
        self.shutdown.cancel();

        let grace = std::time::Duration::from_millis(self.config.effective_shutdown_grace_ms());
        let deadline = std::time::Instant::now() + grace;
        while self.in_flight.load(Ordering::SeqCst) > 0 && std::time::Instant::now() < deadline {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        let stranded = self.in_flight.load(Ordering::SeqCst);
        if stranded > 0 {
            tracing::warn!(stranded, "shutdown grace expired with requests in flight");
        }

        let handles: Vec<tokio::task::JoinHandle<()>> = {
            let mut background = match self.background.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            background.drain(..).collect()
        };
        for handle in handles {
            let _ = tokio::time::timeout(std::time::Duration::from_secs(1), handle).await;
        }

        self.rollback.snapshot_now();
        if let Err(error) = self.audit.flush() {
            tracing::warn!(error = %error, "audit flush failed during shutdown");
        }
        tracing::info!("orchestrator shutdown complete");
    }
}

/// Collect string values that look like URLs from a JSON tree.
fn collect_urls(value: &serde_json::Value) -> Vec<String> {
    let mut urls = Vec::new();
    match value {
        serde_json::Value::String(s) => {
            let lowered = s.trim().to_lowercase();
            if lowered.contains("://") {
                urls.push(s.trim().to_string());
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                urls.extend(collect_urls(item));
            }
        }
        serde_json::Value::Object(map) => {
            for item in map.values() {
                urls.extend(collect_urls(item));
            }
        }
        _ => {}
    }
    urls
}
