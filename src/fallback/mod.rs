//! Fallback engine and circuit breakers
//!
//! Every outbound invocation goes through here: bounded retries with
//! exponential backoff, error-kind-driven alternate selection, per-provider
//! circuit breaking, and a configurable degradation ladder once everything
//! else failed.

pub mod breaker;

pub use breaker::{BreakerSnapshot, BreakerState, CircuitBreakerRegistry};

use crate::cache::SemanticCache;
use crate::capability::ModelCapability;
use crate::config::{DegradationMode, FallbackConfig};
use crate::provider::ProviderInvoker;
use crate::types::{Domain, ErrorKind, Provider, Request, Response};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Provider deadline, expressed as a multiple of the model's nominal
/// latency. The effective invocation timeout is the minimum of this and the
/// caller's SLA.
const PROVIDER_DEADLINE_FACTOR: u64 = 10;

/// Model id stamped on static degraded answers.
pub const STATIC_ANSWER_MODEL: &str = "static-fast-answer";

/// Static per-domain answers used by the fast-answer degradation mode.
pub fn static_answer(domain: Domain) -> &'static str {
    match domain {
        Domain::General => {
            "I cannot reach the model fleet right now. Please try again in a moment."
        }
        Domain::Culinary => {
            "The recipe assistant is briefly unavailable. Your request was not lost; please retry shortly."
        }
        Domain::Support => {
            "Our assistant is temporarily unavailable. A human agent can help you via the support portal."
        }
        Domain::Legal => {
            "The legal research assistant is temporarily unavailable. No advice could be generated; please retry."
        }
        Domain::Medical => {
            "The medical information assistant is temporarily unavailable. For urgent concerns, contact a medical professional."
        }
    }
}

/// The retry/degradation engine.
pub struct FallbackEngine {
    config: FallbackConfig,
    breakers: Arc<CircuitBreakerRegistry>,
}

impl FallbackEngine {
    pub fn new(config: FallbackConfig, breakers: Arc<CircuitBreakerRegistry>) -> Self {
        Self { config, breakers }
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    /// Run the invocation with retries, fallbacks, and degradation.
    ///
    /// `alternates` are the router's feasible candidates in score order;
    /// they may include the primary. Always returns a response; provider
    /// errors only surface when no degradation mode applies.
    pub async fn run(
        &self,
        request: &Request,
        primary: ModelCapability,
        alternates: Vec<ModelCapability>,
        invoker: &dyn ProviderInvoker,
        cache: &SemanticCache,
        cancel: &CancellationToken,
    ) -> Response {
        let mut target = primary;
        let mut last_kind = ErrorKind::AllProvidersUnavailable;

        for attempt in 1..=self.config.max_retries {
            if cancel.is_cancelled() {
                last_kind = ErrorKind::ProviderTimeout;
                break;
            }

            // Breaker check before each attempt; open means skip straight
            // to fallback selection.
            let probing = self.breakers.state(target.provider) == BreakerState::HalfOpen;
            if !self.breakers.allow(target.provider) {
                match self.select_fallback(last_kind, &target, &alternates) {
                    Some(next) => {
                        tracing::debug!(
                            from = %target.provider,
                            to = %next.provider,
                            "breaker open, switching provider"
                        );
                        target = next;
                        continue;
                    }
                    None => {
                        last_kind = ErrorKind::AllProvidersUnavailable;
                        break;
                    }
                }
            }

            let deadline = self.deadline_for(request, &target, probing);
            let started = std::time::Instant::now();
            let outcome = tokio::select! {
                _ = cancel.cancelled() => Err(ErrorKind::ProviderTimeout),
                invoked = tokio::time::timeout(
                    deadline,
                    invoker.invoke(
                        target.provider,
                        &target.model_id,
                        &request.prompt,
                        &request.tools,
                        deadline,
                    ),
                ) => match invoked {
                    Ok(Ok(reply)) => Ok(reply),
                    Ok(Err(error)) => Err(error.kind()),
                    Err(_) => Err(ErrorKind::ProviderTimeout),
                },
            };
            let latency_ms = started.elapsed().as_millis() as u64;

            match outcome {
                Ok(reply) => {
                    self.breakers.record_success(target.provider);
                    let output_tokens = reply
                        .tokens_used
                        .unwrap_or((reply.text.len() / 4) as u32);
                    let cost =
                        target.estimate_cost(request.estimated_tokens(), output_tokens);
                    let mut response =
                        Response::ok(target.provider, &target.model_id, reply.text, &request.id)
                            .with_latency(latency_ms)
                            .with_cost(cost);
                    response.tool_calls = reply.tool_calls;
                    response.tokens_used = reply.tokens_used;
                    return response;
                }
                Err(kind) => {
                    last_kind = kind;
                    metrics::counter!(
                        "conductor_invocation_failures_total",
                        "provider" => target.provider.as_str(),
                        "kind" => kind.as_str(),
                    )
                    .increment(1);
                    tracing::warn!(
                        provider = %target.provider,
                        model = %target.model_id,
                        attempt,
                        kind = %kind,
                        "invocation attempt failed"
                    );

                    if kind.counts_against_breaker() {
                        self.breakers.record_failure(target.provider);
                    }
                    if kind == ErrorKind::AuthorizationRefused {
                        // Fatal: surfaces without retry or degradation.
                        return Response::failure(
                            target.provider,
                            &target.model_id,
                            kind,
                            &request.id,
                        )
                        .with_latency(latency_ms);
                    }
                    if !kind.is_retryable() {
                        break;
                    }

                    if let Some(next) = self.select_fallback(kind, &target, &alternates) {
                        target = next;
                    }

                    if attempt < self.config.max_retries {
                        let backoff = Duration::from_millis(
                            self.config.retry_base_delay_ms << (attempt - 1),
                        );
                        tokio::select! {
                            _ = cancel.cancelled() => {
                                last_kind = ErrorKind::ProviderTimeout;
                                break;
                            }
                            _ = tokio::time::sleep(backoff) => {}
                        }
                    }
                }
            }
        }

        self.degrade(request, last_kind, &alternates, invoker, cache, cancel)
            .await
    }

    /// Effective invocation timeout: the caller SLA capped by the
    /// provider's own deadline. Half-open probes get twice the budget.
    fn deadline_for(
        &self,
        request: &Request,
        target: &ModelCapability,
        probing: bool,
    ) -> Duration {
        let provider_deadline = target.default_latency_ms * PROVIDER_DEADLINE_FACTOR;
        let mut timeout_ms = request.context.sla_ms.min(provider_deadline).max(1);
        if probing {
            timeout_ms *= 2;
        }
        Duration::from_millis(timeout_ms)
    }

    /// Pick the next target by error-kind policy: timeouts go to the
    /// fastest feasible alternate, quota errors to the cheapest, everything
    /// else to the most capable. Same-provider alternates are a last resort.
    fn select_fallback(
        &self,
        kind: ErrorKind,
        current: &ModelCapability,
        alternates: &[ModelCapability],
    ) -> Option<ModelCapability> {
        let viable = |c: &&ModelCapability| {
            !(c.provider == current.provider && c.model_id == current.model_id)
                && !self.breakers.is_open(c.provider)
        };

        let other_provider: Vec<&ModelCapability> = alternates
            .iter()
            .filter(viable)
            .filter(|c| c.provider != current.provider)
            .collect();
        let pool: Vec<&ModelCapability> = if other_provider.is_empty() {
            alternates.iter().filter(viable).collect()
        } else {
            other_provider
        };

        let chosen = match kind {
            ErrorKind::ProviderTimeout => pool.into_iter().min_by(|a, b| {
                a.default_latency_ms
                    .cmp(&b.default_latency_ms)
                    .then_with(|| a.model_id.cmp(&b.model_id))
            }),
            ErrorKind::ProviderQuotaExceeded => pool.into_iter().min_by(|a, b| {
                a.blended_cost_per_1k()
                    .total_cmp(&b.blended_cost_per_1k())
                    .then_with(|| a.model_id.cmp(&b.model_id))
            }),
            _ => pool.into_iter().max_by(|a, b| {
                a.context_tokens
                    .cmp(&b.context_tokens)
                    .then_with(|| b.model_id.cmp(&a.model_id))
            }),
        };
        chosen.cloned()
    }

    /// Degradation ladder, entered once all attempts failed.
    async fn degrade(
        &self,
        request: &Request,
        last_kind: ErrorKind,
        alternates: &[ModelCapability],
        invoker: &dyn ProviderInvoker,
        cache: &SemanticCache,
        cancel: &CancellationToken,
    ) -> Response {
        metrics::counter!(
            "conductor_degradations_total",
            "mode" => match self.config.degradation_mode {
                DegradationMode::FastAnswer => "fast_answer",
                DegradationMode::CachedResponse => "cached_response",
                DegradationMode::SimplifiedModel => "simplified_model",
            },
        )
        .increment(1);

        match self.config.degradation_mode {
            DegradationMode::FastAnswer => self.fast_answer(request),
            DegradationMode::CachedResponse => {
                if let Some(found) = cache.closest_for_degradation(request) {
                    tracing::info!(request_id = %request.id, "degraded to cached response");
                    return found;
                }
                self.fast_answer(request)
            }
            DegradationMode::SimplifiedModel => {
                // One extra attempt against the least capable model still
                // reachable.
                let simplest = alternates
                    .iter()
                    .filter(|c| !self.breakers.is_open(c.provider))
                    .min_by(|a, b| {
                        a.context_tokens
                            .cmp(&b.context_tokens)
                            .then_with(|| {
                                a.blended_cost_per_1k().total_cmp(&b.blended_cost_per_1k())
                            })
                    });
                if let Some(target) = simplest {
                    if !cancel.is_cancelled() && self.breakers.allow(target.provider) {
                        let deadline = self.deadline_for(request, target, false);
                        let invoked = tokio::time::timeout(
                            deadline,
                            invoker.invoke(
                                target.provider,
                                &target.model_id,
                                &request.prompt,
                                &request.tools,
                                deadline,
                            ),
                        )
                        .await;
                        if let Ok(Ok(reply)) = invoked {
                            self.breakers.record_success(target.provider);
                            tracing::info!(
                                request_id = %request.id,
                                model = %target.model_id,
                                "degraded to simplified model"
                            );
                            return Response::ok(
                                target.provider,
                                &target.model_id,
                                reply.text,
                                &request.id,
                            );
                        }
                        self.breakers.record_failure(target.provider);
                    }
                }
                // Non-retryable rejections surface rather than degrade to a
                // canned answer that would mask a policy decision.
                if !last_kind.is_retryable() && last_kind != ErrorKind::AllProvidersUnavailable {
                    return Response::failure(
                        Provider::Fallback,
                        STATIC_ANSWER_MODEL,
                        last_kind,
                        &request.id,
                    );
                }
                self.fast_answer(request)
            }
        }
    }

    fn fast_answer(&self, request: &Request) -> Response {
        tracing::info!(request_id = %request.id, "degraded to static fast answer");
        Response::ok(
            Provider::Fallback,
            STATIC_ANSWER_MODEL,
            static_answer(request.context.domain),
            &request.id,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::CacheConfig;
    use crate::provider::{InvokeError, ProviderReply};
    use crate::types::{RequestContext, ToolDescriptor};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    /// Invoker that fails a set number of times, then succeeds.
    struct FlakyInvoker {
        failures: AtomicU32,
        error: InvokeError,
    }

    impl FlakyInvoker {
        fn failing(times: u32, error: InvokeError) -> Self {
            Self {
                failures: AtomicU32::new(times),
                error,
            }
        }
    }

    #[async_trait]
    impl ProviderInvoker for FlakyInvoker {
        async fn invoke(
            &self,
            provider: Provider,
            model_id: &str,
            _prompt: &str,
            _tools: &[ToolDescriptor],
            _deadline: Duration,
        ) -> Result<ProviderReply, InvokeError> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(self.error.clone());
            }
            Ok(ProviderReply::text(format!("{}:{} ok", provider, model_id)))
        }
    }

    fn engine() -> (FallbackEngine, Arc<CircuitBreakerRegistry>, SemanticCache) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let breakers = Arc::new(CircuitBreakerRegistry::new(5, 300_000, clock.clone()));
        let engine = FallbackEngine::new(
            FallbackConfig {
                retry_base_delay_ms: 1,
                ..Default::default()
            },
            breakers.clone(),
        );
        let cache = SemanticCache::new(CacheConfig::default(), clock);
        (engine, breakers, cache)
    }

    fn fleet() -> Vec<ModelCapability> {
        crate::capability::default_fleet()
    }

    fn request() -> Request {
        Request::new("hello there", RequestContext::default())
    }

    fn primary() -> ModelCapability {
        fleet()
            .into_iter()
            .find(|c| c.model_id == "gemini-flash")
            .unwrap()
    }

    #[tokio::test]
    async fn first_attempt_success_needs_no_retry() {
        let (engine, _breakers, cache) = engine();
        let invoker = FlakyInvoker::failing(0, InvokeError::ServiceUnavailable);
        let response = engine
            .run(
                &request(),
                primary(),
                fleet(),
                &invoker,
                &cache,
                &CancellationToken::new(),
            )
            .await;
        assert!(response.success);
        assert_eq!(response.provider, Provider::Gemini);
        assert!(response.cost_euro > 0.0);
    }

    #[tokio::test]
    async fn single_retry_succeeds_on_second_attempt() {
        let (engine, _breakers, cache) = engine();
        let invoker = FlakyInvoker::failing(1, InvokeError::ServiceUnavailable);
        let response = engine
            .run(
                &request(),
                primary(),
                fleet(),
                &invoker,
                &cache,
                &CancellationToken::new(),
            )
            .await;
        assert!(response.success);
        assert_ne!(response.provider, Provider::Fallback);
    }

    #[tokio::test]
    async fn exhausted_retries_degrade_to_static_answer() {
        let (engine, _breakers, cache) = engine();
        let invoker = FlakyInvoker::failing(10, InvokeError::Timeout);
        let response = engine
            .run(
                &request(),
                primary(),
                vec![primary()],
                &invoker,
                &cache,
                &CancellationToken::new(),
            )
            .await;
        assert!(response.success);
        assert_eq!(response.provider, Provider::Fallback);
        assert_eq!(response.model_id, STATIC_ANSWER_MODEL);
        assert_eq!(response.text, static_answer(Domain::General));
    }

    #[tokio::test]
    async fn authorization_refused_is_fatal() {
        let (engine, _breakers, cache) = engine();
        let invoker = FlakyInvoker::failing(10, InvokeError::AuthorizationRefused);
        let response = engine
            .run(
                &request(),
                primary(),
                fleet(),
                &invoker,
                &cache,
                &CancellationToken::new(),
            )
            .await;
        assert!(!response.success);
        assert_eq!(response.error_kind, Some(ErrorKind::AuthorizationRefused));
    }

    #[tokio::test]
    async fn failures_count_against_the_breaker() {
        let (engine, breakers, cache) = engine();
        let invoker = FlakyInvoker::failing(10, InvokeError::ServiceUnavailable);
        let _ = engine
            .run(
                &request(),
                primary(),
                vec![primary()],
                &invoker,
                &cache,
                &CancellationToken::new(),
            )
            .await;
        let snapshot = breakers.snapshot();
        let gemini = snapshot
            .iter()
            .find(|s| s.provider == Provider::Gemini)
            .unwrap();
        assert!(gemini.consecutive_failures >= 3);
    }

    #[tokio::test]
    async fn cached_response_mode_prefers_the_cache() {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let breakers = Arc::new(CircuitBreakerRegistry::new(5, 300_000, clock.clone()));
        let engine = FallbackEngine::new(
            FallbackConfig {
                retry_base_delay_ms: 1,
                degradation_mode: DegradationMode::CachedResponse,
                ..Default::default()
            },
            breakers,
        );
        let cache = SemanticCache::new(CacheConfig::default(), clock);
        let req = request();
        cache.insert(
            &req,
            &Response::ok(Provider::Gemini, "gemini-flash", "cached hello", &req.id),
        );

        let invoker = FlakyInvoker::failing(10, InvokeError::Timeout);
        let response = engine
            .run(
                &req,
                primary(),
                vec![primary()],
                &invoker,
                &cache,
                &CancellationToken::new(),
            )
            .await;
        assert!(response.cached);
        assert_eq!(response.text, "cached hello");
    }

    #[tokio::test]
    async fn timeout_prefers_fastest_alternate() {
        let (engine, _breakers, _cache) = engine();
        let current = primary();
        let chosen = engine
            .select_fallback(ErrorKind::ProviderTimeout, &current, &fleet())
            .unwrap();
        // Fastest non-Gemini model in the default fleet.
        assert_eq!(chosen.model_id, "llama3-8b");
    }

    #[tokio::test]
    async fn quota_prefers_cheapest_alternate() {
        let (engine, _breakers, _cache) = engine();
        let current = primary();
        let chosen = engine
            .select_fallback(ErrorKind::ProviderQuotaExceeded, &current, &fleet())
            .unwrap();
        assert_eq!(chosen.model_id, "llama3-8b");
    }

    #[tokio::test]
    async fn other_errors_prefer_most_capable_alternate() {
        let (engine, _breakers, _cache) = engine();
        let current = fleet()
            .into_iter()
            .find(|c| c.model_id == "llama3-8b")
            .unwrap();
        let chosen = engine
            .select_fallback(ErrorKind::ProviderServiceUnavailable, &current, &fleet())
            .unwrap();
        assert_eq!(chosen.model_id, "gemini-pro");
    }

    #[tokio::test]
    async fn cancellation_short_circuits_to_degradation() {
        let (engine, _breakers, cache) = engine();
        let invoker = FlakyInvoker::failing(0, InvokeError::Timeout);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let response = engine
            .run(&request(), primary(), fleet(), &invoker, &cache, &cancel)
            .await;
        assert_eq!(response.provider, Provider::Fallback);
    }
}
