//! Cache hit-rate optimizer.
//!
//! Watches the live request stream for frequent query patterns and keeps
//! them warm so the frequent-set hit rate stays at its contractual floor.
//! Runs as a single background task; it never holds a lock across a
//! warm-up invocation.

use super::SemanticCache;
use crate::clock::SharedClock;
use crate::config::OptimizerConfig;
use crate::types::{Domain, Request, RequestContext, Response};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Aggregated statistics for one normalized prompt.
#[derive(Debug, Clone)]
pub struct QueryPattern {
    pub normalized: String,
    pub original_prompt: String,
    pub frequency: u64,
    pub last_seen_ms: u64,
    pub average_latency_ms: f64,
    pub estimated_cost_euro: f64,
    pub domains: HashSet<Domain>,
    pub intents: HashSet<String>,
    /// First observed context; reused to rebuild warm-up requests so the
    /// cache key matches live traffic.
    sample_context: RequestContext,
    outcomes: u64,
}

impl QueryPattern {
    fn new(normalized: String, request: &Request, now_ms: u64) -> Self {
        let mut domains = HashSet::new();
        domains.insert(request.context.domain);
        let mut intents = HashSet::new();
        if !request.context.intent.is_empty() {
            intents.insert(request.context.intent.clone());
        }
        Self {
            normalized,
            original_prompt: request.prompt.clone(),
            frequency: 1,
            last_seen_ms: now_ms,
            average_latency_ms: 0.0,
            estimated_cost_euro: 0.0,
            domains,
            intents,
            sample_context: request.context.clone(),
            outcomes: 0,
        }
    }

    /// Rebuild a request equivalent to the live traffic for this pattern.
    pub fn to_request(&self) -> Request {
        Request::new(self.original_prompt.clone(), self.sample_context.clone())
    }
}

/// Produces responses for warm-up and refresh inserts.
#[async_trait]
pub trait WarmupSource: Send + Sync {
    /// Produce a cacheable response for the given request, or None when the
    /// pattern cannot be warmed right now.
    async fn produce(&self, request: &Request) -> Option<Response>;
}

/// Warm-up source that fabricates a canonical placeholder response.
///
/// The default strategy. The `live` strategy wires the real invocation path
/// in as a [`WarmupSource`] instead.
#[derive(Debug, Default)]
pub struct SyntheticWarmup;

#[async_trait]
impl WarmupSource for SyntheticWarmup {
    async fn produce(&self, request: &Request) -> Option<Response> {
        Some(Response::ok(
            crate::types::Provider::Llama,
            "canonical-warmup",
            format!("Canonical answer for: {}", request.prompt),
            &request.id,
        ))
    }
}

/// What one optimizer cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub frequent: usize,
    pub warmed: usize,
    pub refreshed: usize,
    pub aged_out: usize,
}

/// The optimizer.
pub struct HitRateOptimizer {
    config: OptimizerConfig,
    clock: SharedClock,
    patterns: DashMap<String, QueryPattern>,
    frequent_hits: AtomicU64,
    frequent_lookups: AtomicU64,
}

impl HitRateOptimizer {
    pub fn new(config: OptimizerConfig, clock: SharedClock) -> Self {
        Self {
            config,
            clock,
            patterns: DashMap::new(),
            frequent_hits: AtomicU64::new(0),
            frequent_lookups: AtomicU64::new(0),
        }
    }

    /// Record one observed request.
    pub fn observe(&self, request: &Request) {
        let normalized = super::normalize_prompt(&request.prompt);
        if normalized.is_empty() {
            return;
        }
        let now_ms = self.clock.now_ms();
        self.patterns
            .entry(normalized.clone())
            .and_modify(|pattern| {
                pattern.frequency += 1;
                pattern.last_seen_ms = now_ms;
                pattern.domains.insert(request.context.domain);
                if !request.context.intent.is_empty() {
                    pattern.intents.insert(request.context.intent.clone());
                }
            })
            .or_insert_with(|| QueryPattern::new(normalized, request, now_ms));
    }

    /// Fold a completed invocation's latency and cost into the pattern.
    pub fn record_outcome(&self, request: &Request, latency_ms: u64, cost_euro: f64) {
        let normalized = super::normalize_prompt(&request.prompt);
        if let Some(mut pattern) = self.patterns.get_mut(&normalized) {
            pattern.outcomes += 1;
            let n = pattern.outcomes as f64;
            pattern.average_latency_ms += (latency_ms as f64 - pattern.average_latency_ms) / n;
            pattern.estimated_cost_euro += (cost_euro - pattern.estimated_cost_euro) / n;
        }
    }

    /// Record a cache lookup result so the frequent-set hit rate can be
    /// tracked separately from the global one.
    pub fn record_cache_result(&self, request: &Request, hit: bool) {
        let normalized = super::normalize_prompt(&request.prompt);
        let is_frequent = self
            .patterns
            .get(&normalized)
            .is_some_and(|p| self.is_frequent(&p));
        if !is_frequent {
            return;
        }
        self.frequent_lookups.fetch_add(1, Ordering::Relaxed);
        if hit {
            self.frequent_hits.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(rate) = self.frequent_hit_rate() {
            metrics::gauge!("conductor_frequent_hit_rate").set(rate);
        }
    }

    /// Hit rate over the frequent set, None before any frequent lookup.
    pub fn frequent_hit_rate(&self) -> Option<f64> {
        let lookups = self.frequent_lookups.load(Ordering::Relaxed);
        if lookups == 0 {
            return None;
        }
        Some(self.frequent_hits.load(Ordering::Relaxed) as f64 / lookups as f64)
    }

    /// Whether an on-demand cycle is warranted: the frequent-set rate has
    /// fallen below 0.6 x target with enough samples to mean something.
    pub fn needs_cycle(&self) -> bool {
        if self.frequent_lookups.load(Ordering::Relaxed) < 20 {
            return false;
        }
        self.frequent_hit_rate()
            .is_some_and(|rate| rate < 0.6 * self.config.target_hit_rate)
    }

    fn is_frequent(&self, pattern: &QueryPattern) -> bool {
        let window_start = self
            .clock
            .now_ms()
            .saturating_sub(self.config.analysis_window_ms);
        pattern.frequency >= self.config.frequent_query_threshold
            && pattern.last_seen_ms >= window_start
    }

    /// Number of tracked patterns.
    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }

    /// Snapshot of the current frequent set.
    pub fn frequent_patterns(&self) -> Vec<QueryPattern> {
        self.patterns
            .iter()
            .filter(|p| self.is_frequent(p))
            .map(|p| p.clone())
            .collect()
    }

    /// One optimizer cycle: promote, warm, refresh, age out.
    pub async fn run_cycle(
        &self,
        cache: &SemanticCache,
        warmup: &dyn WarmupSource,
    ) -> CycleReport {
        let mut report = CycleReport::default();

        let mut frequent = self.frequent_patterns();
        report.frequent = frequent.len();
        // Warm the hottest patterns first when the batch cap binds.
        frequent.sort_by(|a, b| b.frequency.cmp(&a.frequency));
        frequent.truncate(self.config.warmup_batch_size);

        for pattern in &frequent {
            let request = pattern.to_request();
            let key = cache.key_for(&request);

            if !cache.contains_live(&key) {
                if let Some(response) = warmup.produce(&request).await {
                    if cache.insert_for_warmup(&request, &response) {
                        report.warmed += 1;
                    }
                }
                continue;
            }

            if let Some((age_ms, ttl_ms)) = cache.entry_age(&key) {
                let refresh_after =
                    (1.0 - self.config.refresh_threshold) * ttl_ms as f64;
                if age_ms as f64 > refresh_after {
                    if let Some(response) = warmup.produce(&request).await {
                        if cache.insert_for_warmup(&request, &response) {
                            report.refreshed += 1;
                        }
                    }
                }
            }
        }

        // Age out stale, infrequent patterns.
        let window_start = self
            .clock
            .now_ms()
            .saturating_sub(self.config.analysis_window_ms);
        let threshold = self.config.frequent_query_threshold;
        let before = self.patterns.len();
        self.patterns
            .retain(|_, p| p.last_seen_ms >= window_start || p.frequency >= threshold);
        report.aged_out = before - self.patterns.len();

        metrics::gauge!("conductor_frequent_queries").set(report.frequent as f64);
        tracing::debug!(
            frequent = report.frequent,
            warmed = report.warmed,
            refreshed = report.refreshed,
            aged_out = report.aged_out,
            "optimizer cycle complete"
        );
        report
    }

    /// Spawn the periodic optimizer loop. Interval changes in config apply
    /// to subsequently scheduled cycles only; the loop reads its cadence
    /// once per tick.
    pub fn spawn_loop(
        self: Arc<Self>,
        cache: Arc<SemanticCache>,
        warmup: Arc<dyn WarmupSource>,
        token: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let interval = std::time::Duration::from_millis(self.config.interval_ms.max(1_000));
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        self.run_cycle(cache.as_ref(), warmup.as_ref()).await;
                    }
                }
            }
            tracing::debug!("optimizer loop stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::CacheConfig;

    fn setup() -> (HitRateOptimizer, SemanticCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let optimizer = HitRateOptimizer::new(
            OptimizerConfig {
                frequent_query_threshold: 3,
                ..Default::default()
            },
            clock.clone(),
        );
        let cache = SemanticCache::new(CacheConfig::default(), clock.clone());
        (optimizer, cache, clock)
    }

    fn request(prompt: &str) -> Request {
        Request::new(prompt, RequestContext::default())
    }

    #[test]
    fn repeated_prompts_become_one_pattern() {
        let (optimizer, _cache, _clock) = setup();
        for _ in 0..4 {
            optimizer.observe(&request("What is the capital of France?"));
        }
        optimizer.observe(&request("what is the CAPITAL of france"));
        assert_eq!(optimizer.pattern_count(), 1);
        assert_eq!(optimizer.frequent_patterns()[0].frequency, 5);
    }

    #[test]
    fn infrequent_patterns_are_not_promoted() {
        let (optimizer, _cache, _clock) = setup();
        optimizer.observe(&request("rare question"));
        assert!(optimizer.frequent_patterns().is_empty());
    }

    #[tokio::test]
    async fn cycle_warms_frequent_patterns() {
        let (optimizer, cache, _clock) = setup();
        for _ in 0..5 {
            optimizer.observe(&request("What is the capital of France?"));
        }

        let report = optimizer.run_cycle(&cache, &SyntheticWarmup).await;
        assert_eq!(report.frequent, 1);
        assert_eq!(report.warmed, 1);

        let found = cache.lookup(&request("What is the capital of France?")).unwrap();
        assert!(found.cached);
    }

    #[tokio::test]
    async fn cycle_refreshes_aging_entries() {
        let (optimizer, cache, clock) = setup();
        for _ in 0..5 {
            optimizer.observe(&request("hello world"));
        }
        optimizer.run_cycle(&cache, &SyntheticWarmup).await;

        // Default TTL x1.5 (general) = 5400s; refresh threshold 0.2 means
        // refresh after 80% of TTL = 4320s.
        clock.advance(4_400 * 1_000);
        optimizer.observe(&request("hello world"));
        let report = optimizer.run_cycle(&cache, &SyntheticWarmup).await;
        assert_eq!(report.refreshed, 1);

        // Freshly refreshed entry survives beyond its original expiry.
        clock.advance(2_000 * 1_000);
        assert!(cache.lookup(&request("hello world")).is_some());
    }

    #[tokio::test]
    async fn cycle_ages_out_stale_patterns() {
        let (optimizer, cache, clock) = setup();
        optimizer.observe(&request("one-off question"));
        clock.advance(25 * 60 * 60 * 1_000);
        let report = optimizer.run_cycle(&cache, &SyntheticWarmup).await;
        assert_eq!(report.aged_out, 1);
        assert_eq!(optimizer.pattern_count(), 0);
    }

    #[test]
    fn frequent_hit_rate_tracks_only_frequent_patterns() {
        let (optimizer, _cache, _clock) = setup();
        let req = request("popular question");
        for _ in 0..5 {
            optimizer.observe(&req);
        }
        optimizer.record_cache_result(&req, true);
        optimizer.record_cache_result(&req, false);
        assert_eq!(optimizer.frequent_hit_rate(), Some(0.5));

        // Non-frequent lookups do not move the needle.
        optimizer.record_cache_result(&request("rare"), false);
        assert_eq!(optimizer.frequent_hit_rate(), Some(0.5));
    }

    #[test]
    fn needs_cycle_requires_samples_and_low_rate() {
        let (optimizer, _cache, _clock) = setup();
        let req = request("popular question");
        for _ in 0..5 {
            optimizer.observe(&req);
        }
        assert!(!optimizer.needs_cycle());

        for _ in 0..25 {
            optimizer.record_cache_result(&req, false);
        }
        assert!(optimizer.needs_cycle());
    }

    #[test]
    fn outcome_means_use_welford_updates() {
        let (optimizer, _cache, _clock) = setup();
        let req = request("metered question");
        optimizer.observe(&req);
        optimizer.record_outcome(&req, 100, 0.01);
        optimizer.record_outcome(&req, 300, 0.03);

        let patterns = optimizer.patterns.get("metered question").unwrap();
        assert!((patterns.average_latency_ms - 200.0).abs() < 1e-9);
        assert!((patterns.estimated_cost_euro - 0.02).abs() < 1e-9);
    }
}
