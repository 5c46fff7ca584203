//! Semantic response cache
//!
//! SHA-256-keyed response cache with per-entry TTL, lazy expiry, gzip
//! compression for large bodies, and LRU eviction at capacity. Lookups are
//! concurrent; the optimizer is the only background writer.

pub mod compression;
pub mod key;
pub mod optimizer;

pub use key::{cache_key, normalize_prompt};
pub use optimizer::{CycleReport, HitRateOptimizer, QueryPattern, SyntheticWarmup, WarmupSource};

use crate::clock::SharedClock;
use crate::config::CacheConfig;
use crate::types::{Domain, Request, Response};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// One stored response.
#[derive(Debug, Clone)]
struct CacheEntry {
    /// Serialized response, possibly gzip-compressed.
    body: Vec<u8>,
    compressed: bool,
    inserted_ms: u64,
    ttl_seconds: u64,
    access_count: u64,
    last_access_ms: u64,
    /// Request domain, kept for degradation lookups.
    domain: Domain,
    /// Normalized prompt, kept for prefix matching during degradation.
    prompt_norm: String,
}

impl CacheEntry {
    fn expired(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.inserted_ms) > self.ttl_seconds * 1_000
    }
}

/// Aggregate cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> Option<f64> {
        let total = self.hits + self.misses;
        if total == 0 {
            None
        } else {
            Some(self.hits as f64 / total as f64)
        }
    }
}

/// Concurrent response cache.
pub struct SemanticCache {
    config: CacheConfig,
    clock: SharedClock,
    entries: DashMap<String, CacheEntry>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl SemanticCache {
    pub fn new(config: CacheConfig, clock: SharedClock) -> Self {
        Self {
            config,
            clock,
            entries: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up a response for this request.
    ///
    /// Expired entries are deleted lazily here. A hit increments the entry's
    /// access count but does not extend its TTL: expiry is absolute.
    pub fn lookup(&self, request: &Request) -> Option<Response> {
        if !self.config.enabled {
            return None;
        }
        let key = cache_key(request, self.config.max_key_length);
        self.lookup_key(&key, &request.id)
    }

    fn lookup_key(&self, key: &str, request_id: &str) -> Option<Response> {
        let now_ms = self.clock.now_ms();

        let body = {
            let mut entry = match self.entries.get_mut(key) {
                Some(entry) => entry,
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
            };
            if entry.expired(now_ms) {
                drop(entry);
                self.entries.remove(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            entry.access_count += 1;
            entry.last_access_ms = now_ms;
            if entry.compressed {
                match compression::decompress(&entry.body) {
                    Some(bytes) => bytes,
                    None => {
                        drop(entry);
                        self.entries.remove(key);
                        self.misses.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(key, "corrupt cache entry evicted");
                        return None;
                    }
                }
            } else {
                entry.body.clone()
            }
        };

        let mut response: Response = match serde_json::from_slice(&body) {
            Ok(response) => response,
            Err(error) => {
                self.entries.remove(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(key, error = %error, "undecodable cache entry evicted");
                return None;
            }
        };

        response.cached = true;
        response.request_id = request_id.to_string();
        // The stored latency described the original invocation; a cache
        // serve is effectively free.
        response.latency_ms = 0;
        self.hits.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("conductor_cache_hits_total").increment(1);
        Some(response)
    }

    /// Store a response. Error responses are never cached.
    ///
    /// Returns false when the entry was skipped.
    pub fn insert(&self, request: &Request, response: &Response) -> bool {
        if !self.config.enabled || !response.success {
            return false;
        }
        let key = cache_key(request, self.config.max_key_length);
        self.insert_key(
            key,
            request.context.domain,
            normalize_prompt(&request.prompt),
            response,
        )
    }

    fn insert_key(
        &self,
        key: String,
        domain: Domain,
        prompt_norm: String,
        response: &Response,
    ) -> bool {
        let body = match serde_json::to_vec(response) {
            Ok(body) => body,
            Err(error) => {
                tracing::warn!(error = %error, "response not cacheable");
                return false;
            }
        };

        let ttl_seconds = self.ttl_for(domain, response.cost_euro);
        let compressed = body.len() > self.config.compression_threshold;
        let stored = if compressed {
            compression::compress(&body)
        } else {
            body
        };

        let now_ms = self.clock.now_ms();
        if self.entries.len() >= self.config.max_cache_size
            && !self.entries.contains_key(&key)
        {
            self.evict_one(now_ms);
        }

        self.entries.insert(
            key,
            CacheEntry {
                body: stored,
                compressed,
                inserted_ms: now_ms,
                ttl_seconds,
                access_count: 0,
                last_access_ms: now_ms,
                domain,
                prompt_norm,
            },
        );
        metrics::gauge!("conductor_cache_entries").set(self.entries.len() as f64);
        true
    }

    /// TTL policy: doubled for expensive responses, halved for the fast-
    /// moving support domain, stretched for evergreen general queries.
    fn ttl_for(&self, domain: Domain, cost_euro: f64) -> u64 {
        let base = self.config.ttl_seconds as f64;
        let cost_factor = if cost_euro > 0.01 { 2.0 } else { 1.0 };
        let domain_factor = match domain {
            Domain::Support => 0.5,
            Domain::General => 1.5,
            _ => 1.0,
        };
        (base * cost_factor * domain_factor) as u64
    }

    /// Drop one entry: any expired entry first, otherwise the least
    /// recently accessed.
    fn evict_one(&self, now_ms: u64) {
        let mut victim: Option<(String, u64)> = None;
        for entry in self.entries.iter() {
            if entry.expired(now_ms) {
                victim = Some((entry.key().clone(), 0));
                break;
            }
            match &victim {
                Some((_, access)) if *access <= entry.last_access_ms => {}
                _ => victim = Some((entry.key().clone(), entry.last_access_ms)),
            }
        }
        if let Some((key, _)) = victim {
            self.entries.remove(&key);
        }
    }

    /// Age of an entry and its TTL, for refresh scheduling. None when the
    /// key is absent.
    pub fn entry_age(&self, key: &str) -> Option<(u64, u64)> {
        let entry = self.entries.get(key)?;
        let age_ms = self.clock.now_ms().saturating_sub(entry.inserted_ms);
        Some((age_ms, entry.ttl_seconds * 1_000))
    }

    /// Whether a live (unexpired) entry exists for the key.
    pub fn contains_live(&self, key: &str) -> bool {
        self.entries
            .get(key)
            .is_some_and(|e| !e.expired(self.clock.now_ms()))
    }

    /// Find a cached response for degradation: exact key first, otherwise
    /// any live entry with the same domain and a shared normalized prompt
    /// prefix. Linear scan; only runs when all retries failed.
    pub fn closest_for_degradation(&self, request: &Request) -> Option<Response> {
        if let Some(found) = self.lookup(request) {
            return Some(found);
        }

        let now_ms = self.clock.now_ms();
        let prefix: String = normalize_prompt(&request.prompt)
            .chars()
            .take(24)
            .collect();
        if prefix.is_empty() {
            return None;
        }

        let candidate = self.entries.iter().find_map(|entry| {
            if entry.expired(now_ms)
                || entry.domain != request.context.domain
                || !entry.prompt_norm.starts_with(&prefix)
            {
                return None;
            }
            let body = if entry.compressed {
                compression::decompress(&entry.body)?
            } else {
                entry.body.clone()
            };
            serde_json::from_slice::<Response>(&body).ok()
        })?;

        let mut response = candidate;
        response.cached = true;
        response.request_id = request.id.clone();
        Some(response)
    }

    /// Cache key for this request under the configured cap.
    pub fn key_for(&self, request: &Request) -> String {
        cache_key(request, self.config.max_key_length)
    }

    /// Insert bypassing the error check, used by optimizer warm-ups.
    pub(crate) fn insert_for_warmup(&self, request: &Request, response: &Response) -> bool {
        self.insert(request, response)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop everything. Admin/test affordance.
    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::types::{Provider, RequestContext};
    use std::sync::Arc;

    fn cache_with_clock() -> (SemanticCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let cache = SemanticCache::new(CacheConfig::default(), clock.clone());
        (cache, clock)
    }

    fn request(prompt: &str) -> Request {
        Request::new(prompt, RequestContext::default())
    }

    fn response_for(request: &Request, text: &str) -> Response {
        Response::ok(Provider::Gemini, "gemini-flash", text, &request.id).with_latency(120)
    }

    #[test]
    fn set_then_get_roundtrips() {
        let (cache, _clock) = cache_with_clock();
        let req = request("What is the capital of France?");
        let resp = response_for(&req, "Paris");
        assert!(cache.insert(&req, &resp));

        let again = request("What is the capital of France?");
        let found = cache.lookup(&again).unwrap();
        assert!(found.cached);
        assert_eq!(found.text, "Paris");
        assert_eq!(found.request_id, again.id);
        assert_eq!(found.provider, resp.provider);
    }

    #[test]
    fn error_responses_are_not_cached() {
        let (cache, _clock) = cache_with_clock();
        let req = request("oops");
        let resp = Response::failure(
            Provider::Llama,
            "llama3-8b",
            crate::types::ErrorKind::ProviderTimeout,
            &req.id,
        );
        assert!(!cache.insert(&req, &resp));
        assert!(cache.is_empty());
    }

    #[test]
    fn expired_entries_are_deleted_on_access() {
        let (cache, clock) = cache_with_clock();
        let req = request("hello");
        cache.insert(&req, &response_for(&req, "hi"));

        // Default TTL x general-domain factor 1.5 = 5400s.
        clock.advance(5_401 * 1_000);
        assert!(cache.lookup(&request("hello")).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn ttl_policy_applies_domain_and_cost_factors() {
        let (cache, _clock) = cache_with_clock();
        assert_eq!(cache.ttl_for(Domain::Support, 0.0), 1_800);
        assert_eq!(cache.ttl_for(Domain::General, 0.0), 5_400);
        assert_eq!(cache.ttl_for(Domain::Legal, 0.0), 3_600);
        assert_eq!(cache.ttl_for(Domain::Legal, 0.02), 7_200);
    }

    #[test]
    fn large_bodies_are_compressed_and_roundtrip() {
        let clock = Arc::new(ManualClock::new(0));
        let cache = SemanticCache::new(
            CacheConfig {
                compression_threshold: 64,
                ..Default::default()
            },
            clock,
        );
        let req = request("long answer");
        let long_text = "lorem ipsum ".repeat(100);
        cache.insert(&req, &response_for(&req, &long_text));

        let found = cache.lookup(&request("long answer")).unwrap();
        assert_eq!(found.text, long_text);
    }

    #[test]
    fn eviction_keeps_size_bounded() {
        let clock = Arc::new(ManualClock::new(0));
        let cache = SemanticCache::new(
            CacheConfig {
                max_cache_size: 3,
                ..Default::default()
            },
            clock.clone(),
        );
        for i in 0..5 {
            clock.advance(10);
            let req = request(&format!("prompt {}", i));
            cache.insert(&req, &response_for(&req, "x"));
        }
        assert!(cache.len() <= 3);
    }

    #[test]
    fn hit_and_miss_counters_accumulate() {
        let (cache, _clock) = cache_with_clock();
        let req = request("hello");
        cache.insert(&req, &response_for(&req, "hi"));

        cache.lookup(&request("hello"));
        cache.lookup(&request("unknown"));
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate(), Some(0.5));
    }

    #[test]
    fn disabled_cache_is_inert() {
        let clock = Arc::new(ManualClock::new(0));
        let cache = SemanticCache::new(
            CacheConfig {
                enabled: false,
                ..Default::default()
            },
            clock,
        );
        let req = request("hello");
        assert!(!cache.insert(&req, &response_for(&req, "hi")));
        assert!(cache.lookup(&req).is_none());
    }

    #[test]
    fn degradation_matches_domain_and_prefix() {
        let (cache, _clock) = cache_with_clock();
        let stored = request("what is the capital of france exactly");
        cache.insert(&stored, &response_for(&stored, "Paris"));

        // Same prefix, different suffix: not an exact key match.
        let similar = request("what is the capital of france please tell me");
        let found = cache.closest_for_degradation(&similar).unwrap();
        assert_eq!(found.text, "Paris");
        assert!(found.cached);

        // Different domain never matches.
        let mut other_domain = RequestContext::default();
        other_domain.domain = Domain::Support;
        let foreign = Request::new("what is the capital of france exactly", other_domain);
        assert!(cache.closest_for_degradation(&foreign).is_none());
    }

    #[test]
    fn lookup_does_not_extend_ttl() {
        let (cache, clock) = cache_with_clock();
        let req = request("hello");
        cache.insert(&req, &response_for(&req, "hi"));

        clock.advance(5_000 * 1_000);
        assert!(cache.lookup(&request("hello")).is_some());
        // Accessing near expiry must not push expiry out.
        clock.advance(500 * 1_000);
        assert!(cache.lookup(&request("hello")).is_none());
    }
}
