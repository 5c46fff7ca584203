//! Contextual Thompson sampling over providers
//!
//! Per contextual bucket, each provider arm keeps Beta(alpha, beta)
//! posteriors plus running cost and latency means. The sampler never sees
//! request content; it sees the bucket and scalar outcomes. Updates within
//! a bucket are atomic behind the bucket lock; distinct buckets are
//! independent.

use crate::types::{BudgetTier, Domain, Provider};
use dashmap::DashMap;
use rand::Rng;
use rand_distr::{Beta, Distribution};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

/// Contextual bucket key. Interference across domains or budget tiers is
/// prevented by keeping their statistics apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Bucket {
    pub domain: Domain,
    pub budget_tier: BudgetTier,
    pub require_tools: bool,
}

impl Bucket {
    pub fn new(domain: Domain, budget_tier: BudgetTier, require_tools: bool) -> Self {
        Self {
            domain,
            budget_tier,
            require_tools,
        }
    }
}

impl std::fmt::Display for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.domain,
            self.budget_tier,
            if self.require_tools { "tools" } else { "plain" }
        )
    }
}

/// Posterior and running outcome statistics for one arm.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ArmState {
    /// Success count plus the Beta(1,1) prior.
    pub alpha: f64,
    /// Failure count plus the Beta(1,1) prior.
    pub beta: f64,
    pub mean_cost_euro: f64,
    pub mean_latency_ms: f64,
    pub pulls: u64,
}

impl Default for ArmState {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            beta: 1.0,
            mean_cost_euro: 0.0,
            mean_latency_ms: 0.0,
            pulls: 0,
        }
    }
}

impl ArmState {
    /// Posterior mean success rate.
    pub fn posterior_mean(&self) -> f64 {
        self.alpha / (self.alpha + self.beta)
    }

    /// Observed updates folded into this arm.
    pub fn updates(&self) -> u64 {
        (self.alpha + self.beta - 2.0).round() as u64
    }
}

/// The contextual Thompson sampler.
#[derive(Debug, Default)]
pub struct ThompsonSampler {
    buckets: DashMap<Bucket, Mutex<HashMap<Provider, ArmState>>>,
}

impl ThompsonSampler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Draw one sample per arm and return the best-looking provider.
    pub fn choose(&self, bucket: Bucket) -> Provider {
        self.choose_with_rng(bucket, &mut rand::thread_rng())
    }

    /// Sampling with a caller-supplied RNG so tests can be deterministic.
    pub fn choose_with_rng<R: Rng + ?Sized>(&self, bucket: Bucket, rng: &mut R) -> Provider {
        let entry = self
            .buckets
            .entry(bucket)
            .or_insert_with(|| Mutex::new(HashMap::new()));
        let mut arms = match entry.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let mut best = Provider::ALL[0];
        let mut best_sample = f64::MIN;
        for provider in Provider::ALL {
            let arm = arms.entry(provider).or_default();
            let sample = Beta::new(arm.alpha, arm.beta)
                .map(|dist| dist.sample(rng))
                .unwrap_or_else(|_| arm.posterior_mean());
            if sample > best_sample {
                best_sample = sample;
                best = provider;
            }
        }
        best
    }

    /// Fold one outcome into an arm. Alpha or beta moves by exactly one;
    /// cost and latency means use Welford updates.
    pub fn record(
        &self,
        bucket: Bucket,
        provider: Provider,
        success: bool,
        cost_euro: f64,
        latency_ms: u64,
    ) {
        if provider == Provider::Fallback {
            // Degraded answers say nothing about real arms.
            return;
        }
        let entry = self
            .buckets
            .entry(bucket)
            .or_insert_with(|| Mutex::new(HashMap::new()));
        let mut arms = match entry.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let arm = arms.entry(provider).or_default();

        if success {
            arm.alpha += 1.0;
        } else {
            arm.beta += 1.0;
        }
        arm.pulls += 1;
        let n = arm.pulls as f64;
        arm.mean_cost_euro += (cost_euro - arm.mean_cost_euro) / n;
        arm.mean_latency_ms += (latency_ms as f64 - arm.mean_latency_ms) / n;

        metrics::gauge!(
            "conductor_bandit_posterior_mean",
            "provider" => provider.as_str(),
        )
        .set(arm.posterior_mean());
    }

    /// Clear one bucket, or everything when no bucket is given.
    pub fn reset(&self, bucket: Option<Bucket>) {
        match bucket {
            Some(bucket) => {
                self.buckets.remove(&bucket);
            }
            None => self.buckets.clear(),
        }
    }

    /// Snapshot of one bucket's arms.
    pub fn arms(&self, bucket: Bucket) -> HashMap<Provider, ArmState> {
        self.buckets
            .get(&bucket)
            .map(|entry| match entry.lock() {
                Ok(guard) => guard.clone(),
                Err(poisoned) => poisoned.into_inner().clone(),
            })
            .unwrap_or_default()
    }

    /// Number of live buckets.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn bucket() -> Bucket {
        Bucket::new(Domain::General, BudgetTier::Standard, false)
    }

    #[test]
    fn updates_sum_matches_observation_count() {
        let sampler = ThompsonSampler::new();
        for i in 0..10 {
            sampler.record(bucket(), Provider::Bedrock, i % 2 == 0, 0.01, 100);
        }
        for _ in 0..7 {
            sampler.record(bucket(), Provider::Gemini, true, 0.02, 50);
        }

        let arms = sampler.arms(bucket());
        let total: u64 = arms.values().map(ArmState::updates).sum();
        assert_eq!(total, 17);
        assert_eq!(arms[&Provider::Bedrock].updates(), 10);
        assert_eq!(arms[&Provider::Gemini].updates(), 7);
    }

    #[test]
    fn welford_means_track_cost_and_latency() {
        let sampler = ThompsonSampler::new();
        sampler.record(bucket(), Provider::Llama, true, 0.01, 100);
        sampler.record(bucket(), Provider::Llama, true, 0.03, 300);

        let arm = sampler.arms(bucket())[&Provider::Llama];
        assert!((arm.mean_cost_euro - 0.02).abs() < 1e-12);
        assert!((arm.mean_latency_ms - 200.0).abs() < 1e-12);
    }

    #[test]
    fn sampler_converges_to_the_best_arm() {
        let sampler = ThompsonSampler::new();
        let mut rng = StdRng::seed_from_u64(42);
        // True success rates: bedrock 0.8, gemini 0.5, llama 0.2.
        let rate = |p: Provider| match p {
            Provider::Bedrock => 0.8,
            Provider::Gemini => 0.5,
            _ => 0.2,
        };

        for _ in 0..500 {
            let chosen = sampler.choose_with_rng(bucket(), &mut rng);
            let success = rng.gen::<f64>() < rate(chosen);
            sampler.record(bucket(), chosen, success, 0.01, 100);
        }

        let mut picks = HashMap::new();
        for _ in 0..100 {
            let chosen = sampler.choose_with_rng(bucket(), &mut rng);
            *picks.entry(chosen).or_insert(0u32) += 1;
        }
        assert!(
            picks.get(&Provider::Bedrock).copied().unwrap_or(0) > 90,
            "expected convergence to bedrock, got {:?}",
            picks
        );
    }

    #[test]
    fn buckets_are_independent() {
        let sampler = ThompsonSampler::new();
        let legal = Bucket::new(Domain::Legal, BudgetTier::Standard, false);
        for _ in 0..50 {
            sampler.record(bucket(), Provider::Bedrock, true, 0.01, 100);
            sampler.record(legal, Provider::Bedrock, false, 0.01, 100);
        }

        let general_arm = sampler.arms(bucket())[&Provider::Bedrock];
        let legal_arm = sampler.arms(legal)[&Provider::Bedrock];
        assert!(general_arm.posterior_mean() > 0.9);
        assert!(legal_arm.posterior_mean() < 0.1);
    }

    #[test]
    fn reset_clears_one_bucket_or_all() {
        let sampler = ThompsonSampler::new();
        let legal = Bucket::new(Domain::Legal, BudgetTier::Standard, false);
        sampler.record(bucket(), Provider::Bedrock, true, 0.0, 1);
        sampler.record(legal, Provider::Bedrock, true, 0.0, 1);

        sampler.reset(Some(bucket()));
        assert!(sampler.arms(bucket()).is_empty());
        assert!(!sampler.arms(legal).is_empty());

        sampler.reset(None);
        assert_eq!(sampler.bucket_count(), 0);
    }

    #[test]
    fn fallback_outcomes_are_ignored() {
        let sampler = ThompsonSampler::new();
        sampler.record(bucket(), Provider::Fallback, false, 0.0, 1);
        assert!(sampler.arms(bucket()).is_empty());
    }
}
