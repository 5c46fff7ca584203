//! Capability-aware routing over the provider fleet
//!
//! Produces a [`RouteDecision`] by filtering the capability matrix down to
//! feasible candidates, applying the budget tertile filter, scoring by
//! domain affinity with latency and cost penalties, consulting the bandit,
//! and breaking ties deterministically.

pub mod affinity;
pub mod decision;
pub mod error;

pub use decision::{RouteDecision, RoutePlan};
pub use error::RoutingError;

use crate::bandit::{Bucket, ThompsonSampler};
use crate::capability::{CapabilityMatrix, ModelCapability};
use crate::config::RoutingConfig;
use crate::fallback::CircuitBreakerRegistry;
use crate::flags::FeatureFlags;
use crate::types::{BudgetTier, Request, RequestContext};
use std::sync::Arc;

/// The router.
pub struct Router {
    matrix: Arc<CapabilityMatrix>,
    breakers: Arc<CircuitBreakerRegistry>,
    bandit: Arc<ThompsonSampler>,
    flags: Arc<FeatureFlags>,
    config: RoutingConfig,
}

impl Router {
    pub fn new(
        matrix: Arc<CapabilityMatrix>,
        breakers: Arc<CircuitBreakerRegistry>,
        bandit: Arc<ThompsonSampler>,
        flags: Arc<FeatureFlags>,
        config: RoutingConfig,
    ) -> Self {
        Self {
            matrix,
            breakers,
            bandit,
            flags,
            config,
        }
    }

    /// Select a model for the request.
    ///
    /// Policy, in order: feasibility filter, budget tertile filter,
    /// affinity scoring, bandit override, deterministic tie-break.
    pub fn route(&self, request: &Request) -> Result<RoutePlan, RoutingError> {
        let all = self.matrix.all();
        if all.is_empty() {
            return Err(RoutingError::NoFeasibleModel {
                reason: "capability matrix is empty".to_string(),
            });
        }

        // Step 1: feasibility.
        let estimated_tokens = request.estimated_tokens();
        let mut feasible: Vec<ModelCapability> = all
            .iter()
            .filter(|c| c.context_tokens >= estimated_tokens)
            .filter(|c| !request.context.require_tools || c.supports_tools)
            .cloned()
            .collect();
        if feasible.is_empty() {
            return Err(RoutingError::NoFeasibleModel {
                reason: format!(
                    "no model satisfies tokens>={} require_tools={}",
                    estimated_tokens, request.context.require_tools
                ),
            });
        }

        let before_breakers = feasible.len();
        feasible.retain(|c| !self.breakers.is_open(c.provider));
        if feasible.is_empty() {
            // Distinguish a fleet-wide outage from a capability gap so the
            // caller sees the outage for what it is.
            if before_breakers > 0 && self.breakers.all_open() {
                return Err(RoutingError::AllProvidersCircuitOpen);
            }
            return Err(RoutingError::NoFeasibleModel {
                reason: "all feasible providers have open breakers".to_string(),
            });
        }

        // Step 2: budget tertile filter.
        let feasible = apply_budget_filter(feasible, request.context.budget_tier);

        // Step 3: affinity scoring.
        let max_latency = feasible
            .iter()
            .map(|c| c.default_latency_ms as f64)
            .fold(0.0, f64::max);
        let max_cost = feasible
            .iter()
            .map(ModelCapability::blended_cost_per_1k)
            .fold(0.0, f64::max);
        let mut scored: Vec<(f64, ModelCapability)> = feasible
            .into_iter()
            .map(|c| {
                let provider_weight = self
                    .flags
                    .number(&format!("provider_weight_{}", c.provider), 1.0);
                let score = affinity::score(
                    &c,
                    request.context.domain,
                    &self.config.weights,
                    provider_weight,
                    max_latency,
                    max_cost,
                );
                (score, c)
            })
            .collect();

        // Step 5 (applied early so the order is total): deterministic
        // tie-break under descending score.
        scored.sort_by(|(score_a, a), (score_b, b)| {
            score_b
                .total_cmp(score_a)
                .then_with(|| a.default_latency_ms.cmp(&b.default_latency_ms))
                .then_with(|| a.blended_cost_per_1k().total_cmp(&b.blended_cost_per_1k()))
                .then_with(|| a.model_id.cmp(&b.model_id))
        });

        let top = scored[0].1.clone();
        let top_score = scored[0].0;

        // Step 4: bandit override.
        let bucket = Bucket::new(
            request.context.domain,
            request.context.budget_tier,
            request.context.require_tools,
        );
        let bandit_on = self.flags.enabled("bandit_routing", self.config.bandit_enabled);
        let (chosen, reason) = if bandit_on {
            let suggested = self.bandit.choose(bucket);
            match scored
                .iter()
                .find(|(_, c)| c.provider == suggested)
                .map(|(_, c)| c.clone())
            {
                Some(preferred) if preferred.provider != top.provider => (
                    preferred.clone(),
                    format!(
                        "bandit:{} over affinity:{}:{:.2}",
                        suggested, top.model_id, top_score
                    ),
                ),
                Some(_) => (
                    top.clone(),
                    format!("bandit:{} affinity:{}:{:.2}", suggested, top.model_id, top_score),
                ),
                None => (
                    top.clone(),
                    format!(
                        "bandit:{}:infeasible affinity:{}:{:.2}",
                        suggested, top.model_id, top_score
                    ),
                ),
            }
        } else {
            (top.clone(), format!("affinity:{}:{:.2}", top.model_id, top_score))
        };

        tracing::debug!(
            request_id = %request.id,
            provider = %chosen.provider,
            model = %chosen.model_id,
            reason = %reason,
            "routing decision made"
        );

        // Candidate list for the fallback engine: chosen first, then the
        // rest in score order.
        let mut candidates: Vec<ModelCapability> = Vec::with_capacity(scored.len());
        candidates.push(chosen.clone());
        for (_, capability) in scored {
            if capability.model_id != chosen.model_id || capability.provider != chosen.provider {
                candidates.push(capability);
            }
        }

        let tools = if chosen.supports_tools {
            request.tools.clone()
        } else {
            Vec::new()
        };

        Ok(RoutePlan {
            decision: RouteDecision {
                provider: chosen.provider,
                model_id: chosen.model_id.clone(),
                temperature: self.config.default_temperature,
                tools,
                reason,
            },
            candidates,
            bucket,
        })
    }

    /// Read-only introspection: the models a request with this context
    /// could be routed to right now.
    pub fn available_models(&self, context: &RequestContext) -> Vec<ModelCapability> {
        let feasible: Vec<ModelCapability> = self
            .matrix
            .all()
            .into_iter()
            .filter(|c| !context.require_tools || c.supports_tools)
            .filter(|c| !self.breakers.is_open(c.provider))
            .collect();
        apply_budget_filter(feasible, context.budget_tier)
    }
}

/// Budget tertile filter: low budget drops the most expensive tertile,
/// high budget drops the cheapest.
fn apply_budget_filter(
    mut candidates: Vec<ModelCapability>,
    tier: BudgetTier,
) -> Vec<ModelCapability> {
    if tier == BudgetTier::Standard || candidates.len() < 3 {
        return candidates;
    }
    candidates.sort_by(|a, b| {
        a.blended_cost_per_1k()
            .total_cmp(&b.blended_cost_per_1k())
            .then_with(|| a.model_id.cmp(&b.model_id))
    });
    let tertile = candidates.len() / 3;
    match tier {
        BudgetTier::Low => {
            candidates.truncate(candidates.len() - tertile);
        }
        BudgetTier::High => {
            candidates.drain(0..tertile);
        }
        BudgetTier::Standard => {}
    }
    candidates
}
