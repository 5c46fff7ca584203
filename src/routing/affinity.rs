//! Domain-affinity scoring.
//!
//! A static table derived from the capability matrix: domains lean toward
//! the provider families whose models historically fit them (vision-heavy
//! domains toward vision-capable fleets, compliance-heavy domains toward
//! providers with the strongest agreements).

use crate::capability::ModelCapability;
use crate::config::ScoringWeights;
use crate::types::{Domain, Provider};

/// Static affinity of a domain for a provider family, in [0, 1].
pub fn affinity(domain: Domain, provider: Provider) -> f64 {
    match (domain, provider) {
        (Domain::General, Provider::Gemini) => 0.80,
        (Domain::General, Provider::Llama) => 0.70,
        (Domain::General, Provider::Bedrock) => 0.60,

        // Culinary traffic is image-heavy; the vision-strong family leads.
        (Domain::Culinary, Provider::Gemini) => 0.90,
        (Domain::Culinary, Provider::Llama) => 0.60,
        (Domain::Culinary, Provider::Bedrock) => 0.55,

        // Support wants cheap and fast over deep.
        (Domain::Support, Provider::Llama) => 0.90,
        (Domain::Support, Provider::Gemini) => 0.70,
        (Domain::Support, Provider::Bedrock) => 0.50,

        // Legal and medical lean on the family with the strongest
        // data-processing agreements.
        (Domain::Legal, Provider::Bedrock) => 0.90,
        (Domain::Legal, Provider::Gemini) => 0.60,
        (Domain::Legal, Provider::Llama) => 0.30,

        (Domain::Medical, Provider::Bedrock) => 0.90,
        (Domain::Medical, Provider::Gemini) => 0.70,
        (Domain::Medical, Provider::Llama) => 0.30,

        (_, Provider::Fallback) => 0.0,
    }
}

/// Score one candidate: affinity minus weighted normalized latency and
/// cost penalties. `max_latency_ms` and `max_cost` normalize within the
/// candidate set; callers pass the set maxima.
pub fn score(
    capability: &ModelCapability,
    domain: Domain,
    weights: &ScoringWeights,
    provider_weight: f64,
    max_latency_ms: f64,
    max_cost: f64,
) -> f64 {
    let normalized_latency = if max_latency_ms > 0.0 {
        capability.default_latency_ms as f64 / max_latency_ms
    } else {
        0.0
    };
    let normalized_cost = if max_cost > 0.0 {
        capability.blended_cost_per_1k() / max_cost
    } else {
        0.0
    };
    affinity(domain, capability.provider) * provider_weight
        - weights.latency_weight * normalized_latency
        - weights.cost_weight * normalized_cost
}
