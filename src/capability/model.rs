//! Model capability descriptors.

use crate::types::Provider;
use serde::{Deserialize, Serialize};

/// Static capabilities of one provider model.
///
/// Immutable at startup; updatable through the admin operation. Invariant:
/// `context_tokens > 0` and costs are non-negative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelCapability {
    /// Provider that serves this model.
    pub provider: Provider,

    /// Unique model identifier within the provider (e.g. "titan-text-express").
    pub model_id: String,

    /// Maximum context window size in tokens.
    pub context_tokens: u32,

    /// Supports function/tool calling.
    pub supports_tools: bool,

    /// Supports JSON mode.
    pub supports_json: bool,

    /// Supports vision/image inputs.
    pub supports_vision: bool,

    /// Typical end-to-end latency under nominal load.
    pub default_latency_ms: u64,

    /// Cost per 1k input tokens in euro.
    pub cost_per_1k_input: f64,

    /// Cost per 1k output tokens in euro.
    pub cost_per_1k_output: f64,
}

impl Default for ModelCapability {
    fn default() -> Self {
        Self {
            provider: Provider::Bedrock,
            model_id: String::new(),
            context_tokens: 0,
            supports_tools: false,
            supports_json: false,
            supports_vision: false,
            default_latency_ms: 1_000,
            cost_per_1k_input: 0.0,
            cost_per_1k_output: 0.0,
        }
    }
}

impl ModelCapability {
    /// Blended per-1k cost used for tertile filtering and scoring.
    ///
    /// Weighted three-to-one toward input tokens, which dominate volume for
    /// orchestrated traffic.
    pub fn blended_cost_per_1k(&self) -> f64 {
        (3.0 * self.cost_per_1k_input + self.cost_per_1k_output) / 4.0
    }

    /// Estimated cost of a call given token counts.
    pub fn estimate_cost(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        (f64::from(input_tokens) / 1_000.0) * self.cost_per_1k_input
            + (f64::from(output_tokens) / 1_000.0) * self.cost_per_1k_output
    }

    /// Whether the static invariants hold.
    pub fn is_valid(&self) -> bool {
        self.context_tokens > 0
            && self.cost_per_1k_input >= 0.0
            && self.cost_per_1k_output >= 0.0
            && !self.model_id.is_empty()
    }
}

/// Partial update applied to a capability by the admin operation.
/// `None` fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CapabilityUpdate {
    pub context_tokens: Option<u32>,
    pub supports_tools: Option<bool>,
    pub supports_json: Option<bool>,
    pub supports_vision: Option<bool>,
    pub default_latency_ms: Option<u64>,
    pub cost_per_1k_input: Option<f64>,
    pub cost_per_1k_output: Option<f64>,
}

impl CapabilityUpdate {
    /// Apply this partial update over an existing capability.
    pub fn apply_to(&self, capability: &mut ModelCapability) {
        if let Some(v) = self.context_tokens {
            capability.context_tokens = v;
        }
        if let Some(v) = self.supports_tools {
            capability.supports_tools = v;
        }
        if let Some(v) = self.supports_json {
            capability.supports_json = v;
        }
        if let Some(v) = self.supports_vision {
            capability.supports_vision = v;
        }
        if let Some(v) = self.default_latency_ms {
            capability.default_latency_ms = v;
        }
        if let Some(v) = self.cost_per_1k_input {
            capability.cost_per_1k_input = v;
        }
        if let Some(v) = self.cost_per_1k_output {
            capability.cost_per_1k_output = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn titan() -> ModelCapability {
        ModelCapability {
            provider: Provider::Bedrock,
            model_id: "titan-text-express".to_string(),
            context_tokens: 8_000,
            default_latency_ms: 900,
            cost_per_1k_input: 0.0002,
            cost_per_1k_output: 0.0006,
            ..Default::default()
        }
    }

    #[test]
    fn blended_cost_weights_input() {
        let cap = titan();
        let blended = cap.blended_cost_per_1k();
        assert!(blended > cap.cost_per_1k_input);
        assert!(blended < cap.cost_per_1k_output);
    }

    #[test]
    fn estimate_cost_scales_linearly() {
        let cap = titan();
        let one = cap.estimate_cost(1_000, 1_000);
        let two = cap.estimate_cost(2_000, 2_000);
        assert!((two - 2.0 * one).abs() < 1e-12);
    }

    #[test]
    fn partial_update_leaves_other_fields() {
        let mut cap = titan();
        let update = CapabilityUpdate {
            context_tokens: Some(16_000),
            ..Default::default()
        };
        update.apply_to(&mut cap);
        assert_eq!(cap.context_tokens, 16_000);
        assert_eq!(cap.default_latency_ms, 900);
    }

    #[test]
    fn default_capability_is_invalid() {
        assert!(!ModelCapability::default().is_valid());
        assert!(titan().is_valid());
    }
}
