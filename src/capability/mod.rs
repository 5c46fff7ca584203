//! Capability matrix over the provider fleet
//!
//! Maps `(provider, model_id)` to a [`ModelCapability`]. Reads are
//! concurrent; admin writes take the writer lock briefly. The matrix is the
//! first lock in the documented acquisition order and is never held across
//! an invocation.

pub mod model;

pub use model::{CapabilityUpdate, ModelCapability};

use crate::types::Provider;
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;

/// Errors from capability matrix operations.
#[derive(Debug, Error)]
pub enum CapabilityError {
    /// The model is not present in the matrix
    #[error("Model '{model_id}' is not registered for provider '{provider}'")]
    UnknownModel {
        provider: Provider,
        model_id: String,
    },

    /// The update would break a matrix invariant
    #[error("Invalid capability update for '{model_id}': {message}")]
    InvalidUpdate { model_id: String, message: String },
}

/// Concurrent-read capability matrix.
#[derive(Debug, Default)]
pub struct CapabilityMatrix {
    models: RwLock<HashMap<(Provider, String), ModelCapability>>,
}

impl CapabilityMatrix {
    /// Build a matrix from the config seed. Invalid entries are skipped with
    /// a warning; config validation should have caught them earlier.
    pub fn new(seed: Vec<ModelCapability>) -> Self {
        let mut models = HashMap::new();
        for capability in seed {
            if !capability.is_valid() {
                tracing::warn!(
                    provider = %capability.provider,
                    model = %capability.model_id,
                    "skipping invalid capability seed entry"
                );
                continue;
            }
            models.insert(
                (capability.provider, capability.model_id.clone()),
                capability,
            );
        }
        Self {
            models: RwLock::new(models),
        }
    }

    /// Look up one model.
    pub fn get(&self, provider: Provider, model_id: &str) -> Option<ModelCapability> {
        self.models
            .read()
            .ok()?
            .get(&(provider, model_id.to_string()))
            .cloned()
    }

    /// Snapshot of every registered capability, in deterministic order.
    pub fn all(&self) -> Vec<ModelCapability> {
        let mut all: Vec<ModelCapability> = match self.models.read() {
            Ok(guard) => guard.values().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().values().cloned().collect(),
        };
        all.sort_by(|a, b| {
            a.provider
                .as_str()
                .cmp(b.provider.as_str())
                .then_with(|| a.model_id.cmp(&b.model_id))
        });
        all
    }

    /// Models served by one provider.
    pub fn models_for(&self, provider: Provider) -> Vec<ModelCapability> {
        self.all()
            .into_iter()
            .filter(|c| c.provider == provider)
            .collect()
    }

    /// Number of registered models.
    pub fn len(&self) -> usize {
        self.models.read().map(|g| g.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Admin operation: apply a partial update to one model.
    ///
    /// Takes effect immediately for subsequent requests. Fails if the model
    /// is unknown or the update would violate a matrix invariant.
    pub fn update(
        &self,
        provider: Provider,
        model_id: &str,
        update: &CapabilityUpdate,
    ) -> Result<ModelCapability, CapabilityError> {
        let mut guard = match self.models.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let key = (provider, model_id.to_string());
        let capability = guard
            .get_mut(&key)
            .ok_or_else(|| CapabilityError::UnknownModel {
                provider,
                model_id: model_id.to_string(),
            })?;

        let mut updated = capability.clone();
        update.apply_to(&mut updated);
        if !updated.is_valid() {
            return Err(CapabilityError::InvalidUpdate {
                model_id: model_id.to_string(),
                message: "token limit must stay positive and costs non-negative".to_string(),
            });
        }

        *capability = updated.clone();
        tracing::info!(
            provider = %provider,
            model = %model_id,
            "capability updated"
        );
        Ok(updated)
    }

    /// Replace the full matrix from a configuration snapshot.
    pub fn restore(&self, snapshot: Vec<ModelCapability>) {
        let mut guard = match self.models.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.clear();
        for capability in snapshot {
            if capability.is_valid() {
                guard.insert(
                    (capability.provider, capability.model_id.clone()),
                    capability,
                );
            }
        }
    }
}

/// A production-shaped default fleet: one capable and one economical model
/// per provider family.
pub fn default_fleet() -> Vec<ModelCapability> {
    vec![
        ModelCapability {
            provider: Provider::Bedrock,
            model_id: "titan-text-express".to_string(),
            context_tokens: 8_000,
            supports_tools: false,
            supports_json: true,
            supports_vision: false,
            default_latency_ms: 900,
            cost_per_1k_input: 0.0002,
            cost_per_1k_output: 0.0006,
        },
        ModelCapability {
            provider: Provider::Bedrock,
            model_id: "claude-sonnet".to_string(),
            context_tokens: 200_000,
            supports_tools: true,
            supports_json: true,
            supports_vision: true,
            default_latency_ms: 2_200,
            cost_per_1k_input: 0.003,
            cost_per_1k_output: 0.015,
        },
        ModelCapability {
            provider: Provider::Gemini,
            model_id: "gemini-flash".to_string(),
            context_tokens: 1_000_000,
            supports_tools: true,
            supports_json: true,
            supports_vision: true,
            default_latency_ms: 700,
            cost_per_1k_input: 0.00015,
            cost_per_1k_output: 0.0006,
        },
        ModelCapability {
            provider: Provider::Gemini,
            model_id: "gemini-pro".to_string(),
            context_tokens: 2_000_000,
            supports_tools: true,
            supports_json: true,
            supports_vision: true,
            default_latency_ms: 1_800,
            cost_per_1k_input: 0.00125,
            cost_per_1k_output: 0.005,
        },
        ModelCapability {
            provider: Provider::Llama,
            model_id: "llama3-8b".to_string(),
            context_tokens: 8_000,
            supports_tools: false,
            supports_json: false,
            supports_vision: false,
            default_latency_ms: 500,
            cost_per_1k_input: 0.00005,
            cost_per_1k_output: 0.0001,
        },
        ModelCapability {
            provider: Provider::Llama,
            model_id: "llama3-70b".to_string(),
            context_tokens: 128_000,
            supports_tools: true,
            supports_json: true,
            supports_vision: false,
            default_latency_ms: 1_400,
            cost_per_1k_input: 0.0006,
            cost_per_1k_output: 0.0016,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_skips_invalid_entries() {
        let matrix = CapabilityMatrix::new(vec![
            ModelCapability::default(), // invalid: empty id, zero tokens
            default_fleet().remove(0),
        ]);
        assert_eq!(matrix.len(), 1);
    }

    #[test]
    fn update_applies_partial() {
        let matrix = CapabilityMatrix::new(default_fleet());
        let updated = matrix
            .update(
                Provider::Llama,
                "llama3-8b",
                &CapabilityUpdate {
                    supports_tools: Some(true),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(updated.supports_tools);
        assert!(matrix.get(Provider::Llama, "llama3-8b").unwrap().supports_tools);
    }

    #[test]
    fn update_rejects_zero_context() {
        let matrix = CapabilityMatrix::new(default_fleet());
        let err = matrix
            .update(
                Provider::Gemini,
                "gemini-pro",
                &CapabilityUpdate {
                    context_tokens: Some(0),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, CapabilityError::InvalidUpdate { .. }));
        // Original value untouched.
        assert_eq!(
            matrix.get(Provider::Gemini, "gemini-pro").unwrap().context_tokens,
            2_000_000
        );
    }

    #[test]
    fn update_unknown_model_errors() {
        let matrix = CapabilityMatrix::new(default_fleet());
        let err = matrix
            .update(Provider::Bedrock, "nonexistent", &CapabilityUpdate::default())
            .unwrap_err();
        assert!(matches!(err, CapabilityError::UnknownModel { .. }));
    }

    #[test]
    fn all_is_deterministically_ordered() {
        let matrix = CapabilityMatrix::new(default_fleet());
        let first = matrix.all();
        let second = matrix.all();
        assert_eq!(first, second);
        assert_eq!(first.len(), 6);
    }

    #[test]
    fn restore_replaces_matrix() {
        let matrix = CapabilityMatrix::new(default_fleet());
        let mut snapshot = default_fleet();
        snapshot.truncate(2);
        matrix.restore(snapshot);
        assert_eq!(matrix.len(), 2);
    }
}
