//! Checksummed configuration snapshots.

use crate::audit::sha256_hex;
use crate::capability::ModelCapability;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Performance figures captured alongside a snapshot, used to judge
/// whether a rollback restored healthy behavior.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceBaseline {
    pub p95_latency_ms: f64,
    pub error_rate: f64,
    pub cost_per_request: f64,
}

/// A configuration captured while the system was provably healthy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationSnapshot {
    pub timestamp_ms: u64,

    /// Routing weight per provider, lifted from the feature flags.
    pub provider_weights: HashMap<String, f64>,

    /// Full capability matrix at capture time.
    pub model_overrides: Vec<ModelCapability>,

    /// Full feature-flag map at capture time.
    pub feature_flags: HashMap<String, serde_json::Value>,

    /// Window metrics at capture time.
    pub performance_baseline: PerformanceBaseline,

    /// SHA-256 over the canonical serialization without this field.
    pub checksum: String,
}

impl ConfigurationSnapshot {
    /// Stamp the checksum over the current contents.
    pub fn sealed(mut self) -> Self {
        self.checksum = self.compute_checksum();
        self
    }

    fn compute_checksum(&self) -> String {
        let mut value = serde_json::to_value(self).unwrap_or_default();
        if let Some(object) = value.as_object_mut() {
            object.remove("checksum");
        }
        sha256_hex(value.to_string().as_bytes())
    }

    /// Whether the stored checksum still matches the contents.
    pub fn verify(&self) -> bool {
        self.checksum == self.compute_checksum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::default_fleet;

    fn snapshot() -> ConfigurationSnapshot {
        ConfigurationSnapshot {
            timestamp_ms: 42,
            provider_weights: HashMap::from([("bedrock".to_string(), 1.0)]),
            model_overrides: default_fleet(),
            feature_flags: HashMap::new(),
            performance_baseline: PerformanceBaseline {
                p95_latency_ms: 800.0,
                error_rate: 0.01,
                cost_per_request: 0.004,
            },
            checksum: String::new(),
        }
        .sealed()
    }

    #[test]
    fn sealed_snapshot_verifies() {
        assert!(snapshot().verify());
    }

    #[test]
    fn tampering_breaks_the_checksum() {
        let mut snap = snapshot();
        snap.performance_baseline.error_rate = 0.5;
        assert!(!snap.verify());
    }

    #[test]
    fn serde_roundtrip_preserves_checksum() {
        let snap = snapshot();
        let json = serde_json::to_string(&snap).unwrap();
        let restored: ConfigurationSnapshot = serde_json::from_str(&json).unwrap();
        assert!(restored.verify());
        assert_eq!(restored, snap);
    }
}
