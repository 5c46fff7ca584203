//! Configuration module for the orchestrator
//!
//! Provides layered configuration loading from files, environment variables,
//! and defaults. Unknown feature-flag keys are preserved for forward
//! compatibility.

pub mod audit;
pub mod cache;
pub mod error;
pub mod fallback;
pub mod logging;
pub mod monitor;
pub mod quality;
pub mod rollback;
pub mod routing;
pub mod safety;

pub use audit::{AuditConfig, ComplianceMode};
pub use cache::{CacheConfig, OptimizerConfig, WarmupStrategy};
pub use error::ConfigError;
pub use fallback::{DegradationMode, FallbackConfig};
pub use logging::{LogFormat, LoggingConfig};
pub use monitor::MonitorConfig;
pub use quality::QualityConfig;
pub use rollback::{EmergencyThresholds, GradualRollbackConfig, RollbackConfig, RollbackStep};
pub use routing::{RoutingConfig, ScoringWeights};
pub use safety::{ComplianceConfig, ProviderAgreement, SafetyConfig, SsrfConfig};

use crate::capability::ModelCapability;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Main configuration struct that holds all sub-configurations.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub cache: CacheConfig,
    pub optimizer: OptimizerConfig,
    pub fallback: FallbackConfig,
    pub rollback: RollbackConfig,
    pub audit: AuditConfig,
    pub monitor: MonitorConfig,
    pub quality: QualityConfig,
    pub routing: RoutingConfig,
    pub safety: SafetyConfig,
    pub ssrf: SsrfConfig,
    pub compliance: ComplianceConfig,
    pub logging: LoggingConfig,

    /// Capability matrix seed. Can be updated at runtime through the admin
    /// operation.
    pub models: Vec<ModelCapability>,

    /// Flat feature-flag map; unrecognized keys are kept verbatim.
    pub feature_flags: HashMap<String, serde_json::Value>,

    /// Bound on waiting for in-flight requests during shutdown.
    pub shutdown_grace_ms: u64,
}

impl OrchestratorConfig {
    /// Load configuration from a TOML file.
    ///
    /// If path is None, returns default configuration.
    /// If path doesn't exist, returns NotFound error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => {
                if !p.exists() {
                    return Err(ConfigError::NotFound(p.to_path_buf()));
                }
                let content = std::fs::read_to_string(p)?;
                toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
            }
            None => Ok(Self::default()),
        }
    }

    /// Apply environment variable overrides.
    ///
    /// Supports CONDUCTOR_* environment variables for common settings.
    /// Invalid values are silently ignored (defaults are kept).
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(level) = std::env::var("CONDUCTOR_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("CONDUCTOR_LOG_FORMAT") {
            if let Ok(f) = format.parse() {
                self.logging.format = f;
            }
        }
        if let Ok(cache) = std::env::var("CONDUCTOR_CACHE") {
            self.cache.enabled = cache.to_lowercase() == "true";
        }
        if let Ok(rollback) = std::env::var("CONDUCTOR_ROLLBACK") {
            self.rollback.enabled = rollback.to_lowercase() == "true";
        }
        if let Ok(retries) = std::env::var("CONDUCTOR_MAX_RETRIES") {
            if let Ok(n) = retries.parse() {
                self.fallback.max_retries = n;
            }
        }
        self
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fallback.max_retries == 0 {
            return Err(ConfigError::Validation {
                field: "fallback.max_retries".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.fallback.circuit_breaker_threshold == 0 {
            return Err(ConfigError::Validation {
                field: "fallback.circuit_breaker_threshold".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.cache.hit_rate_target) {
            return Err(ConfigError::Validation {
                field: "cache.hit_rate_target".to_string(),
                message: "must be within [0, 1]".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.optimizer.refresh_threshold) {
            return Err(ConfigError::Validation {
                field: "optimizer.refresh_threshold".to_string(),
                message: "must be within [0, 1]".to_string(),
            });
        }
        if self.monitor.window_size == 0 {
            return Err(ConfigError::Validation {
                field: "monitor.window_size".to_string(),
                message: "must be non-zero".to_string(),
            });
        }
        if self.rollback.gradual.steps.is_empty() {
            return Err(ConfigError::Validation {
                field: "rollback.gradual.steps".to_string(),
                message: "at least one step is required".to_string(),
            });
        }

        // Capability invariants: positive token limits, non-negative costs.
        for (i, model) in self.models.iter().enumerate() {
            if model.context_tokens == 0 {
                return Err(ConfigError::Validation {
                    field: format!("models[{}].context_tokens", i),
                    message: "must be strictly positive".to_string(),
                });
            }
            if model.cost_per_1k_input < 0.0 || model.cost_per_1k_output < 0.0 {
                return Err(ConfigError::Validation {
                    field: format!("models[{}]", i),
                    message: "costs must be non-negative".to_string(),
                });
            }
        }

        Ok(())
    }
}

impl OrchestratorConfig {
    /// Default shutdown grace period when the field is absent from config.
    pub fn effective_shutdown_grace_ms(&self) -> u64 {
        if self.shutdown_grace_ms == 0 {
            10_000
        } else {
            self.shutdown_grace_ms
        }
    }
}
