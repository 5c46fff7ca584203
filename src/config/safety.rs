//! Safety, SSRF, and compliance validator configuration.

use crate::types::Provider;
use serde::{Deserialize, Serialize};

/// Configuration for the prompt/response safety policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    /// Master switch. Disabling skips both pre- and post-invocation checks.
    pub enabled: bool,

    /// Extra deny-listed terms on top of the built-in policy tables.
    pub blocked_terms: Vec<String>,

    /// Prompts longer than this are rejected outright.
    pub max_prompt_chars: usize,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            blocked_terms: Vec::new(),
            max_prompt_chars: 100_000,
        }
    }
}

/// Configuration for the outbound-URL validator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SsrfConfig {
    /// Domain allow-list; subdomains of an entry are allowed too.
    pub allowed_domains: Vec<String>,
}

impl Default for SsrfConfig {
    fn default() -> Self {
        Self {
            allowed_domains: vec![
                "amazonaws.com".to_string(),
                "googleapis.com".to_string(),
                "meta.ai".to_string(),
            ],
        }
    }
}

/// Per-provider data-processing agreement, consulted before routing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderAgreement {
    pub provider: Provider,

    /// Highest data classification the agreement covers:
    /// "public" < "internal" < "confidential" < "restricted".
    pub max_classification: String,

    /// Whether the provider can pin processing to an EU region.
    pub eu_region_available: bool,
}

/// Configuration for the compliance validator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComplianceConfig {
    /// When true, flows carrying personal data must stay in an EU region.
    pub enforce_eu_residency: bool,

    /// Agreements per provider. Providers without an entry fall back to a
    /// public-only agreement.
    pub agreements: Vec<ProviderAgreement>,
}

impl Default for ComplianceConfig {
    fn default() -> Self {
        Self {
            enforce_eu_residency: true,
            agreements: vec![
                ProviderAgreement {
                    provider: Provider::Bedrock,
                    max_classification: "restricted".to_string(),
                    eu_region_available: true,
                },
                ProviderAgreement {
                    provider: Provider::Gemini,
                    max_classification: "confidential".to_string(),
                    eu_region_available: true,
                },
                ProviderAgreement {
                    provider: Provider::Llama,
                    max_classification: "internal".to_string(),
                    eu_region_available: false,
                },
            ],
        }
    }
}
