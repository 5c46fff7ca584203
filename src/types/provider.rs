//! Provider identity for the external model families.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// The closed set of external model providers the orchestrator routes over.
///
/// Provider transports live outside this crate; the orchestrator only ever
/// names providers through this enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// AWS-hosted model family.
    Bedrock,
    /// Search-vendor model family.
    Gemini,
    /// Social-vendor model family.
    Llama,
    /// Pseudo-provider stamped on degraded responses. Never routed to and
    /// never carries a circuit breaker.
    Fallback,
}

impl Provider {
    /// Real providers, in canonical order. Excludes [`Provider::Fallback`].
    pub const ALL: [Provider; 3] = [Provider::Bedrock, Provider::Gemini, Provider::Llama];

    /// Stable string form used in metrics labels and audit events.
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Bedrock => "bedrock",
            Provider::Gemini => "gemini",
            Provider::Llama => "llama",
            Provider::Fallback => "fallback",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bedrock" => Ok(Provider::Bedrock),
            "gemini" => Ok(Provider::Gemini),
            "llama" => Ok(Provider::Llama),
            "fallback" => Ok(Provider::Fallback),
            other => Err(format!("unknown provider: {}", other)),
        }
    }
}
