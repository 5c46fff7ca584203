//! Inference request types.
//!
//! A [`Request`] is created by the gateway, passed through the orchestrator
//! unchanged, and dropped once the response is returned. Nothing in this
//! crate mutates a request after construction.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Application domain the request belongs to.
///
/// Drives cache TTL policy, provider affinity, and audit data
/// classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    General,
    Culinary,
    Support,
    Legal,
    Medical,
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::General => "general",
            Domain::Culinary => "culinary",
            Domain::Support => "support",
            Domain::Legal => "legal",
            Domain::Medical => "medical",
        }
    }
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Domain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "general" => Ok(Domain::General),
            "culinary" => Ok(Domain::Culinary),
            "support" => Ok(Domain::Support),
            "legal" => Ok(Domain::Legal),
            "medical" => Ok(Domain::Medical),
            other => Err(format!("unknown domain: {}", other)),
        }
    }
}

/// Cost posture requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetTier {
    /// Drop the most expensive tertile of candidates.
    Low,
    /// No cost-based filtering.
    Standard,
    /// Drop the cheapest tertile of candidates.
    High,
}

impl BudgetTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            BudgetTier::Low => "low",
            BudgetTier::Standard => "standard",
            BudgetTier::High => "high",
        }
    }
}

impl std::fmt::Display for BudgetTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-supplied context accompanying the prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestContext {
    /// Application domain.
    pub domain: Domain,

    /// Free-form intent label (e.g. "summarize", "translate").
    pub intent: String,

    /// BCP-47 locale of the caller (e.g. "en", "de-DE").
    pub locale: String,

    /// Cost posture for candidate filtering.
    pub budget_tier: BudgetTier,

    /// Whether the request needs tool/function calling.
    pub require_tools: bool,

    /// Latency SLA in milliseconds; also the request deadline.
    pub sla_ms: u64,

    /// Raw caller identity. Never logged verbatim; the audit trail
    /// pseudonymizes it.
    pub user_id: Option<String>,

    /// Session correlation id.
    pub session_id: Option<String>,

    /// Tenant the caller belongs to.
    pub tenant: Option<String>,

    /// Gateway hint that the prompt may contain personal data.
    pub pii: bool,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self {
            domain: Domain::General,
            intent: String::new(),
            locale: "en".to_string(),
            budget_tier: BudgetTier::Standard,
            require_tools: false,
            sla_ms: 30_000,
            user_id: None,
            session_id: None,
            tenant: None,
            pii: false,
        }
    }
}

/// Descriptor for a tool the caller makes available to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// JSON schema of the tool parameters, opaque to the orchestrator.
    pub parameters: serde_json::Value,
}

/// An immutable inference request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Correlation id, generated at construction.
    pub id: String,

    /// The user prompt. Never persisted; the audit trail stores only its
    /// hash and length.
    pub prompt: String,

    /// Caller context.
    pub context: RequestContext,

    /// Ordered tool descriptors, empty when tools are not offered.
    pub tools: Vec<ToolDescriptor>,
}

impl Request {
    /// Create a request with a fresh correlation id.
    pub fn new(prompt: impl Into<String>, context: RequestContext) -> Self {
        Self {
            id: format!("req-{}", uuid::Uuid::new_v4()),
            prompt: prompt.into(),
            context,
            tools: Vec::new(),
        }
    }

    /// Attach tool descriptors.
    pub fn with_tools(mut self, tools: Vec<ToolDescriptor>) -> Self {
        self.tools = tools;
        self
    }

    /// Rough prompt token estimate for context-window feasibility checks.
    ///
    /// Four characters per token, nudged up by the word count so that short
    /// whitespace-dense prompts are not underestimated. Exact tokenization
    /// belongs to the provider transports.
    pub fn estimated_tokens(&self) -> u32 {
        let chars = self.prompt.chars().count() as u32;
        let words = self.prompt.split_whitespace().count() as u32;
        (chars / 4).max(words).max(1)
    }
}
