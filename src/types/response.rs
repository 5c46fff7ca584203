//! Inference response types.

use super::{ErrorKind, Provider};
use serde::{Deserialize, Serialize};

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    /// Arguments as produced by the model, opaque to the orchestrator.
    pub arguments: serde_json::Value,
}

/// The outcome of one completed request.
///
/// Created exactly once per request. Invariants: `latency_ms >= 0` and
/// `cost_euro >= 0` by construction; `success == false` iff `error_kind` is
/// present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Provider that produced the answer (or would have).
    pub provider: Provider,

    /// Model that produced the answer.
    pub model_id: String,

    /// Response text. For failures this is a safe message with no prompt
    /// content.
    pub text: String,

    /// Tool calls requested by the model, empty when none.
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,

    /// End-to-end latency observed by the orchestrator.
    pub latency_ms: u64,

    /// Cost attributed to this request in euro.
    pub cost_euro: f64,

    /// Whether the request completed successfully.
    pub success: bool,

    /// Present exactly when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,

    /// Correlation id of the originating request.
    pub request_id: String,

    /// True when served from the cache rather than a live invocation.
    #[serde(default)]
    pub cached: bool,

    /// Total tokens consumed, when the provider reported them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u32>,
}

impl Response {
    /// Build a successful response.
    pub fn ok(
        provider: Provider,
        model_id: impl AsRef<str>,
        text: impl Into<String>,
        request_id: impl AsRef<str>,
    ) -> Self {
        Self {
            provider,
            model_id: model_id.as_ref().to_string(),
            text: text.into(),
            tool_calls: Vec::new(),
            latency_ms: 0,
            cost_euro: 0.0,
            success: true,
            error_kind: None,
            request_id: request_id.as_ref().to_string(),
            cached: false,
            tokens_used: None,
        }
    }

    /// Build a failed response carrying the error kind's safe message.
    pub fn failure(
        provider: Provider,
        model_id: impl AsRef<str>,
        kind: ErrorKind,
        request_id: impl AsRef<str>,
    ) -> Self {
        Self {
            provider,
            model_id: model_id.as_ref().to_string(),
            text: kind.user_message().to_string(),
            tool_calls: Vec::new(),
            latency_ms: 0,
            cost_euro: 0.0,
            success: false,
            error_kind: Some(kind),
            request_id: request_id.as_ref().to_string(),
            cached: false,
            tokens_used: None,
        }
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    pub fn with_cost(mut self, cost_euro: f64) -> Self {
        self.cost_euro = cost_euro.max(0.0);
        self
    }

    pub fn with_tokens(mut self, tokens: u32) -> Self {
        self.tokens_used = Some(tokens);
        self
    }

    /// Check the success/error_kind invariant.
    pub fn invariant_holds(&self) -> bool {
        self.success == self.error_kind.is_none() && self.cost_euro >= 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_response_upholds_invariant() {
        let resp = Response::ok(Provider::Gemini, "gemini-pro", "hi", "req-1");
        assert!(resp.success);
        assert!(resp.error_kind.is_none());
        assert!(resp.invariant_holds());
    }

    #[test]
    fn failure_carries_kind_and_safe_message() {
        let resp = Response::failure(
            Provider::Bedrock,
            "titan-text",
            ErrorKind::ProviderTimeout,
            "req-2",
        );
        assert!(!resp.success);
        assert_eq!(resp.error_kind, Some(ErrorKind::ProviderTimeout));
        assert_eq!(resp.text, ErrorKind::ProviderTimeout.user_message());
        assert!(resp.invariant_holds());
    }

    #[test]
    fn negative_cost_is_clamped() {
        let resp =
            Response::ok(Provider::Llama, "llama3-70b", "x", "req-3").with_cost(-1.0);
        assert_eq!(resp.cost_euro, 0.0);
    }
}
