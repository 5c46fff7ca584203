//! Route decisions.

use crate::bandit::Bucket;
use crate::capability::ModelCapability;
use crate::types::{Provider, ToolDescriptor};

/// The router's verdict for one request. Consumed by the fallback engine;
/// never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteDecision {
    pub provider: Provider,
    pub model_id: String,
    pub temperature: f32,
    /// Tools forwarded to the provider; empty when the model cannot use
    /// them or the caller offered none.
    pub tools: Vec<ToolDescriptor>,
    /// Why this model won, including the bandit suggestion when one was
    /// considered. Examples: "affinity:0.82", "bandit:gemini affinity:0.79".
    pub reason: String,
}

/// Full routing output: the decision plus the score-ordered feasible set
/// the fallback engine may retry against, and the bandit bucket for
/// outcome recording.
#[derive(Debug, Clone)]
pub struct RoutePlan {
    pub decision: RouteDecision,
    /// All feasible candidates in descending score order; the chosen model
    /// is first.
    pub candidates: Vec<ModelCapability>,
    pub bucket: Bucket,
}
