//! Error types for routing failures

use crate::types::ErrorKind;
use thiserror::Error;

/// Errors that can occur during route selection.
///
/// Both variants are fatal for the request: they surface to the caller so
/// the fallback engine cannot mask a fleet-wide outage.
#[derive(Debug, Error)]
pub enum RoutingError {
    /// Every model was filtered out by feasibility or budget constraints
    #[error("No feasible model: {reason}")]
    NoFeasibleModel { reason: String },

    /// Every provider's circuit breaker is open
    #[error("All provider circuit breakers are open")]
    AllProvidersCircuitOpen,
}

impl RoutingError {
    /// The response-level error kind this routing failure maps to.
    pub fn error_kind(&self) -> ErrorKind {
        match self {
            RoutingError::NoFeasibleModel { .. } => ErrorKind::NoFeasibleModel,
            RoutingError::AllProvidersCircuitOpen => ErrorKind::AllProvidersUnavailable,
        }
    }
}
