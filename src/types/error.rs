//! The closed set of error kinds visible in responses and audit events.

use serde::{Deserialize, Serialize};

/// Error classification carried by failed responses.
///
/// Fallback decisions are functions of this kind, never of the concrete
/// error value that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Every model was filtered out before invocation.
    NoFeasibleModel,
    /// Every provider has an open circuit breaker.
    AllProvidersUnavailable,
    /// The prompt failed the pre-invocation safety policy.
    SafetyRejectedInput,
    /// The response failed the post-invocation safety policy.
    SafetyRejectedOutput,
    /// An outbound URL was rejected by the SSRF validator.
    SsrfBlocked,
    /// The chosen route violates a data-processing agreement.
    ComplianceViolation,
    /// The provider did not answer within its deadline.
    ProviderTimeout,
    /// The provider rejected the call for quota or spend reasons.
    ProviderQuotaExceeded,
    /// The provider returned a transient service error.
    ProviderServiceUnavailable,
    /// The provider refused the credentials. Never retried.
    AuthorizationRefused,
    /// The response was rejected by the quality gate after invocation.
    QualityThreshold,
    /// The cache backend failed. Non-fatal; requests continue.
    CacheUnavailable,
    /// The audit sink failed. Non-fatal; requests continue.
    AuditSinkUnavailable,
    /// An internal invariant was violated. Fatal.
    InternalInvariantViolation,
}

impl ErrorKind {
    /// Stable snake_case form for audit events and metrics labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NoFeasibleModel => "no_feasible_model",
            ErrorKind::AllProvidersUnavailable => "all_providers_unavailable",
            ErrorKind::SafetyRejectedInput => "safety_rejected_input",
            ErrorKind::SafetyRejectedOutput => "safety_rejected_output",
            ErrorKind::SsrfBlocked => "ssrf_blocked",
            ErrorKind::ComplianceViolation => "compliance_violation",
            ErrorKind::ProviderTimeout => "provider_timeout",
            ErrorKind::ProviderQuotaExceeded => "provider_quota_exceeded",
            ErrorKind::ProviderServiceUnavailable => "provider_service_unavailable",
            ErrorKind::AuthorizationRefused => "authorization_refused",
            ErrorKind::QualityThreshold => "quality_threshold",
            ErrorKind::CacheUnavailable => "cache_unavailable",
            ErrorKind::AuditSinkUnavailable => "audit_sink_unavailable",
            ErrorKind::InternalInvariantViolation => "internal_invariant_violation",
        }
    }

    /// Whether the fallback engine may retry after this error.
    ///
    /// Safety, SSRF, compliance, and routing failures surface to the caller
    /// directly; authorization refusals are terminal; quality rejections
    /// degrade without retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::ProviderTimeout
                | ErrorKind::ProviderQuotaExceeded
                | ErrorKind::ProviderServiceUnavailable
        )
    }

    /// Whether this kind reflects provider health and should count against
    /// the provider's circuit breaker.
    pub fn counts_against_breaker(&self) -> bool {
        matches!(
            self,
            ErrorKind::ProviderTimeout
                | ErrorKind::ProviderQuotaExceeded
                | ErrorKind::ProviderServiceUnavailable
                | ErrorKind::AuthorizationRefused
        )
    }

    /// Non-fatal infrastructure errors are logged and the request continues.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            ErrorKind::CacheUnavailable | ErrorKind::AuditSinkUnavailable
        )
    }

    /// Safe caller-facing message. Contains no prompt content.
    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorKind::NoFeasibleModel => "No model satisfies the request requirements",
            ErrorKind::AllProvidersUnavailable => "All providers are temporarily unavailable",
            ErrorKind::SafetyRejectedInput => "The request was rejected by the safety policy",
            ErrorKind::SafetyRejectedOutput => "The response was rejected by the safety policy",
            ErrorKind::SsrfBlocked => "An outbound destination was blocked",
            ErrorKind::ComplianceViolation => "The request cannot be processed compliantly",
            ErrorKind::ProviderTimeout => "The provider did not respond in time",
            ErrorKind::ProviderQuotaExceeded => "Provider quota exhausted",
            ErrorKind::ProviderServiceUnavailable => "The provider is temporarily unavailable",
            ErrorKind::AuthorizationRefused => "The provider refused authorization",
            ErrorKind::QualityThreshold => "The response did not meet the quality bar",
            ErrorKind::CacheUnavailable => "Cache temporarily unavailable",
            ErrorKind::AuditSinkUnavailable => "Audit sink temporarily unavailable",
            ErrorKind::InternalInvariantViolation => "Internal error",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
