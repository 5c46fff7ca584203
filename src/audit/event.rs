//! Audit event model.
//!
//! Events never carry raw prompt or response content. They carry the
//! SHA-256 of the content plus its length, and a pseudonymized user
//! reference when anonymization is on.

use crate::types::{ErrorKind, Provider};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A request entered the orchestrator.
    AiRequestStart,
    /// A request completed (successfully or not).
    AiRequestComplete,
    /// A request failed before or during invocation.
    AiRequestError,
    /// A response was served from the cache.
    CacheHit,
    /// The safety validator found personal data.
    PiiDetection,
    /// The SSRF validator blocked an outbound URL.
    SsrfViolation,
    /// The compliance validator rejected a route.
    ComplianceViolation,
    /// A rollback started, advanced, or finished.
    Rollback,
    /// An admin changed runtime configuration.
    ConfigChange,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::AiRequestStart => "ai_request_start",
            EventType::AiRequestComplete => "ai_request_complete",
            EventType::AiRequestError => "ai_request_error",
            EventType::CacheHit => "cache_hit",
            EventType::PiiDetection => "pii_detection",
            EventType::SsrfViolation => "ssrf_violation",
            EventType::ComplianceViolation => "compliance_violation",
            EventType::Rollback => "rollback",
            EventType::ConfigChange => "config_change",
        }
    }
}

/// What kind of content the hash covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Prompt,
    Response,
    Metadata,
}

/// GDPR-aligned data classification, ordered from least to most sensitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataClassification {
    Public,
    Internal,
    Confidential,
    Restricted,
}

impl DataClassification {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataClassification::Public => "public",
            DataClassification::Internal => "internal",
            DataClassification::Confidential => "confidential",
            DataClassification::Restricted => "restricted",
        }
    }
}

impl std::str::FromStr for DataClassification {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "public" => Ok(DataClassification::Public),
            "internal" => Ok(DataClassification::Internal),
            "confidential" => Ok(DataClassification::Confidential),
            "restricted" => Ok(DataClassification::Restricted),
            other => Err(format!("unknown classification: {}", other)),
        }
    }
}

/// Lawful basis under which the event's processing happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LawfulBasis {
    Consent,
    LegalObligation,
    LegitimateInterests,
}

/// Compliance review state of the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComplianceStatus {
    Pending,
    Compliant,
    Warning,
    Violation,
}

/// One append-only audit record.
///
/// Per-request events form a hash chain: event n's `previous_event_hash`
/// equals event n-1's `event_hash`. Unknown fields survive a
/// deserialize/verify round trip through `extra` and contribute to the
/// recomputed hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<Provider>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,

    /// SHA-256 of the redacted content, base-16.
    pub content_hash: String,
    pub content_length: usize,
    pub content_type: ContentType,

    pub data_classification: DataClassification,
    pub gdpr_lawful_basis: LawfulBasis,
    pub compliance_status: ComplianceStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pii_detected: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pii_types: Option<Vec<String>>,

    /// Stable pseudonym of the caller, never the raw user id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_pseudonym: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_euro: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,

    /// Hash of the previous event for the same request; empty for the first.
    pub previous_event_hash: String,

    /// SHA-256 over the canonical serialization of this event without
    /// `event_hash`.
    pub event_hash: String,

    /// Free-form metadata. Keys are sorted in the canonical form.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,

    /// Fields this version does not recognize; preserved for forward
    /// compatibility and included in the hash.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_ordering() {
        assert!(DataClassification::Public < DataClassification::Internal);
        assert!(DataClassification::Internal < DataClassification::Confidential);
        assert!(DataClassification::Confidential < DataClassification::Restricted);
    }

    #[test]
    fn event_type_snake_case() {
        let json = serde_json::to_string(&EventType::AiRequestStart).unwrap();
        assert_eq!(json, "\"ai_request_start\"");
        assert_eq!(EventType::SsrfViolation.as_str(), "ssrf_violation");
    }

    #[test]
    fn unknown_fields_land_in_extra() {
        let json = r#"{
            "event_id": "e-1",
            "timestamp": "2026-01-01T00:00:00Z",
            "event_type": "ai_request_start",
            "content_hash": "00",
            "content_length": 2,
            "content_type": "prompt",
            "data_classification": "public",
            "gdpr_lawful_basis": "legitimate_interests",
            "compliance_status": "pending",
            "previous_event_hash": "",
            "event_hash": "11",
            "added_in_v9": "still here"
        }"#;
        let event: AuditEvent = serde_json::from_str(json).unwrap();
        assert_eq!(
            event.extra.get("added_in_v9").and_then(|v| v.as_str()),
            Some("still here")
        );
    }
}
