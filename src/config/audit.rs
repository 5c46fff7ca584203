//! Audit trail configuration.

use serde::{Deserialize, Serialize};

/// How strictly compliance metadata is enforced at log time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComplianceMode {
    /// Reject events missing compliance metadata.
    Strict,
    /// Fill missing metadata with defaults.
    Standard,
}

/// Configuration for the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Master switch; when false, log_event is a no-op.
    pub enable_audit_trail: bool,

    /// Whether the per-request hash chain is computed and verified.
    pub enable_integrity_checking: bool,

    /// Whether detected PII types are recorded on events.
    pub enable_pii_logging: bool,

    /// Events older than this are dropped by the retention sweep.
    pub retention_days: u32,

    /// Enforcement posture for compliance metadata.
    pub compliance_mode: ComplianceMode,

    /// Whether user ids are replaced with HMAC pseudonyms.
    pub anonymization_enabled: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enable_audit_trail: true,
            enable_integrity_checking: true,
            enable_pii_logging: false,
            retention_days: 90,
            compliance_mode: ComplianceMode::Standard,
            anonymization_enabled: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymization_defaults_on() {
        let config = AuditConfig::default();
        assert!(config.anonymization_enabled);
        assert!(config.enable_integrity_checking);
        assert!(!config.enable_pii_logging);
    }

    #[test]
    fn compliance_mode_parses() {
        let parsed: ComplianceMode = serde_json::from_str("\"strict\"").unwrap();
        assert_eq!(parsed, ComplianceMode::Strict);
    }
}
