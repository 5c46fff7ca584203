//! Route-level compliance validation.
//!
//! Before invocation, the chosen route is checked against the provider's
//! data-processing agreement: the agreement must cover the request's data
//! classification, and flows that require data residency must stay on
//! providers with an EU region.

use crate::audit::DataClassification;
use crate::config::{ComplianceConfig, ProviderAgreement};
use crate::types::{Domain, Provider};
use std::collections::HashMap;

/// Outcome of the compliance gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComplianceCheck {
    pub compliant: bool,
    /// Populated when non-compliant; safe for the audit trail.
    pub reason: Option<String>,
}

impl ComplianceCheck {
    fn pass() -> Self {
        Self {
            compliant: true,
            reason: None,
        }
    }

    fn fail(reason: impl Into<String>) -> Self {
        Self {
            compliant: false,
            reason: Some(reason.into()),
        }
    }
}

/// Compliance gate consulted by the orchestrator before invocation.
#[derive(Debug)]
pub struct ComplianceValidator {
    enforce_eu_residency: bool,
    agreements: HashMap<Provider, ParsedAgreement>,
}

#[derive(Debug)]
struct ParsedAgreement {
    max_classification: DataClassification,
    eu_region_available: bool,
}

impl ComplianceValidator {
    pub fn new(config: ComplianceConfig) -> Self {
        let mut agreements = HashMap::new();
        for agreement in &config.agreements {
            agreements.insert(agreement.provider, parse_agreement(agreement));
        }
        Self {
            enforce_eu_residency: config.enforce_eu_residency,
            agreements,
        }
    }

    /// Classification of a request, by the same rules the audit trail uses.
    pub fn classify(pii: bool, domain: Domain, tenant: Option<&str>) -> DataClassification {
        if pii {
            DataClassification::Restricted
        } else if matches!(domain, Domain::Legal | Domain::Medical) {
            DataClassification::Confidential
        } else if tenant.is_some() {
            DataClassification::Internal
        } else {
            DataClassification::Public
        }
    }

    /// Check one route against the provider agreement.
    pub fn validate_route(
        &self,
        provider: Provider,
        classification: DataClassification,
    ) -> ComplianceCheck {
        let Some(agreement) = self.agreements.get(&provider) else {
            // No agreement on file: only public data may flow.
            if classification == DataClassification::Public {
                return ComplianceCheck::pass();
            }
            return ComplianceCheck::fail(format!(
                "no data-processing agreement on file for provider {}",
                provider
            ));
        };

        if classification > agreement.max_classification {
            return ComplianceCheck::fail(format!(
                "agreement with {} covers up to {} but request is {}",
                provider,
                agreement.max_classification.as_str(),
                classification.as_str()
            ));
        }

        let residency_required = self.enforce_eu_residency
            && classification >= DataClassification::Confidential;
        if residency_required && !agreement.eu_region_available {
            return ComplianceCheck::fail(format!(
                "provider {} cannot pin processing to an EU region",
                provider
            ));
        }

        ComplianceCheck::pass()
    }
}

fn parse_agreement(agreement: &ProviderAgreement) -> ParsedAgreement {
    let max_classification = agreement
        .max_classification
        .parse()
        .unwrap_or(DataClassification::Public);
    ParsedAgreement {
        max_classification,
        eu_region_available: agreement.eu_region_available,
    }
}
