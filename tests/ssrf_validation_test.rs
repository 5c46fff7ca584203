//! SSRF validation through the orchestrator surface.

mod common;

use common::ScriptedInvoker;
use conductor::audit::{AuditFilter, EventType, MemorySink};
use conductor::clock::ManualClock;
use conductor::config::OrchestratorConfig;
use conductor::safety::BlockedCategory;
use conductor::Orchestrator;
use std::sync::Arc;

fn orchestrator() -> Orchestrator {
    Orchestrator::with_parts(
        OrchestratorConfig::default(),
        Arc::new(ScriptedInvoker::new()),
        Arc::new(ManualClock::new(1_700_000_000_000)),
        Box::new(MemorySink::new()),
    )
}

#[tokio::test]
async fn metadata_endpoint_is_blocked_and_audited_once() {
    let orchestrator = orchestrator();

    let verdict = orchestrator.validate_outbound_url("http://169.254.169.254/latest/meta-data/");
    assert!(!verdict.allowed);
    assert_eq!(verdict.blocked_category, Some(BlockedCategory::Metadata));

    let events = orchestrator.audit_events(&AuditFilter {
        event_type: Some(EventType::SsrfViolation),
        ..Default::default()
    });
    assert_eq!(events.len(), 1);
    assert_eq!(
        events[0].metadata.get("category").and_then(|v| v.as_str()),
        Some("metadata")
    );
}

#[tokio::test]
async fn allowed_provider_endpoints_pass_without_audit_noise() {
    let orchestrator = orchestrator();

    for url in [
        "https://bedrock-runtime.eu-central-1.amazonaws.com/model/invoke",
        "https://generativelanguage.googleapis.com/v1beta/models",
    ] {
        assert!(orchestrator.validate_outbound_url(url).allowed, "{}", url);
    }

    let events = orchestrator.audit_events(&AuditFilter {
        event_type: Some(EventType::SsrfViolation),
        ..Default::default()
    });
    assert!(events.is_empty());
}

#[tokio::test]
async fn encoded_and_rebinding_hosts_are_blocked() {
    let orchestrator = orchestrator();

    let cases = [
        ("https://0x7f000001/", BlockedCategory::PrivateIp),
        ("https://192.168.0.10/", BlockedCategory::PrivateIp),
        ("https://[fe80::1]/", BlockedCategory::Ipv6Private),
        ("https://api.10-0-0-1.nip.io/", BlockedCategory::DnsRebinding),
        ("https://user:pw@googleapis.com/", BlockedCategory::Credentials),
        ("http://googleapis.com/", BlockedCategory::Scheme),
        ("https://unrelated.example.org/", BlockedCategory::DomainNotAllowed),
    ];
    for (url, expected) in cases {
        let verdict = orchestrator.validate_outbound_url(url);
        assert_eq!(verdict.blocked_category, Some(expected), "{}", url);
    }

    let events = orchestrator.audit_events(&AuditFilter {
        event_type: Some(EventType::SsrfViolation),
        ..Default::default()
    });
    assert_eq!(events.len(), cases.len());
}
