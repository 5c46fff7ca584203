//! Tamper-evident audit trail
//!
//! Append-only event log with a per-request hash chain. Raw prompts and
//! responses never enter the trail; only their SHA-256 and length do. The
//! trail is the last lock in the documented acquisition order and sink
//! failures never propagate to the caller.

pub mod event;
pub mod hash;
pub mod sink;

pub use event::{
    AuditEvent, ComplianceStatus, ContentType, DataClassification, EventType, LawfulBasis,
};
pub use hash::{sha256_hex, Pseudonymizer};
pub use sink::{AuditError, AuditSink, FileSink, MemorySink, StdoutSink};

use crate::clock::SharedClock;
use crate::config::{AuditConfig, ComplianceMode};
use crate::types::{Domain, ErrorKind, Provider, Request};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Mutex;

/// Upper bound on events retained in memory between retention sweeps.
const MAX_STORED_EVENTS: usize = 100_000;

/// Everything the trail needs to build one event. Raw content enters here
/// and is reduced to hash + length before anything is stored.
#[derive(Debug, Clone)]
pub struct EventDraft {
    pub event_type: EventType,
    pub content: String,
    pub content_type: ContentType,
    pub request_id: Option<String>,
    pub provider: Option<Provider>,
    pub model_id: Option<String>,
    pub domain: Option<Domain>,
    pub tenant: Option<String>,
    pub pii: bool,
    pub user_id: Option<String>,
    pub pii_types: Vec<String>,
    pub latency_ms: Option<u64>,
    pub cost_euro: Option<f64>,
    pub tokens_used: Option<u32>,
    pub error_kind: Option<ErrorKind>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl EventDraft {
    pub fn new(
        event_type: EventType,
        content: impl AsRef<str>,
        content_type: ContentType,
    ) -> Self {
        Self {
            event_type,
            content: content.as_ref().to_string(),
            content_type,
            request_id: None,
            provider: None,
            model_id: None,
            domain: None,
            tenant: None,
            pii: false,
            user_id: None,
            pii_types: Vec::new(),
            latency_ms: None,
            cost_euro: None,
            tokens_used: None,
            error_kind: None,
            metadata: serde_json::Map::new(),
        }
    }

    /// Fill request-scoped fields from the originating request.
    pub fn for_request(mut self, request: &Request) -> Self {
        self.request_id = Some(request.id.clone());
        self.domain = Some(request.context.domain);
        self.tenant = request.context.tenant.clone();
        self.pii = request.context.pii;
        self.user_id = request.context.user_id.clone();
        self
    }

    pub fn route(mut self, provider: Provider, model_id: impl AsRef<str>) -> Self {
        self.provider = Some(provider);
        self.model_id = Some(model_id.as_ref().to_string());
        self
    }

    pub fn outcome(
        mut self,
        latency_ms: u64,
        cost_euro: f64,
        tokens_used: Option<u32>,
        error_kind: Option<ErrorKind>,
    ) -> Self {
        self.latency_ms = Some(latency_ms);
        self.cost_euro = Some(cost_euro);
        self.tokens_used = tokens_used;
        self.error_kind = error_kind;
        self
    }

    pub fn pii_types(mut self, types: Vec<String>) -> Self {
        self.pii = self.pii || !types.is_empty();
        self.pii_types = types;
        self
    }

    pub fn meta(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }
}

/// Result of an integrity verification pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

/// Filter for querying the in-memory trail.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub request_id: Option<String>,
    pub event_type: Option<EventType>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

/// The audit trail.
pub struct AuditTrail {
    config: AuditConfig,
    clock: SharedClock,
    sink: Box<dyn AuditSink>,
    pseudonymizer: Pseudonymizer,
    /// request_id -> hash of that request's latest event.
    chain_heads: DashMap<String, String>,
    store: Mutex<Vec<AuditEvent>>,
}

impl AuditTrail {
    pub fn new(config: AuditConfig, clock: SharedClock, sink: Box<dyn AuditSink>) -> Self {
        Self {
            config,
            clock,
            sink,
            pseudonymizer: Pseudonymizer::new(),
            chain_heads: DashMap::new(),
            store: Mutex::new(Vec::new()),
        }
    }

    /// Append one event.
    ///
    /// Returns `Ok(None)` when the trail is disabled. Sink failures are
    /// logged and counted but never returned; the event is still retained
    /// in memory.
    pub fn log_event(&self, draft: EventDraft) -> Result<Option<AuditEvent>, AuditError> {
        if !self.config.enable_audit_trail {
            return Ok(None);
        }

        if self.config.compliance_mode == ComplianceMode::Strict
            && matches!(
                draft.event_type,
                EventType::AiRequestStart
                    | EventType::AiRequestComplete
                    | EventType::AiRequestError
            )
            && draft.request_id.is_none()
        {
            return Err(AuditError::StrictMode(
                "request-scoped event without request_id".to_string(),
            ));
        }

        let event = self.build_event(draft);

        let line = serde_json::to_value(&event)
            .map_err(|e| AuditError::Serialize(e.to_string()))?
            .to_string();

        if let Err(error) = self.sink.emit(&line) {
            metrics::counter!("conductor_audit_sink_failures_total").increment(1);
            tracing::warn!(error = %error, "audit sink write failed, event retained in memory");
        }

        if self.config.enable_integrity_checking {
            if let Some(request_id) = &event.request_id {
                self.chain_heads
                    .insert(request_id.clone(), event.event_hash.clone());
            }
        }

        {
            let mut store = match self.store.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            store.push(event.clone());
            if store.len() > MAX_STORED_EVENTS {
                let excess = store.len() - MAX_STORED_EVENTS;
                store.drain(0..excess);
            }
        }

        metrics::counter!(
            "conductor_audit_events_total",
            "event_type" => event.event_type.as_str(),
        )
        .increment(1);

        Ok(Some(event))
    }

    fn build_event(&self, draft: EventDraft) -> AuditEvent {
        let pii = draft.pii || !draft.pii_types.is_empty();

        let data_classification = if pii {
            DataClassification::Restricted
        } else if matches!(draft.domain, Some(Domain::Legal) | Some(Domain::Medical)) {
            DataClassification::Confidential
        } else if draft.tenant.is_some() {
            DataClassification::Internal
        } else {
            DataClassification::Public
        };

        let gdpr_lawful_basis = if pii {
            LawfulBasis::Consent
        } else if draft.domain == Some(Domain::Legal) {
            LawfulBasis::LegalObligation
        } else {
            LawfulBasis::LegitimateInterests
        };

        let compliance_status = match draft.event_type {
            EventType::SsrfViolation | EventType::ComplianceViolation => {
                ComplianceStatus::Violation
            }
            EventType::PiiDetection => ComplianceStatus::Warning,
            _ => ComplianceStatus::Compliant,
        };

        let user_pseudonym = draft.user_id.as_deref().map(|id| {
            if self.config.anonymization_enabled {
                self.pseudonymizer.pseudonymize(id)
            } else {
                id.to_string()
            }
        });

        let previous_event_hash = draft
            .request_id
            .as_ref()
            .and_then(|id| self.chain_heads.get(id).map(|h| h.clone()))
            .unwrap_or_default();

        let mut event = AuditEvent {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: self.clock.now_utc(),
            event_type: draft.event_type,
            request_id: draft.request_id,
            provider: draft.provider,
            model_id: draft.model_id,
            content_hash: sha256_hex(draft.content.as_bytes()),
            content_length: draft.content.len(),
            content_type: draft.content_type,
            data_classification,
            gdpr_lawful_basis,
            compliance_status,
            pii_detected: if pii { Some(true) } else { None },
            pii_types: if self.config.enable_pii_logging && !draft.pii_types.is_empty() {
                Some(draft.pii_types)
            } else {
                None
            },
            user_pseudonym,
            latency_ms: draft.latency_ms,
            cost_euro: draft.cost_euro,
            tokens_used: draft.tokens_used,
            error_kind: draft.error_kind,
            previous_event_hash,
            event_hash: String::new(),
            metadata: draft.metadata,
            extra: serde_json::Map::new(),
        };
        event.event_hash = hash::event_hash(&event);
        event
    }

    /// Query the in-memory trail.
    pub fn events(&self, filter: &AuditFilter) -> Vec<AuditEvent> {
        let store = match self.store.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut matched: Vec<AuditEvent> = store
            .iter()
            .filter(|e| {
                filter
                    .request_id
                    .as_ref()
                    .is_none_or(|id| e.request_id.as_ref() == Some(id))
                    && filter.event_type.is_none_or(|t| e.event_type == t)
                    && filter.since.is_none_or(|s| e.timestamp >= s)
                    && filter.until.is_none_or(|u| e.timestamp <= u)
            })
            .cloned()
            .collect();
        if let Some(limit) = filter.limit {
            matched.truncate(limit);
        }
        matched
    }

    /// Number of retained events.
    pub fn len(&self) -> usize {
        self.store.lock().map(|g| g.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop events older than the configured retention. Returns how many
    /// were removed.
    pub fn sweep_retention(&self) -> usize {
        let cutoff = self.clock.now_utc()
            - chrono::Duration::days(i64::from(self.config.retention_days));
        let mut store = match self.store.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = store.len();
        store.retain(|e| e.timestamp >= cutoff);
        before - store.len()
    }

    /// Flush the sink. Called during graceful shutdown.
    pub fn flush(&self) -> Result<(), AuditError> {
        self.sink.flush()
    }

    /// Verify stored hashes and per-request chain linkage for the given
    /// events, in the order provided.
    pub fn verify_integrity(events: &[AuditEvent]) -> IntegrityReport {
        let mut errors = Vec::new();
        let mut last_hash_per_request: std::collections::HashMap<&str, &str> =
            std::collections::HashMap::new();

        for event in events {
            let recomputed = hash::event_hash(event);
            if recomputed != event.event_hash {
                errors.push(format!(
                    "event {}: stored hash does not match recomputed hash",
                    event.event_id
                ));
            }

            if let Some(request_id) = event.request_id.as_deref() {
                if let Some(previous) = last_hash_per_request.get(request_id) {
                    if event.previous_event_hash != *previous {
                        errors.push(format!(
                            "event {}: broken chain for request {}",
                            event.event_id, request_id
                        ));
                    }
                }
                last_hash_per_request.insert(request_id, event.event_hash.as_str());
            }
        }

        IntegrityReport {
            valid: errors.is_empty(),
            errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::types::RequestContext;
    use std::sync::Arc;

    fn trail() -> AuditTrail {
        AuditTrail::new(
            AuditConfig::default(),
            Arc::new(ManualClock::new(1_700_000_000_000)),
            Box::new(MemorySink::new()),
        )
    }

    fn start_draft(request: &Request) -> EventDraft {
        EventDraft::new(EventType::AiRequestStart, &request.prompt, ContentType::Prompt)
            .for_request(request)
    }

    #[test]
    fn prompt_is_reduced_to_hash_and_length() {
        let trail = trail();
        let request = Request::new("the secret prompt", RequestContext::default());
        let event = trail.log_event(start_draft(&request)).unwrap().unwrap();

        assert_eq!(event.content_hash, sha256_hex(b"the secret prompt"));
        assert_eq!(event.content_length, 17);
        let serialized = serde_json::to_string(&event).unwrap();
        assert!(!serialized.contains("the secret prompt"));
    }

    #[test]
    fn chain_links_events_per_request() {
        let trail = trail();
        let request = Request::new("hello", RequestContext::default());

        let first = trail.log_event(start_draft(&request)).unwrap().unwrap();
        let second = trail
            .log_event(
                EventDraft::new(EventType::AiRequestComplete, "answer", ContentType::Response)
                    .for_request(&request),
            )
            .unwrap()
            .unwrap();

        assert!(first.previous_event_hash.is_empty());
        assert_eq!(second.previous_event_hash, first.event_hash);
    }

    #[test]
    fn verify_detects_tampering_and_names_the_event() {
        let trail = trail();
        let request = Request::new("hello", RequestContext::default());
        trail.log_event(start_draft(&request)).unwrap();
        trail
            .log_event(
                EventDraft::new(EventType::AiRequestComplete, "answer", ContentType::Response)
                    .for_request(&request),
            )
            .unwrap();

        let mut events = trail.events(&AuditFilter::default());
        assert!(AuditTrail::verify_integrity(&events).valid);

        events[0].content_hash = sha256_hex(b"tampered");
        let report = AuditTrail::verify_integrity(&events);
        assert!(!report.valid);
        assert!(report.errors[0].contains(&events[0].event_id));
    }

    #[test]
    fn classification_rules_apply_in_order() {
        let trail = trail();

        let mut context = RequestContext {
            pii: true,
            ..Default::default()
        };
        let request = Request::new("x", context.clone());
        let event = trail.log_event(start_draft(&request)).unwrap().unwrap();
        assert_eq!(event.data_classification, DataClassification::Restricted);
        assert_eq!(event.gdpr_lawful_basis, LawfulBasis::Consent);

        context.pii = false;
        context.domain = Domain::Legal;
        let request = Request::new("x", context.clone());
        let event = trail.log_event(start_draft(&request)).unwrap().unwrap();
        assert_eq!(event.data_classification, DataClassification::Confidential);
        assert_eq!(event.gdpr_lawful_basis, LawfulBasis::LegalObligation);

        context.domain = Domain::General;
        context.tenant = Some("acme".to_string());
        let request = Request::new("x", context.clone());
        let event = trail.log_event(start_draft(&request)).unwrap().unwrap();
        assert_eq!(event.data_classification, DataClassification::Internal);

        context.tenant = None;
        let request = Request::new("x", context);
        let event = trail.log_event(start_draft(&request)).unwrap().unwrap();
        assert_eq!(event.data_classification, DataClassification::Public);
        assert_eq!(event.gdpr_lawful_basis, LawfulBasis::LegitimateInterests);
    }

    #[test]
    fn user_id_is_pseudonymized() {
        let trail = trail();
        let context = RequestContext {
            user_id: Some("user-42".to_string()),
            ..Default::default()
        };
        let request = Request::new("x", context);
        let event = trail.log_event(start_draft(&request)).unwrap().unwrap();

        let pseudonym = event.user_pseudonym.unwrap();
        assert_ne!(pseudonym, "user-42");
        assert!(pseudonym.starts_with("anon-"));
    }

    #[test]
    fn disabled_trail_logs_nothing() {
        let trail = AuditTrail::new(
            AuditConfig {
                enable_audit_trail: false,
                ..Default::default()
            },
            Arc::new(ManualClock::new(0)),
            Box::new(MemorySink::new()),
        );
        let request = Request::new("x", RequestContext::default());
        assert!(trail.log_event(start_draft(&request)).unwrap().is_none());
        assert!(trail.is_empty());
    }

    #[test]
    fn strict_mode_rejects_unscoped_request_events() {
        let trail = AuditTrail::new(
            AuditConfig {
                compliance_mode: ComplianceMode::Strict,
                ..Default::default()
            },
            Arc::new(ManualClock::new(0)),
            Box::new(MemorySink::new()),
        );
        let draft = EventDraft::new(EventType::AiRequestStart, "x", ContentType::Prompt);
        assert!(matches!(
            trail.log_event(draft),
            Err(AuditError::StrictMode(_))
        ));
    }

    #[test]
    fn retention_sweep_drops_old_events() {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let trail = AuditTrail::new(
            AuditConfig {
                retention_days: 1,
                ..Default::default()
            },
            clock.clone(),
            Box::new(MemorySink::new()),
        );
        let request = Request::new("x", RequestContext::default());
        trail.log_event(start_draft(&request)).unwrap();

        clock.advance(2 * 24 * 60 * 60 * 1_000);
        let request2 = Request::new("y", RequestContext::default());
        trail.log_event(start_draft(&request2)).unwrap();

        assert_eq!(trail.sweep_retention(), 1);
        assert_eq!(trail.len(), 1);
    }

    #[test]
    fn filter_by_type_and_request() {
        let trail = trail();
        let request = Request::new("x", RequestContext::default());
        trail.log_event(start_draft(&request)).unwrap();
        trail
            .log_event(
                EventDraft::new(EventType::CacheHit, "y", ContentType::Response)
                    .for_request(&request),
            )
            .unwrap();

        let hits = trail.events(&AuditFilter {
            event_type: Some(EventType::CacheHit),
            ..Default::default()
        });
        assert_eq!(hits.len(), 1);

        let for_request = trail.events(&AuditFilter {
            request_id: Some(request.id.clone()),
            ..Default::default()
        });
        assert_eq!(for_request.len(), 2);
    }
}
