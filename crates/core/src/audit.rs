use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::registration::RegistrationId;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditCategory {
    Flow,
    Capacity,
    Negotiation,
    Persistence,
    System,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditOutcome {
    Success,
    Rejected,
    Failed,
}

/// Per-run logging and audit context, handed to every component at
/// construction so events can be correlated without a global logger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunContext {
    pub run_id: String,
    pub constellation: String,
    pub actor: String,
}

impl RunContext {
    pub fn new(constellation: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            constellation: constellation.into(),
            actor: "orchestrator".to_string(),
        }
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub run_id: String,
    pub constellation: String,
    pub registration_id: Option<RegistrationId>,
    pub phase: Option<String>,
    pub event_type: String,
    pub category: AuditCategory,
    pub actor: String,
    pub outcome: AuditOutcome,
    pub metadata: BTreeMap<String, String>,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        context: &RunContext,
        registration_id: Option<RegistrationId>,
        event_type: impl Into<String>,
        category: AuditCategory,
        outcome: AuditOutcome,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            run_id: context.run_id.clone(),
            constellation: context.constellation.clone(),
            registration_id,
            phase: None,
            event_type: event_type.into(),
            category,
            actor: context.actor.clone(),
            outcome,
            metadata: BTreeMap::new(),
            occurred_at: Utc::now(),
        }
    }

    pub fn with_phase(mut self, phase: impl Into<String>) -> Self {
        self.phase = Some(phase.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

pub trait AuditSink: Send + Sync {
    fn emit(&self, event: AuditEvent);
}

#[derive(Clone, Default)]
pub struct InMemoryAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl InMemoryAuditSink {
    pub fn events(&self) -> Vec<AuditEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn events_of_type(&self, event_type: &str) -> Vec<AuditEvent> {
        self.events().into_iter().filter(|event| event.event_type == event_type).collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn emit(&self, event: AuditEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

/// Forwards audit events to `tracing` at debug level.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        let metadata = serde_json::to_string(&event.metadata).unwrap_or_default();
        tracing::debug!(
            event_name = "audit.event",
            audit_event = %event.event_type,
            run_id = %event.run_id,
            constellation = %event.constellation,
            registration_id = event.registration_id.as_ref().map(|id| id.0.as_str()).unwrap_or(""),
            phase = event.phase.as_deref().unwrap_or(""),
            category = ?event.category,
            outcome = ?event.outcome,
            metadata = %metadata,
            "audit event"
        );
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink, RunContext},
        domain::registration::RegistrationId,
    };

    #[test]
    fn in_memory_sink_records_events_with_run_fields() {
        let context = RunContext::new("p1m1_p2m2").with_run_id("run-7");
        let sink = InMemoryAuditSink::default();
        sink.emit(
            AuditEvent::new(
                &context,
                Some(RegistrationId("R-1".to_owned())),
                "flow.transition_applied",
                AuditCategory::Flow,
                AuditOutcome::Success,
            )
            .with_phase("phase1")
            .with_metadata("from", "Pending")
            .with_metadata("to", "RunningPhase(0)"),
        );

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].run_id, "run-7");
        assert_eq!(events[0].constellation, "p1m1_p2m2");
        assert_eq!(events[0].phase.as_deref(), Some("phase1"));
        assert_eq!(events[0].registration_id.as_ref().map(|id| id.0.as_str()), Some("R-1"));
        assert!(events[0].metadata.contains_key("from"));
        assert_eq!(sink.events_of_type("flow.transition_applied").len(), 1);
    }

    #[test]
    fn run_context_generates_distinct_ids() {
        assert_ne!(RunContext::new("a").run_id, RunContext::new("a").run_id);
    }
}
