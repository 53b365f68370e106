use std::collections::BTreeMap;

use serde_json::Value;

use crate::domain::phase::{Phase, PhaseSignals};
use crate::domain::result::PhaseResult;
use crate::extract::{contains_approval, extract_with_strategy};
use crate::negotiation::SessionTranscript;

#[derive(Clone, Debug, PartialEq)]
pub struct PhaseEvaluation {
    pub result: PhaseResult,
    pub signals: PhaseSignals,
}

/// Extracts one payload per producer and applies the phase's success
/// predicate. Reviewers only ever contribute the approval signal.
pub fn evaluate_phase(phase: &Phase, transcript: &SessionTranscript) -> PhaseEvaluation {
    let mut outputs = BTreeMap::new();
    let mut producers_expected = 0;

    for role in phase.producers() {
        producers_expected += 1;
        let text = transcript.text_from(role);
        match extract_with_strategy(&text) {
            Some(extraction) if !is_empty_payload(&extraction.value) => {
                tracing::debug!(
                    event_name = "workflow.payload_extracted",
                    phase = %phase.name,
                    role = %role,
                    strategy = ?extraction.strategy,
                    "producer payload extracted"
                );
                outputs.insert(role, extraction.value);
            }
            _ => {
                tracing::debug!(
                    event_name = "workflow.payload_missing",
                    phase = %phase.name,
                    role = %role,
                    "producer yielded no payload"
                );
            }
        }
    }

    let reviewer_approved =
        phase.reviewers().any(|role| contains_approval(&transcript.text_from(role)));
    let stop_reason_approved =
        transcript.stop_reason.as_deref().map(contains_approval).unwrap_or(false);

    let signals = PhaseSignals {
        producers_expected,
        payloads_present: outputs.len(),
        reviewer_approved,
        stop_reason_approved,
    };
    let success = phase.success.is_satisfied(&signals);

    PhaseEvaluation { result: PhaseResult { success, outputs }, signals }
}

/// Splits a payload into the records that get persisted: each element of a
/// list, or the object itself.
pub fn payload_records(payload: &Value) -> Vec<Value> {
    match payload {
        Value::Array(items) => items.iter().filter(|item| !item.is_null()).cloned().collect(),
        Value::Null => Vec::new(),
        other => vec![other.clone()],
    }
}

fn is_empty_payload(value: &Value) -> bool {
    match value {
        Value::Array(items) => items.is_empty(),
        Value::Object(fields) => fields.is_empty(),
        Value::Null => true,
        _ => false,
    }
}
