use thiserror::Error;

use crate::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, RunContext};
use crate::domain::registration::RegistrationId;
use crate::flows::states::{FlowContext, FlowEvent, RegistrationState, TransitionOutcome};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("invalid transition from {state:?} using event {event:?}")]
    InvalidTransition { state: RegistrationState, event: FlowEvent },
    #[error("constellation has no phases")]
    NoPhases,
}

/// Registration lifecycle:
/// `Pending -> RunningPhase -> [ReservingCapacity] -> Negotiating -> Extracting
/// -> Persisting -> [ConsumingCapacity] -> next phase | Done`, with `Fail`
/// accepted from every non-terminal state.
#[derive(Clone, Debug)]
pub struct RegistrationFlow {
    context: FlowContext,
}

impl RegistrationFlow {
    pub fn new(context: FlowContext) -> Self {
        Self { context }
    }

    pub fn initial_state(&self) -> RegistrationState {
        RegistrationState::Pending
    }

    pub fn context(&self) -> &FlowContext {
        &self.context
    }

    pub fn apply(
        &self,
        current: RegistrationState,
        event: FlowEvent,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        transition(current, event, &self.context)
    }

    pub fn apply_with_audit<S>(
        &self,
        current: RegistrationState,
        event: FlowEvent,
        sink: &S,
        run: &RunContext,
        registration_id: &RegistrationId,
    ) -> Result<TransitionOutcome, FlowTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, event);
        match &result {
            Ok(outcome) => {
                sink.emit(
                    AuditEvent::new(
                        run,
                        Some(registration_id.clone()),
                        "flow.transition_applied",
                        AuditCategory::Flow,
                        if outcome.to == RegistrationState::Failed {
                            AuditOutcome::Failed
                        } else {
                            AuditOutcome::Success
                        },
                    )
                    .with_metadata("from", outcome.from.to_string())
                    .with_metadata("to", outcome.to.to_string())
                    .with_metadata("event", format!("{:?}", outcome.event)),
                );
            }
            Err(error) => {
                sink.emit(
                    AuditEvent::new(
                        run,
                        Some(registration_id.clone()),
                        "flow.transition_rejected",
                        AuditCategory::Flow,
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

fn transition(
    current: RegistrationState,
    event: FlowEvent,
    context: &FlowContext,
) -> Result<TransitionOutcome, FlowTransitionError> {
    use FlowEvent::{
        BeginPhase, CompletePhase, ConsumeCapacity, Extract, Fail, Negotiate, Persist,
        ReserveCapacity,
    };
    use RegistrationState::{
        ConsumingCapacity, Done, Extracting, Failed, Negotiating, Pending, Persisting,
        ReservingCapacity, RunningPhase,
    };

    let invalid = || FlowTransitionError::InvalidTransition { state: current, event };
    let flags = |index: usize| context.flags(index).ok_or_else(invalid);

    let to = match (current, event) {
        (Done | Failed, _) => return Err(invalid()),
        (_, Fail) => Failed,
        (Pending, BeginPhase) => {
            if context.phase_count() == 0 {
                return Err(FlowTransitionError::NoPhases);
            }
            RunningPhase(0)
        }
        (RunningPhase(index), ReserveCapacity) if flags(index)?.capacity_update_before => {
            ReservingCapacity(index)
        }
        (RunningPhase(index) | ReservingCapacity(index), Negotiate) => Negotiating(index),
        (Negotiating(index), Extract) => Extracting(index),
        (Extracting(index), Persist) => Persisting(index),
        (Persisting(index), ConsumeCapacity) if flags(index)?.capacity_update_after => {
            ConsumingCapacity(index)
        }
        (Persisting(index) | ConsumingCapacity(index), CompletePhase) => {
            if index + 1 < context.phase_count() {
                RunningPhase(index + 1)
            } else {
                Done
            }
        }
        _ => return Err(invalid()),
    };

    Ok(TransitionOutcome { from: current, to, event })
}
