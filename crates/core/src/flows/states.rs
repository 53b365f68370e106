use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::phase::Constellation;

/// Where one registration is in its walk through the constellation.
/// Indices refer to the phase position in the constellation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistrationState {
    Pending,
    RunningPhase(usize),
    ReservingCapacity(usize),
    Negotiating(usize),
    Extracting(usize),
    Persisting(usize),
    ConsumingCapacity(usize),
    Done,
    Failed,
}

impl RegistrationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    pub fn phase_index(self) -> Option<usize> {
        match self {
            Self::RunningPhase(index)
            | Self::ReservingCapacity(index)
            | Self::Negotiating(index)
            | Self::Extracting(index)
            | Self::Persisting(index)
            | Self::ConsumingCapacity(index) => Some(index),
            Self::Pending | Self::Done | Self::Failed => None,
        }
    }
}

impl fmt::Display for RegistrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::RunningPhase(index) => write!(f, "running_phase[{index}]"),
            Self::ReservingCapacity(index) => write!(f, "reserving_capacity[{index}]"),
            Self::Negotiating(index) => write!(f, "negotiating[{index}]"),
            Self::Extracting(index) => write!(f, "extracting[{index}]"),
            Self::Persisting(index) => write!(f, "persisting[{index}]"),
            Self::ConsumingCapacity(index) => write!(f, "consuming_capacity[{index}]"),
            Self::Done => f.write_str("done"),
            Self::Failed => f.write_str("failed"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowEvent {
    BeginPhase,
    ReserveCapacity,
    Negotiate,
    Extract,
    Persist,
    ConsumeCapacity,
    CompletePhase,
    Fail,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseFlags {
    pub capacity_update_before: bool,
    pub capacity_update_after: bool,
}

/// The per-phase facts the transition function needs.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowContext {
    pub phases: Vec<PhaseFlags>,
}

impl FlowContext {
    pub fn for_constellation(constellation: &Constellation) -> Self {
        Self {
            phases: constellation
                .phases
                .iter()
                .map(|phase| PhaseFlags {
                    capacity_update_before: phase.capacity_update_before,
                    capacity_update_after: phase.capacity_update_after,
                })
                .collect(),
        }
    }

    pub fn phase_count(&self) -> usize {
        self.phases.len()
    }

    pub fn flags(&self, index: usize) -> Option<PhaseFlags> {
        self.phases.get(index).copied()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: RegistrationState,
    pub to: RegistrationState,
    pub event: FlowEvent,
}
