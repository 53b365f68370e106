pub mod engine;
pub mod states;

pub use engine::{FlowTransitionError, RegistrationFlow};
pub use states::{FlowContext, FlowEvent, PhaseFlags, RegistrationState, TransitionOutcome};
