pub mod bootstrap;
pub mod evaluate;
pub mod inputs;
pub mod message;
pub mod orchestrator;

pub use bootstrap::{bootstrap, constellation_registry};
pub use evaluate::{evaluate_phase, payload_records, PhaseEvaluation};
pub use inputs::WorkflowInputs;
pub use message::{build_phase_message, MessageInputs};
pub use orchestrator::{FailedRegistration, Orchestrator, OrchestratorParts, RunSummary};
