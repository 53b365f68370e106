pub mod audit;
pub mod capacity;
pub mod config;
pub mod constellation;
pub mod domain;
pub mod errors;
pub mod extract;
pub mod flows;
pub mod negotiation;
pub mod prompts;
pub mod scenario;
pub mod store;
pub mod timing;
pub mod workflow;

pub use audit::{AuditEvent, AuditSink, InMemoryAuditSink, RunContext, TracingAuditSink};
pub use capacity::{CapacityAllocator, CapacityError, CapacityLedger, ResetTarget};
pub use constellation::{ConstellationError, ConstellationRegistry};
pub use domain::phase::{AgentRole, Constellation, Phase, SuccessPredicate};
pub use domain::registration::{Registration, RegistrationId};
pub use errors::WorkflowError;
pub use negotiation::{
    NegotiationSession, Participant, SessionError, SessionMessage, SessionRequest,
    SessionTranscript,
};
pub use scenario::WorkflowPaths;
pub use workflow::{bootstrap, Orchestrator, RunSummary};
