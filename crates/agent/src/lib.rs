//! Negotiation collaborator backed by a chat-completion model.
//!
//! The core crate only knows the `NegotiationSession` trait. This crate
//! supplies the concrete session: a round-robin group chat where every phase
//! participant is one model persona, stopped by conditions derived from the
//! participants' roles.
//!
//! # Key Types
//!
//! - `LlmClient` - one completion per call, implemented for OpenAI-compatible
//!   servers (OpenAI, Ollama) and Anthropic
//! - `RoundRobinSession` - the `NegotiationSession` implementation
//! - `TerminationCondition` - approval and message-budget stop rules

pub mod anthropic;
pub mod group_chat;
pub mod llm;
pub mod openai;
pub mod provider;
pub mod termination;

pub use group_chat::{GroupChatSettings, RoundRobinSession};
pub use llm::{ChatMessage, ChatRole, Completion, CompletionRequest, LlmClient, LlmError};
pub use provider::build_client;
pub use termination::TerminationCondition;
