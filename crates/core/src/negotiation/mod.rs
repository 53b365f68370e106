//! Seam to the external negotiation collaborator.
//!
//! A session receives the phase's participants and one opening message, and
//! answers with every message exchanged plus the reason it stopped.

pub mod runner;
pub mod tokens;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::phase::AgentRole;

pub use runner::{ResilientRunner, RetryPolicy, RunOutcome, RunnerError};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub role: AgentRole,
    pub system_prompt: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageSource {
    User,
    Agent(AgentRole),
    Other(String),
}

impl fmt::Display for MessageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => f.write_str("user"),
            Self::Agent(role) => write!(f, "{role}"),
            Self::Other(name) => f.write_str(name),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMessage {
    pub source: MessageSource,
    pub content: String,
}

impl SessionMessage {
    pub fn agent(role: AgentRole, content: impl Into<String>) -> Self {
        Self { source: MessageSource::Agent(role), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { source: MessageSource::User, content: content.into() }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTranscript {
    pub messages: Vec<SessionMessage>,
    pub stop_reason: Option<String>,
}

impl SessionTranscript {
    /// Everything `role` said during the session, concatenated in order.
    pub fn text_from(&self, role: AgentRole) -> String {
        self.messages
            .iter()
            .filter(|message| message.source == MessageSource::Agent(role))
            .map(|message| message.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRequest {
    pub phase: String,
    pub participants: Vec<Participant>,
    pub message: String,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("negotiation collaborator is rate limited: {0}")]
    RateLimited(String),
    #[error("negotiation transport failure: {0}")]
    Transport(String),
    #[error("negotiation protocol failure: {0}")]
    Protocol(String),
}

#[async_trait]
pub trait NegotiationSession: Send + Sync {
    async fn run(&self, request: &SessionRequest) -> Result<SessionTranscript, SessionError>;
}

#[cfg(test)]
mod tests {
    use super::{MessageSource, SessionMessage, SessionTranscript};
    use crate::domain::phase::AgentRole;

    #[test]
    fn transcript_text_is_collected_per_role() {
        let transcript = SessionTranscript {
            messages: vec![
                SessionMessage::user("task"),
                SessionMessage::agent(AgentRole::Producer1, "first"),
                SessionMessage::agent(AgentRole::Reviewer1, "looks off"),
                SessionMessage::agent(AgentRole::Producer1, "second"),
            ],
            stop_reason: None,
        };

        assert_eq!(transcript.text_from(AgentRole::Producer1), "first\nsecond");
        assert_eq!(transcript.text_from(AgentRole::Producer2), "");
        assert_eq!(MessageSource::Agent(AgentRole::Reviewer1).to_string(), "critic1");
    }
}
