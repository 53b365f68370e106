use std::sync::Arc;

use async_trait::async_trait;
use matchline_core::negotiation::{
    MessageSource, NegotiationSession, Participant, SessionError, SessionMessage, SessionRequest,
    SessionTranscript,
};

use crate::llm::{ChatMessage, CompletionRequest, LlmClient, LlmError};
use crate::termination::TerminationCondition;

pub const COMPLETION_INSTRUCTION: &str =
    "When you have completed your task and saved the output, say 'APPROVE' to indicate completion.";

#[derive(Clone, Debug)]
pub struct GroupChatSettings {
    pub model: String,
    pub max_tokens: u32,
    pub max_messages: usize,
}

/// Participants speak in declared order, one completion per turn, until the
/// termination condition derived from their roles is met. A chat whose
/// condition can never be met is cut off after three full message budgets.
pub struct RoundRobinSession {
    client: Arc<dyn LlmClient>,
    settings: GroupChatSettings,
}

impl RoundRobinSession {
    pub fn new(client: Arc<dyn LlmClient>, settings: GroupChatSettings) -> Self {
        Self { client, settings }
    }

    fn ceiling(&self) -> usize {
        self.settings.max_messages.saturating_mul(3).max(1)
    }

    fn completion_request(
        &self,
        speaker: &Participant,
        messages: &[SessionMessage],
    ) -> CompletionRequest {
        let mut chat = Vec::with_capacity(messages.len() + 1);
        chat.push(ChatMessage::system(format!(
            "{}\n\n{COMPLETION_INSTRUCTION}",
            speaker.system_prompt
        )));
        for message in messages {
            chat.push(match &message.source {
                MessageSource::Agent(role) if *role == speaker.role => {
                    ChatMessage::assistant(message.content.clone())
                }
                MessageSource::User => ChatMessage::user(message.content.clone()),
                other => ChatMessage::user(format!("{other}: {}", message.content)),
            });
        }

        CompletionRequest {
            model: self.settings.model.clone(),
            messages: chat,
            max_tokens: self.settings.max_tokens,
        }
    }
}

fn session_error(error: LlmError) -> SessionError {
    match error {
        LlmError::RateLimited { .. } => SessionError::RateLimited(error.to_string()),
        LlmError::Transport(_) => SessionError::Transport(error.to_string()),
        LlmError::Http { status, .. } if status >= 500 => SessionError::Transport(error.to_string()),
        LlmError::Http { .. } | LlmError::Decode(_) | LlmError::Config(_) => {
            SessionError::Protocol(error.to_string())
        }
    }
}

#[async_trait]
impl NegotiationSession for RoundRobinSession {
    async fn run(&self, request: &SessionRequest) -> Result<SessionTranscript, SessionError> {
        if request.participants.is_empty() {
            return Err(SessionError::Protocol(format!(
                "phase `{}` has no participants",
                request.phase
            )));
        }

        let roles: Vec<_> = request.participants.iter().map(|participant| participant.role).collect();
        let termination = TerminationCondition::for_participants(&roles, self.settings.max_messages);
        let mut messages = vec![SessionMessage::user(request.message.clone())];

        for speaker in request.participants.iter().cycle() {
            if let Some(reason) = termination.check(&messages) {
                return Ok(SessionTranscript { messages, stop_reason: Some(reason) });
            }
            if messages.len() >= self.ceiling() {
                tracing::warn!(
                    event_name = "negotiation.ceiling_reached",
                    phase = %request.phase,
                    messages = messages.len(),
                    "group chat stopped without meeting its termination condition"
                );
                let reason = format!("Message ceiling {} reached", self.ceiling());
                return Ok(SessionTranscript { messages, stop_reason: Some(reason) });
            }

            let completion = self
                .client
                .complete(&self.completion_request(speaker, &messages))
                .await
                .map_err(session_error)?;
            tracing::debug!(
                event_name = "negotiation.turn",
                phase = %request.phase,
                participant = %speaker.role,
                finish_reason = completion.finish_reason.as_deref().unwrap_or("unknown"),
                "participant replied"
            );
            messages.push(SessionMessage::agent(speaker.role, completion.content));
        }

        Err(SessionError::Protocol("participant rotation ended unexpectedly".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;

    use async_trait::async_trait;
    use matchline_core::negotiation::{
        NegotiationSession, Participant, SessionError, SessionMessage, SessionRequest,
    };
    use matchline_core::AgentRole;
    use tokio::sync::Mutex;

    use super::{GroupChatSettings, RoundRobinSession, COMPLETION_INSTRUCTION};
    use crate::llm::{ChatRole, Completion, CompletionRequest, LlmClient, LlmError};

    #[derive(Default)]
    struct ScriptedClient {
        replies: Mutex<VecDeque<Result<String, LlmError>>>,
        requests: Mutex<Vec<CompletionRequest>>,
    }

    impl ScriptedClient {
        fn new(replies: Vec<Result<&str, LlmError>>) -> Arc<Self> {
            let replies = replies.into_iter().map(|reply| reply.map(str::to_string)).collect();
            Arc::new(Self { replies: Mutex::new(replies), requests: Mutex::default() })
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedClient {
        async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError> {
            self.requests.lock().await.push(request.clone());
            let reply = self.replies.lock().await.pop_front().unwrap_or_else(|| Ok("...".to_string()));
            reply.map(|content| Completion { content, finish_reason: Some("stop".to_string()) })
        }
    }

    fn settings(max_messages: usize) -> GroupChatSettings {
        GroupChatSettings { model: "test-model".to_string(), max_tokens: 256, max_messages }
    }

    fn request(roles: &[AgentRole]) -> SessionRequest {
        SessionRequest {
            phase: "pair1".to_string(),
            participants: roles
                .iter()
                .map(|role| Participant { role: *role, system_prompt: format!("you are {role}") })
                .collect(),
            message: "Matcher1: Match based on instructions in system prompt.".to_string(),
        }
    }

    #[tokio::test]
    async fn pair_runs_until_the_reviewer_approves() {
        let client = ScriptedClient::new(vec![
            Ok("[{\"registration_id\": \"R1\"}]"),
            Ok("missing supplier id"),
            Ok("[{\"registration_id\": \"R1\", \"supplier_id\": \"S1\"}]"),
            Ok("APPROVE"),
        ]);
        let session = RoundRobinSession::new(client.clone(), settings(10));

        let transcript = session
            .run(&request(&[AgentRole::Producer1, AgentRole::Reviewer1]))
            .await
            .expect("session completes");

        assert_eq!(transcript.messages.len(), 5);
        assert_eq!(transcript.stop_reason.as_deref(), Some("Text 'APPROVE' mentioned by critic1"));
        assert_eq!(transcript.messages[3], SessionMessage::agent(AgentRole::Producer1, "[{\"registration_id\": \"R1\", \"supplier_id\": \"S1\"}]"));

        let requests = client.requests.lock().await;
        let third = &requests[2];
        assert!(third.messages[0].content.ends_with(COMPLETION_INSTRUCTION));
        assert_eq!(third.messages[1].role, ChatRole::User);
        assert_eq!(third.messages[2].role, ChatRole::Assistant, "own turns are replayed as assistant");
        assert_eq!(third.messages[3].content, "critic1: missing supplier id");
    }

    #[tokio::test]
    async fn message_budget_ends_a_chat_without_approval() {
        let client = ScriptedClient::new(Vec::new());
        let session = RoundRobinSession::new(client, settings(4));

        let transcript = session.run(&request(&[AgentRole::Producer1])).await.expect("session completes");

        assert_eq!(transcript.messages.len(), 4);
        assert!(transcript.stop_reason.as_deref().is_some_and(|reason| reason.starts_with("Maximum number")));
    }

    #[tokio::test]
    async fn rate_limits_surface_as_retryable_session_errors() {
        let client = ScriptedClient::new(vec![Err(LlmError::RateLimited {
            status: 429,
            body: "slow down".to_string(),
        })]);
        let session = RoundRobinSession::new(client, settings(10));

        let error = session.run(&request(&[AgentRole::Producer1])).await.expect_err("rate limited");
        assert!(matches!(error, SessionError::RateLimited(_)));
    }

    #[tokio::test]
    async fn unmet_conjunction_is_cut_off_at_the_ceiling() {
        let client = ScriptedClient::new(Vec::new());
        let session = RoundRobinSession::new(client, settings(2));

        let transcript = session
            .run(&request(&[AgentRole::Producer1, AgentRole::Reviewer1, AgentRole::Producer2, AgentRole::Reviewer2]))
            .await
            .expect("session completes");

        assert_eq!(transcript.messages.len(), 6);
        assert_eq!(transcript.stop_reason.as_deref(), Some("Message ceiling 6 reached"));
    }
}
