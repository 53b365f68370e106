//! Stop conditions for a group chat, evaluated over the whole transcript after
//! every turn. Conditions are monotonic: once satisfied by a prefix of the
//! transcript they stay satisfied.

use matchline_core::extract::APPROVAL_TOKEN;
use matchline_core::negotiation::{MessageSource, SessionMessage};
use matchline_core::AgentRole;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TerminationCondition {
    /// Some message from one of `sources` contains `text` (case-insensitive).
    TextMention { text: String, sources: Vec<AgentRole> },
    MaxMessages(usize),
    AllOf(Vec<TerminationCondition>),
    AnyOf(Vec<TerminationCondition>),
}

impl TerminationCondition {
    pub fn approval_from(role: AgentRole) -> Self {
        Self::TextMention { text: APPROVAL_TOKEN.to_string(), sources: vec![role] }
    }

    /// Reviewers approve when the chat has any; otherwise the producers
    /// announce completion themselves. Two approvers must both approve and the
    /// message budget must be spent; a single approver or the budget alone
    /// ends the chat.
    pub fn for_participants(roles: &[AgentRole], max_messages: usize) -> Self {
        let reviewers: Vec<AgentRole> = roles.iter().copied().filter(|role| role.is_reviewer()).collect();
        let approvers = if reviewers.is_empty() {
            roles.iter().copied().filter(|role| role.is_producer()).collect()
        } else {
            reviewers
        };

        match approvers.as_slice() {
            [] => Self::MaxMessages(max_messages),
            [single] => {
                Self::AnyOf(vec![Self::approval_from(*single), Self::MaxMessages(max_messages)])
            }
            [first, second, ..] => Self::AllOf(vec![
                Self::approval_from(*first),
                Self::approval_from(*second),
                Self::MaxMessages(max_messages),
            ]),
        }
    }

    /// Returns the stop reason when the transcript satisfies the condition.
    pub fn check(&self, messages: &[SessionMessage]) -> Option<String> {
        match self {
            Self::TextMention { text, sources } => {
                let needle = text.to_ascii_uppercase();
                messages
                    .iter()
                    .find(|message| {
                        let from_source = match &message.source {
                            MessageSource::Agent(role) => sources.contains(role),
                            _ => false,
                        };
                        from_source && message.content.to_ascii_uppercase().contains(&needle)
                    })
                    .map(|message| format!("Text '{text}' mentioned by {}", message.source))
            }
            Self::MaxMessages(max) => (messages.len() >= *max).then(|| {
                format!("Maximum number of messages {max} reached, current message count: {}", messages.len())
            }),
            Self::AllOf(conditions) => {
                let reasons =
                    conditions.iter().map(|condition| condition.check(messages)).collect::<Option<Vec<_>>>()?;
                Some(reasons.join("; "))
            }
            Self::AnyOf(conditions) => {
                conditions.iter().find_map(|condition| condition.check(messages))
            }
        }
    }
}
