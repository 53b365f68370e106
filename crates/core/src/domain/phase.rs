use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Structural role of a phase participant. Producers emit a payload;
/// reviewers only approve or reject the producer they are paired with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Producer1,
    Producer2,
    Reviewer1,
    Reviewer2,
}

impl AgentRole {
    pub fn is_producer(self) -> bool {
        matches!(self, Self::Producer1 | Self::Producer2)
    }

    pub fn is_reviewer(self) -> bool {
        !self.is_producer()
    }

    /// Participant name shown to the negotiation collaborator.
    pub fn participant_name(self) -> &'static str {
        match self {
            Self::Producer1 => "matcher1",
            Self::Producer2 => "matcher2",
            Self::Reviewer1 => "critic1",
            Self::Reviewer2 => "critic2",
        }
    }

    pub fn reviewed_producer(self) -> Option<AgentRole> {
        match self {
            Self::Reviewer1 => Some(Self::Producer1),
            Self::Reviewer2 => Some(Self::Producer2),
            Self::Producer1 | Self::Producer2 => None,
        }
    }

    pub fn output_kind(self) -> Option<OutputKind> {
        match self {
            Self::Producer1 => Some(OutputKind::Matches),
            Self::Producer2 => Some(OutputKind::Enriched),
            Self::Reviewer1 | Self::Reviewer2 => None,
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.participant_name())
    }
}

/// Accepts the structural names plus the historical `matcher*`/`critic*`
/// spellings. A bare `critic` is ambiguous and is resolved by the
/// constellation loader, not here.
impl FromStr for AgentRole {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "producer1" | "matcher1" | "matcher" => Ok(Self::Producer1),
            "producer2" | "matcher2" => Ok(Self::Producer2),
            "reviewer1" | "critic1" => Ok(Self::Reviewer1),
            "reviewer2" | "critic2" => Ok(Self::Reviewer2),
            other => Err(format!(
                "unsupported agent role `{other}` (expected producer1|producer2|reviewer1|reviewer2)"
            )),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    Matches,
    Enriched,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseAgent {
    pub role: AgentRole,
    pub prompt_key: String,
}

/// When a phase counts as completed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuccessPredicate {
    /// Single producer, no reviewer: the extracted payload is the approval.
    ProducerPayload,
    /// Every producer yielded a payload and a reviewer or the stop reason approved.
    ProducersAndApproval,
    /// Group phase: every producer yielded a payload; approval alone never suffices.
    AllProducers,
}

impl SuccessPredicate {
    pub fn derive(agents: &[PhaseAgent]) -> Self {
        let producers = agents.iter().filter(|agent| agent.role.is_producer()).count();
        let reviewers = agents.len() - producers;

        if producers > 1 {
            Self::AllProducers
        } else if reviewers > 0 {
            Self::ProducersAndApproval
        } else {
            Self::ProducerPayload
        }
    }

    pub fn is_satisfied(self, signals: &PhaseSignals) -> bool {
        let payloads_complete =
            signals.producers_expected > 0 && signals.payloads_present == signals.producers_expected;

        match self {
            Self::ProducerPayload | Self::AllProducers => payloads_complete,
            Self::ProducersAndApproval => {
                payloads_complete && (signals.reviewer_approved || signals.stop_reason_approved)
            }
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PhaseSignals {
    pub producers_expected: usize,
    pub payloads_present: usize,
    pub reviewer_approved: bool,
    pub stop_reason_approved: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phase {
    pub name: String,
    pub description: String,
    pub agents: Vec<PhaseAgent>,
    pub capacity_update_before: bool,
    pub capacity_update_after: bool,
    pub success: SuccessPredicate,
}

impl Phase {
    pub fn producers(&self) -> impl Iterator<Item = AgentRole> + '_ {
        self.agents.iter().map(|agent| agent.role).filter(|role| role.is_producer())
    }

    pub fn reviewers(&self) -> impl Iterator<Item = AgentRole> + '_ {
        self.agents.iter().map(|agent| agent.role).filter(|role| role.is_reviewer())
    }

    pub fn has_role(&self, role: AgentRole) -> bool {
        self.agents.iter().any(|agent| agent.role == role)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constellation {
    pub name: String,
    pub description: String,
    pub phases: Vec<Phase>,
    pub prompt_variant: Option<String>,
    pub timing_columns: Vec<String>,
}

impl Constellation {
    pub fn stats_columns(&self) -> Vec<String> {
        std::iter::once(crate::domain::registration::PRIMARY_KEY.to_string())
            .chain(self.timing_columns.iter().cloned())
            .collect()
    }

    pub fn prompt_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self
            .phases
            .iter()
            .flat_map(|phase| phase.agents.iter().map(|agent| agent.prompt_key.as_str()))
            .collect();
        keys.sort_unstable();
        keys.dedup();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::{AgentRole, PhaseAgent, PhaseSignals, SuccessPredicate};

    fn agents(roles: &[AgentRole]) -> Vec<PhaseAgent> {
        roles.iter().map(|role| PhaseAgent { role: *role, prompt_key: "k".to_string() }).collect()
    }

    #[test]
    fn predicate_is_derived_from_roles() {
        use AgentRole::*;

        assert_eq!(SuccessPredicate::derive(&agents(&[Producer1])), SuccessPredicate::ProducerPayload);
        assert_eq!(
            SuccessPredicate::derive(&agents(&[Producer1, Reviewer1])),
            SuccessPredicate::ProducersAndApproval
        );
        assert_eq!(
            SuccessPredicate::derive(&agents(&[Producer1, Reviewer1, Producer2])),
            SuccessPredicate::AllProducers
        );
    }

    #[test]
    fn reviewer_phase_needs_payload_and_approval() {
        let predicate = SuccessPredicate::ProducersAndApproval;
        let base = PhaseSignals { producers_expected: 1, payloads_present: 1, ..Default::default() };

        assert!(!predicate.is_satisfied(&base));
        assert!(predicate.is_satisfied(&PhaseSignals { reviewer_approved: true, ..base }));
        assert!(predicate.is_satisfied(&PhaseSignals { stop_reason_approved: true, ..base }));
        assert!(!predicate.is_satisfied(&PhaseSignals {
            payloads_present: 0,
            reviewer_approved: true,
            ..base
        }));
    }

    #[test]
    fn group_phase_ignores_bare_approval() {
        let signals = PhaseSignals {
            producers_expected: 2,
            payloads_present: 1,
            reviewer_approved: true,
            stop_reason_approved: true,
        };
        assert!(!SuccessPredicate::AllProducers.is_satisfied(&signals));
        assert!(SuccessPredicate::AllProducers
            .is_satisfied(&PhaseSignals { payloads_present: 2, ..signals }));
    }

    #[test]
    fn legacy_role_names_parse() {
        assert_eq!("matcher1".parse::<AgentRole>(), Ok(AgentRole::Producer1));
        assert_eq!("Critic2".parse::<AgentRole>(), Ok(AgentRole::Reviewer2));
        assert!("critic".parse::<AgentRole>().is_err());
    }
}
