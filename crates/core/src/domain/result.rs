use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::phase::AgentRole;
use crate::domain::registration::RegistrationId;

/// Outcome of one phase for one registration. `outputs` holds the payload
/// extracted for each producer that yielded one.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseResult {
    pub success: bool,
    pub outputs: BTreeMap<AgentRole, Value>,
}

impl PhaseResult {
    pub fn failed() -> Self {
        Self::default()
    }

    pub fn output(&self, role: AgentRole) -> Option<&Value> {
        self.outputs.get(&role)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimingSample {
    pub registration_id: RegistrationId,
    pub column: String,
    pub seconds: f64,
}
