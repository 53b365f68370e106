use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::domain::phase::{AgentRole, Constellation, Phase, PhaseAgent, SuccessPredicate};

const BUILTINS: [(&str, &str); 4] = [
    ("p1m1m2c", include_str!("../constellations/p1m1m2c.yaml")),
    ("p1m1c1m2c2", include_str!("../constellations/p1m1c1m2c2.yaml")),
    ("p1m1c1_p2m2c2", include_str!("../constellations/p1m1c1_p2m2c2.yaml")),
    ("p1m1_p2m2", include_str!("../constellations/p1m1_p2m2.yaml")),
];

#[derive(Debug, Error)]
pub enum ConstellationError {
    #[error("unknown constellation `{name}`; known constellations: {}", .known.join(", "))]
    NotFound { name: String, known: Vec<String> },
    #[error("could not read constellation directory or file `{path}`: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not parse constellation `{name}`: {source}")]
    Parse {
        name: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("constellation `{name}` is invalid: {reason}")]
    Invalid { name: String, reason: String },
}

#[derive(Clone, Debug)]
enum Source {
    Builtin(&'static str),
    File(PathBuf),
}

/// Named constellation descriptors. Built-ins are embedded; a directory of
/// `<name>.yaml` (or `.yml`) files may add to or shadow them.
#[derive(Clone, Debug)]
pub struct ConstellationRegistry {
    entries: BTreeMap<String, Source>,
}

impl Default for ConstellationRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ConstellationRegistry {
    pub fn builtin() -> Self {
        let entries = BUILTINS
            .iter()
            .map(|(name, text)| ((*name).to_string(), Source::Builtin(text)))
            .collect();
        Self { entries }
    }

    pub fn with_dir(mut self, dir: &Path) -> Result<Self, ConstellationError> {
        let read_error = |source| ConstellationError::Read { path: dir.to_path_buf(), source };
        for entry in fs::read_dir(dir).map_err(read_error)? {
            let path = entry.map_err(read_error)?.path();
            if !is_yaml(&path) {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            if self.entries.contains_key(name) {
                tracing::debug!(
                    event_name = "constellation.shadowed",
                    constellation = name,
                    path = %path.display(),
                    "descriptor file shadows a built-in constellation"
                );
            }
            self.entries.insert(name.to_string(), Source::File(path));
        }
        Ok(self)
    }

    pub fn known_names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn load(&self, name: &str) -> Result<Constellation, ConstellationError> {
        let source = self.entries.get(name).ok_or_else(|| ConstellationError::NotFound {
            name: name.to_string(),
            known: self.known_names(),
        })?;

        let text = match source {
            Source::Builtin(text) => (*text).to_string(),
            Source::File(path) => fs::read_to_string(path)
                .map_err(|source| ConstellationError::Read { path: path.clone(), source })?,
        };
        parse_constellation(name, &text)
    }

    /// Every registered constellation, parsed. Fails on the first bad descriptor.
    pub fn load_all(&self) -> Result<Vec<Constellation>, ConstellationError> {
        self.entries.keys().map(|name| self.load(name)).collect()
    }
}

#[derive(Debug, Deserialize)]
struct DescriptorFile {
    name: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    prompts: PromptsSection,
    #[serde(default)]
    timing: TimingSection,
    #[serde(default)]
    phases: Vec<PhaseSection>,
}

#[derive(Debug, Default, Deserialize)]
struct PromptsSection {
    variant: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TimingSection {
    #[serde(default)]
    columns: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct PhaseSection {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    agents: Vec<AgentSection>,
    #[serde(default)]
    capacity_update_before: bool,
    #[serde(default)]
    capacity_update_after: bool,
    success: Option<SuccessPredicate>,
}

#[derive(Debug, Deserialize)]
struct AgentSection {
    role: String,
    prompt_key: String,
}

pub fn parse_constellation(name: &str, text: &str) -> Result<Constellation, ConstellationError> {
    let descriptor: DescriptorFile = serde_yaml::from_str(text)
        .map_err(|source| ConstellationError::Parse { name: name.to_string(), source })?;
    let invalid = |reason: String| ConstellationError::Invalid { name: name.to_string(), reason };

    if let Some(declared) = descriptor.name.as_deref() {
        if declared != name {
            return Err(invalid(format!("descriptor declares name `{declared}`")));
        }
    }
    if descriptor.phases.is_empty() {
        return Err(invalid("at least one phase is required".to_string()));
    }
    if descriptor.timing.columns.len() != descriptor.phases.len() {
        return Err(invalid(format!(
            "{} timing column(s) for {} phase(s)",
            descriptor.timing.columns.len(),
            descriptor.phases.len()
        )));
    }

    let phases = descriptor
        .phases
        .into_iter()
        .map(|section| build_phase(section).map_err(invalid))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Constellation {
        name: name.to_string(),
        description: descriptor.description,
        phases,
        prompt_variant: descriptor.prompts.variant.filter(|variant| !variant.trim().is_empty()),
        timing_columns: descriptor.timing.columns,
    })
}

pub(crate) fn is_yaml(path: &Path) -> bool {
    matches!(path.extension().and_then(|ext| ext.to_str()), Some("yaml" | "yml"))
}

fn build_phase(section: PhaseSection) -> Result<Phase, String> {
    let agents = resolve_agents(&section.name, &section.agents)?;

    let mut seen = BTreeSet::new();
    for agent in &agents {
        if !seen.insert(agent.role) {
            return Err(format!("phase `{}` lists role `{}` twice", section.name, agent.role));
        }
    }
    if !agents.iter().any(|agent| agent.role.is_producer()) {
        return Err(format!("phase `{}` has no producer role", section.name));
    }

    let success = section.success.unwrap_or_else(|| SuccessPredicate::derive(&agents));
    Ok(Phase {
        name: section.name,
        description: section.description,
        agents,
        capacity_update_before: section.capacity_update_before,
        capacity_update_after: section.capacity_update_after,
        success,
    })
}

/// Maps role strings to `AgentRole`. A bare `critic` reviews the first
/// producer listed in the phase.
fn resolve_agents(phase: &str, agents: &[AgentSection]) -> Result<Vec<PhaseAgent>, String> {
    let explicit: Vec<Option<AgentRole>> = agents
        .iter()
        .map(|agent| {
            if agent.role.trim().eq_ignore_ascii_case("critic") {
                Ok(None)
            } else {
                agent.role.parse::<AgentRole>().map(Some)
            }
        })
        .collect::<Result<_, _>>()
        .map_err(|error| format!("phase `{phase}`: {error}"))?;

    let first_producer = explicit.iter().flatten().copied().find(|role| role.is_producer());

    agents
        .iter()
        .zip(explicit)
        .map(|(agent, role)| {
            let role = match role {
                Some(role) => role,
                None => match first_producer {
                    Some(AgentRole::Producer2) => AgentRole::Reviewer2,
                    Some(_) => AgentRole::Reviewer1,
                    None => {
                        return Err(format!(
                            "phase `{phase}`: `critic` has no producer to review"
                        ))
                    }
                },
            };
            Ok(PhaseAgent { role, prompt_key: agent.prompt_key.clone() })
        })
        .collect()
}
