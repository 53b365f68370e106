use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::constellation::is_yaml;

const RESULTS_DIR: &str = "results";

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("scenario file was not found: `{0}`")]
    NotFound(PathBuf),
    #[error("could not read scenario `{path}`: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not parse scenario `{path}`: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

#[derive(Debug, Deserialize)]
struct ScenarioFile {
    registrations: PathBuf,
    offers: PathBuf,
    capacity: Option<PathBuf>,
    incentives: Option<PathBuf>,
    #[serde(default)]
    output: OutputSection,
}

#[derive(Debug, Default, Deserialize)]
struct OutputSection {
    matches: Option<PathBuf>,
    pos: Option<PathBuf>,
    stats: Option<PathBuf>,
}

/// Every file one run reads or writes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkflowPaths {
    pub registrations: PathBuf,
    pub offers: PathBuf,
    pub capacity: PathBuf,
    pub incentives: Option<PathBuf>,
    pub matches: PathBuf,
    pub pos: PathBuf,
    pub stats: PathBuf,
}

impl WorkflowPaths {
    /// Inputs as given; capacity and outputs default into `results_dir`.
    pub fn from_inputs(registrations: PathBuf, offers: PathBuf, results_dir: &Path) -> Self {
        Self {
            registrations,
            offers,
            capacity: results_dir.join("capacity.json"),
            incentives: None,
            matches: results_dir.join("matches.json"),
            pos: results_dir.join("pos.json"),
            stats: results_dir.join("stats.csv"),
        }
    }

    /// Scenario inputs resolve against the scenario's base directory (the
    /// parent of the directory holding the file). Outputs keep only their
    /// file name and land in `<base>/results/`.
    pub fn from_scenario(path: &Path) -> Result<Self, ScenarioError> {
        if !path.is_file() {
            return Err(ScenarioError::NotFound(path.to_path_buf()));
        }
        let text = fs::read_to_string(path)
            .map_err(|source| ScenarioError::Read { path: path.to_path_buf(), source })?;
        let scenario: ScenarioFile = serde_yaml::from_str(&text)
            .map_err(|source| ScenarioError::Parse { path: path.to_path_buf(), source })?;

        let base = scenario_base(path);
        let results = base.join(RESULTS_DIR);
        let output = |name: Option<PathBuf>, default: &str| {
            let file_name = name
                .as_deref()
                .and_then(Path::file_name)
                .map(|name| name.to_os_string())
                .unwrap_or_else(|| default.into());
            results.join(file_name)
        };

        Ok(Self {
            registrations: base.join(scenario.registrations),
            offers: base.join(scenario.offers),
            capacity: scenario
                .capacity
                .map(|capacity| base.join(capacity))
                .unwrap_or_else(|| results.join("capacity.json")),
            incentives: scenario.incentives.map(|incentives| base.join(incentives)),
            matches: output(scenario.output.matches, "matches.json"),
            pos: output(scenario.output.pos, "pos.json"),
            stats: output(scenario.output.stats, "stats.csv"),
        })
    }

    pub fn with_capacity(mut self, capacity: PathBuf) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_incentives(mut self, incentives: Option<PathBuf>) -> Self {
        if incentives.is_some() {
            self.incentives = incentives;
        }
        self
    }

    /// Prefixes the three output file names. Inputs and capacity are shared
    /// between runs and stay as they are.
    pub fn prefixed(mut self, prefix: &str) -> Self {
        for path in [&mut self.matches, &mut self.pos, &mut self.stats] {
            if let Some(name) = path.file_name().and_then(|name| name.to_str()) {
                let renamed = format!("{prefix}{name}");
                path.set_file_name(renamed);
            }
        }
        self
    }
}

/// `<constellation>_<business_line>_<model>_`, safe to use in a file name.
pub fn output_prefix(constellation: &str, business_line: &str, model: &str) -> String {
    let model: String = model
        .chars()
        .map(|ch| if matches!(ch, '/' | '\\' | ':') { '-' } else { ch })
        .collect();
    format!("{constellation}_{business_line}_{model}_")
}

/// Scenario files (`*.yaml`, `*.yml`) in a directory, sorted by path.
pub fn list_scenarios(dir: &Path) -> Result<Vec<PathBuf>, ScenarioError> {
    let entries =
        fs::read_dir(dir).map_err(|source| ScenarioError::Read { path: dir.to_path_buf(), source })?;

    let mut scenarios = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|source| ScenarioError::Read { path: dir.to_path_buf(), source })?
            .path();
        if is_yaml(&path) {
            scenarios.push(path);
        }
    }
    scenarios.sort();
    Ok(scenarios)
}

fn scenario_base(path: &Path) -> PathBuf {
    path.parent()
        .and_then(Path::parent)
        .map(Path::to_path_buf)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::{Path, PathBuf};

    use crate::scenario::{list_scenarios, output_prefix, ScenarioError, WorkflowPaths};

    fn write_scenario(root: &Path, body: &str) -> PathBuf {
        let dir = root.join("scenarios");
        fs::create_dir_all(&dir).expect("create scenarios dir");
        let path = dir.join("overlap_only.yaml");
        fs::write(&path, body).expect("write scenario");
        path
    }

    #[test]
    fn relative_paths_resolve_against_the_scenario_base() {
        let root = tempfile::tempdir().expect("tempdir");
        let path = write_scenario(
            root.path(),
            r#"
registrations: registrations/overlap_only.json
offers: offers/overlap_only.json
incentives: incentives.json
output:
  matches: somewhere/else/matches.json
  pos: pos.json
  stats: stats.csv
"#,
        );

        let paths = WorkflowPaths::from_scenario(&path).expect("load scenario");

        assert_eq!(paths.registrations, root.path().join("registrations/overlap_only.json"));
        assert_eq!(paths.offers, root.path().join("offers/overlap_only.json"));
        assert_eq!(paths.incentives, Some(root.path().join("incentives.json")));
        assert_eq!(paths.matches, root.path().join("results/matches.json"));
        assert_eq!(paths.capacity, root.path().join("results/capacity.json"));
    }

    #[test]
    fn missing_output_section_uses_default_names() {
        let root = tempfile::tempdir().expect("tempdir");
        let path = write_scenario(
            root.path(),
            "registrations: r.json\noffers: o.json\ncapacity: state/cap.json\n",
        );

        let paths = WorkflowPaths::from_scenario(&path).expect("load scenario");

        assert_eq!(paths.capacity, root.path().join("state/cap.json"));
        assert_eq!(paths.stats, root.path().join("results/stats.csv"));
        assert_eq!(paths.incentives, None);
    }

    #[test]
    fn missing_or_malformed_scenarios_are_reported() {
        let root = tempfile::tempdir().expect("tempdir");
        assert!(matches!(
            WorkflowPaths::from_scenario(&root.path().join("absent.yaml")),
            Err(ScenarioError::NotFound(_))
        ));

        let path = write_scenario(root.path(), "registrations: [1, 2]");
        assert!(matches!(WorkflowPaths::from_scenario(&path), Err(ScenarioError::Parse { .. })));
    }

    #[test]
    fn prefix_touches_outputs_only() {
        let paths = WorkflowPaths::from_inputs("r.json".into(), "o.json".into(), Path::new("out"))
            .prefixed(&output_prefix("p1m1_p2m2", "sbus", "org/model:7b"));

        assert_eq!(paths.matches, Path::new("out/p1m1_p2m2_sbus_org-model-7b_matches.json"));
        assert_eq!(paths.stats, Path::new("out/p1m1_p2m2_sbus_org-model-7b_stats.csv"));
        assert_eq!(paths.capacity, Path::new("out/capacity.json"));
        assert_eq!(paths.registrations, Path::new("r.json"));
    }

    #[test]
    fn scenario_listing_is_sorted_and_filtered() {
        let root = tempfile::tempdir().expect("tempdir");
        for name in ["b.yaml", "a.yml", "legacy.toml", "readme.md"] {
            fs::write(root.path().join(name), "").expect("write");
        }

        let listed = list_scenarios(root.path()).expect("list");
        assert_eq!(listed, vec![root.path().join("a.yml"), root.path().join("b.yaml")]);
    }
}
