use std::path::{Path, PathBuf};

use matchline_core::config::{AppConfig, LoadOptions};
use matchline_core::scenario::list_scenarios;
use matchline_core::{WorkflowError, WorkflowPaths};
use serde_json::{json, Value};

use crate::commands::CommandResult;

/// Scenario files in `dir`, or in `data/<business_line>/scenarios` when no
/// directory is given, each with the inputs it resolves to. A scenario that
/// does not load is listed with its error instead of failing the command.
pub fn run(dir: Option<PathBuf>, config_path: Option<PathBuf>) -> CommandResult {
    let dir = match dir {
        Some(dir) => dir,
        None => match AppConfig::load(LoadOptions { config_path, ..LoadOptions::default() }) {
            Ok(config) => default_dir(&config.workflow.business_line),
            Err(error) => {
                return CommandResult::failure(
                    "scenarios",
                    "config_validation",
                    format!("configuration issue: {error}"),
                    2,
                );
            }
        },
    };

    let scenarios = match list_scenarios(&dir) {
        Ok(scenarios) => scenarios,
        Err(error) => return CommandResult::from_workflow_error("scenarios", &WorkflowError::from(error)),
    };

    let listing: Vec<Value> = scenarios.iter().map(|path| describe(path)).collect();
    CommandResult::success_with(
        "scenarios",
        format!("{} scenario(s) in {}", listing.len(), dir.display()),
        Some(json!(listing)),
    )
}

fn default_dir(business_line: &str) -> PathBuf {
    Path::new("data").join(business_line).join("scenarios")
}

fn describe(path: &Path) -> Value {
    let name = path.file_stem().map(|stem| stem.to_string_lossy().into_owned()).unwrap_or_default();
    match WorkflowPaths::from_scenario(path) {
        Ok(paths) => json!({
            "name": name,
            "path": path.display().to_string(),
            "registrations": paths.registrations.display().to_string(),
            "offers": paths.offers.display().to_string(),
            "capacity": paths.capacity.display().to_string(),
        }),
        Err(error) => json!({
            "name": name,
            "path": path.display().to_string(),
            "error": error.to_string(),
        }),
    }
}
