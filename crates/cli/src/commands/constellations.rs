use std::path::PathBuf;

use matchline_core::config::{AppConfig, LoadOptions};
use matchline_core::workflow::constellation_registry;
use matchline_core::WorkflowError;
use serde_json::json;

use crate::commands::CommandResult;

pub fn run(config_path: Option<PathBuf>) -> CommandResult {
    let config = match AppConfig::load(LoadOptions { config_path, ..LoadOptions::default() }) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "constellations",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let constellations = match constellation_registry(&config)
        .and_then(|registry| registry.load_all().map_err(WorkflowError::from))
    {
        Ok(constellations) => constellations,
        Err(error) => return CommandResult::from_workflow_error("constellations", &error),
    };

    let listing: Vec<_> = constellations
        .iter()
        .map(|constellation| {
            json!({
                "name": constellation.name,
                "description": constellation.description,
                "phases": constellation.phases.iter().map(|phase| phase.name.as_str()).collect::<Vec<_>>(),
                "timing_columns": constellation.timing_columns,
                "selected": constellation.name == config.workflow.constellation,
            })
        })
        .collect();

    CommandResult::success_with(
        "constellations",
        format!("{} constellation(s) available", listing.len()),
        Some(json!(listing)),
    )
}
