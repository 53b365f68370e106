pub mod config;
pub mod constellations;
pub mod reset_capacity;
pub mod run;
pub mod scenarios;

use matchline_core::WorkflowError;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        Self::success_with(command, message, None)
    }

    pub fn success_with(command: &str, message: impl Into<String>, details: Option<Value>) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
            details,
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
            details: None,
        };
        Self { exit_code, output: serialize_payload(payload) }
    }

    pub fn from_workflow_error(command: &str, error: &WorkflowError) -> Self {
        Self::failure(command, error.error_class(), error.to_string(), exit_code_for(error))
    }
}

/// 2 configuration, 3 data format, 4 runtime or persistence.
pub fn exit_code_for(error: &WorkflowError) -> u8 {
    match error {
        WorkflowError::ConfigNotFound(_) | WorkflowError::Configuration(_) => 2,
        WorkflowError::DataFormat(_) => 3,
        WorkflowError::CapacityExceeded { .. }
        | WorkflowError::NegotiationFailure(_)
        | WorkflowError::RateLimited { .. }
        | WorkflowError::Persistence(_)
        | WorkflowError::PhaseTimeout { .. } => 4,
    }
}

pub(crate) fn runtime(command: &str) -> Result<tokio::runtime::Runtime, CommandResult> {
    tokio::runtime::Builder::new_current_thread().enable_all().build().map_err(|error| {
        CommandResult::failure(
            command,
            "runtime_init",
            format!("failed to initialize async runtime: {error}"),
            4,
        )
    })
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}
