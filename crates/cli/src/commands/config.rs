use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use matchline_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use serde_json::{json, Map, Value};

use crate::commands::CommandResult;

/// Effective configuration with the layer each value came from. Secrets are
/// reported only as set or unset.
pub fn run(config_path: Option<PathBuf>) -> CommandResult {
    let config = match AppConfig::load(LoadOptions {
        config_path: config_path.clone(),
        ..LoadOptions::default()
    }) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "config",
                "config_validation",
                format!("config validation failed: {error}"),
                2,
            );
        }
    };

    let file_path = detect_config_path(config_path.as_deref());
    let file_doc = load_config_file_doc(file_path.as_deref());
    let sources = Sources { file_doc: file_doc.as_ref(), file_path: file_path.as_deref() };

    let api_key = match &config.llm.api_key {
        Some(key) if !key.expose_secret().trim().is_empty() => "<redacted>",
        Some(_) => "<empty>",
        None => "<unset>",
    };

    let entries: Vec<(&str, Option<&str>, Value)> = vec![
        ("llm.provider", Some("MATCHLINE_LLM_PROVIDER"), json!(config.llm.provider.as_str())),
        ("llm.api_key", Some("MATCHLINE_LLM_API_KEY"), json!(api_key)),
        ("llm.base_url", Some("MATCHLINE_LLM_BASE_URL"), json!(config.llm.base_url)),
        ("llm.model", Some("MATCHLINE_LLM_MODEL"), json!(config.llm.model)),
        ("llm.timeout_secs", Some("MATCHLINE_LLM_TIMEOUT_SECS"), json!(config.llm.timeout_secs)),
        ("llm.max_tokens", Some("MATCHLINE_LLM_MAX_TOKENS"), json!(config.llm.max_tokens)),
        ("runner.token_limit", Some("MATCHLINE_RUNNER_TOKEN_LIMIT"), json!(config.runner.token_limit)),
        ("runner.max_retries", Some("MATCHLINE_RUNNER_MAX_RETRIES"), json!(config.runner.max_retries)),
        ("runner.base_delay_ms", Some("MATCHLINE_RUNNER_BASE_DELAY_MS"), json!(config.runner.base_delay_ms)),
        (
            "runner.phase_timeout_secs",
            Some("MATCHLINE_RUNNER_PHASE_TIMEOUT_SECS"),
            json!(config.runner.phase_timeout_secs),
        ),
        ("runner.max_messages", Some("MATCHLINE_RUNNER_MAX_MESSAGES"), json!(config.runner.max_messages)),
        ("storage.batch_size", Some("MATCHLINE_STORAGE_BATCH_SIZE"), json!(config.storage.batch_size)),
        (
            "workflow.business_line",
            Some("MATCHLINE_WORKFLOW_BUSINESS_LINE"),
            json!(config.workflow.business_line),
        ),
        (
            "workflow.constellation",
            Some("MATCHLINE_WORKFLOW_CONSTELLATION"),
            json!(config.workflow.constellation),
        ),
        (
            "workflow.constellations_dir",
            Some("MATCHLINE_WORKFLOW_CONSTELLATIONS_DIR"),
            json!(config.workflow.constellations_dir.as_ref().map(|dir| dir.display().to_string())),
        ),
        (
            "workflow.prompts_dir",
            Some("MATCHLINE_WORKFLOW_PROMPTS_DIR"),
            json!(config.workflow.prompts_dir.display().to_string()),
        ),
        ("workflow.max_items", Some("MATCHLINE_WORKFLOW_MAX_ITEMS"), json!(config.workflow.max_items)),
        (
            "workflow.prefix_outputs",
            Some("MATCHLINE_WORKFLOW_PREFIX_OUTPUTS"),
            json!(config.workflow.prefix_outputs),
        ),
        ("logging.level", Some("MATCHLINE_LOGGING_LEVEL"), json!(config.logging.level)),
        ("logging.format", Some("MATCHLINE_LOGGING_FORMAT"), json!(config.logging.format)),
    ];

    let mut details = Map::new();
    for (key, env_key, value) in entries {
        details.insert(key.to_string(), json!({ "value": value, "source": sources.of(key, env_key) }));
    }

    CommandResult::success_with(
        "config",
        "effective config (source precedence: env > file > default)",
        Some(Value::Object(details)),
    )
}

fn detect_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.exists().then(|| path.to_path_buf());
    }

    [PathBuf::from("matchline.toml"), PathBuf::from("config/matchline.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<toml::Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<toml::Value>().ok()
}

struct Sources<'a> {
    file_doc: Option<&'a toml::Value>,
    file_path: Option<&'a Path>,
}

impl Sources<'_> {
    fn of(&self, key_path: &str, env_key: Option<&str>) -> String {
        if let Some(env_key) = env_key {
            if env::var_os(env_key).is_some() {
                return format!("env ({env_key})");
            }
        }

        if let Some(doc) = self.file_doc {
            if contains_path(doc, key_path) {
                let file_path = self
                    .file_path
                    .map(|path| path.display().to_string())
                    .unwrap_or_else(|| "config file".to_string());
                return format!("file ({file_path})");
            }
        }

        "default".to_string()
    }
}

fn contains_path(root: &toml::Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}
