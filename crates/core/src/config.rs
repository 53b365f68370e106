use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub runner: RunnerConfig,
    pub storage: StorageConfig,
    pub workflow: WorkflowConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_tokens: u32,
}

#[derive(Clone, Debug)]
pub struct RunnerConfig {
    pub token_limit: usize,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    /// Bound on negotiation plus extraction for one phase; `0` disables it.
    pub phase_timeout_secs: u64,
    pub max_messages: usize,
}

#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub batch_size: usize,
}

#[derive(Clone, Debug)]
pub struct WorkflowConfig {
    pub business_line: String,
    pub constellation: String,
    pub constellations_dir: Option<PathBuf>,
    pub prompts_dir: PathBuf,
    pub max_items: Option<usize>,
    pub prefix_outputs: bool,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
    Ollama,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub business_line: Option<String>,
    pub constellation: Option<String>,
    pub max_items: Option<usize>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: Some("http://localhost:11434".to_string()),
                model: "llama3.1".to_string(),
                timeout_secs: 120,
                max_tokens: 4096,
            },
            runner: RunnerConfig {
                token_limit: 30_000,
                max_retries: 3,
                base_delay_ms: 1_000,
                phase_timeout_secs: 600,
                max_messages: 10,
            },
            storage: StorageConfig { batch_size: 5 },
            workflow: WorkflowConfig {
                business_line: "sbus".to_string(),
                constellation: "p1m1m2c".to_string(),
                constellations_dir: None,
                prompts_dir: PathBuf::from("prompts"),
                max_items: None,
                prefix_outputs: true,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl RunnerConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn phase_timeout(&self) -> Option<Duration> {
        (self.phase_timeout_secs > 0).then(|| Duration::from_secs(self.phase_timeout_secs))
    }
}

impl LlmProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Ollama => "ollama",
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|anthropic|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("matchline.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(api_key) = llm.api_key {
                self.llm.api_key = Some(secret_value(api_key));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_tokens) = llm.max_tokens {
                self.llm.max_tokens = max_tokens;
            }
        }

        if let Some(runner) = patch.runner {
            if let Some(token_limit) = runner.token_limit {
                self.runner.token_limit = token_limit;
            }
            if let Some(max_retries) = runner.max_retries {
                self.runner.max_retries = max_retries;
            }
            if let Some(base_delay_ms) = runner.base_delay_ms {
                self.runner.base_delay_ms = base_delay_ms;
            }
            if let Some(phase_timeout_secs) = runner.phase_timeout_secs {
                self.runner.phase_timeout_secs = phase_timeout_secs;
            }
            if let Some(max_messages) = runner.max_messages {
                self.runner.max_messages = max_messages;
            }
        }

        if let Some(storage) = patch.storage {
            if let Some(batch_size) = storage.batch_size {
                self.storage.batch_size = batch_size;
            }
        }

        if let Some(workflow) = patch.workflow {
            if let Some(business_line) = workflow.business_line {
                self.workflow.business_line = business_line;
            }
            if let Some(constellation) = workflow.constellation {
                self.workflow.constellation = constellation;
            }
            if let Some(constellations_dir) = workflow.constellations_dir {
                self.workflow.constellations_dir = Some(constellations_dir);
            }
            if let Some(prompts_dir) = workflow.prompts_dir {
                self.workflow.prompts_dir = prompts_dir;
            }
            if let Some(max_items) = workflow.max_items {
                self.workflow.max_items = Some(max_items);
            }
            if let Some(prefix_outputs) = workflow.prefix_outputs {
                self.workflow.prefix_outputs = prefix_outputs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("MATCHLINE_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("MATCHLINE_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        } else if self.llm.api_key.is_none() {
            let vendor_key = match self.llm.provider {
                LlmProvider::OpenAi => read_env("OPENAI_API_KEY"),
                LlmProvider::Anthropic => read_env("ANTHROPIC_API_KEY"),
                LlmProvider::Ollama => None,
            };
            self.llm.api_key = vendor_key.map(secret_value);
        }
        if let Some(value) = read_env("MATCHLINE_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("MATCHLINE_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("MATCHLINE_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_env("MATCHLINE_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("MATCHLINE_LLM_MAX_TOKENS") {
            self.llm.max_tokens = parse_env("MATCHLINE_LLM_MAX_TOKENS", &value)?;
        }

        if let Some(value) = read_env("MATCHLINE_RUNNER_TOKEN_LIMIT") {
            self.runner.token_limit = parse_env("MATCHLINE_RUNNER_TOKEN_LIMIT", &value)?;
        }
        if let Some(value) = read_env("MATCHLINE_RUNNER_MAX_RETRIES") {
            self.runner.max_retries = parse_env("MATCHLINE_RUNNER_MAX_RETRIES", &value)?;
        }
        if let Some(value) = read_env("MATCHLINE_RUNNER_BASE_DELAY_MS") {
            self.runner.base_delay_ms = parse_env("MATCHLINE_RUNNER_BASE_DELAY_MS", &value)?;
        }
        if let Some(value) = read_env("MATCHLINE_RUNNER_PHASE_TIMEOUT_SECS") {
            self.runner.phase_timeout_secs =
                parse_env("MATCHLINE_RUNNER_PHASE_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("MATCHLINE_RUNNER_MAX_MESSAGES") {
            self.runner.max_messages = parse_env("MATCHLINE_RUNNER_MAX_MESSAGES", &value)?;
        }

        if let Some(value) = read_env("MATCHLINE_STORAGE_BATCH_SIZE") {
            self.storage.batch_size = parse_env("MATCHLINE_STORAGE_BATCH_SIZE", &value)?;
        }

        if let Some(value) = read_env("MATCHLINE_WORKFLOW_BUSINESS_LINE") {
            self.workflow.business_line = value;
        }
        if let Some(value) = read_env("MATCHLINE_WORKFLOW_CONSTELLATION") {
            self.workflow.constellation = value;
        }
        if let Some(value) = read_env("MATCHLINE_WORKFLOW_CONSTELLATIONS_DIR") {
            self.workflow.constellations_dir = Some(PathBuf::from(value));
        }
        if let Some(value) = read_env("MATCHLINE_WORKFLOW_PROMPTS_DIR") {
            self.workflow.prompts_dir = PathBuf::from(value);
        }
        if let Some(value) = read_env("MATCHLINE_WORKFLOW_MAX_ITEMS") {
            self.workflow.max_items = Some(parse_env("MATCHLINE_WORKFLOW_MAX_ITEMS", &value)?);
        }
        if let Some(value) = read_env("MATCHLINE_WORKFLOW_PREFIX_OUTPUTS") {
            self.workflow.prefix_outputs = parse_env("MATCHLINE_WORKFLOW_PREFIX_OUTPUTS", &value)?;
        }

        let log_level =
            read_env("MATCHLINE_LOGGING_LEVEL").or_else(|| read_env("MATCHLINE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("MATCHLINE_LOGGING_FORMAT").or_else(|| read_env("MATCHLINE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(business_line) = overrides.business_line {
            self.workflow.business_line = business_line;
        }
        if let Some(constellation) = overrides.constellation {
            self.workflow.constellation = constellation;
        }
        if let Some(max_items) = overrides.max_items {
            self.workflow.max_items = Some(max_items);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_llm(&self.llm)?;
        validate_runner(&self.runner)?;
        validate_storage(&self.storage)?;
        validate_workflow(&self.workflow)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("matchline.toml"), PathBuf::from("config/matchline.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 600 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=600".to_string(),
        ));
    }

    if llm.model.trim().is_empty() {
        return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
    }

    match llm.provider {
        LlmProvider::OpenAi | LlmProvider::Anthropic => {
            let missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(format!(
                    "llm.api_key is required for the {} provider (set MATCHLINE_LLM_API_KEY or {})",
                    llm.provider.as_str(),
                    match llm.provider {
                        LlmProvider::Anthropic => "ANTHROPIC_API_KEY",
                        _ => "OPENAI_API_KEY",
                    }
                )));
            }
        }
        LlmProvider::Ollama => {
            let missing =
                llm.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.base_url is required for ollama provider".to_string(),
                ));
            }
        }
    }

    Ok(())
}

fn validate_runner(runner: &RunnerConfig) -> Result<(), ConfigError> {
    if runner.token_limit <= 1_000 {
        return Err(ConfigError::Validation(
            "runner.token_limit must be greater than 1000".to_string(),
        ));
    }

    if runner.max_retries == 0 {
        return Err(ConfigError::Validation(
            "runner.max_retries must be greater than zero".to_string(),
        ));
    }

    if runner.max_messages == 0 {
        return Err(ConfigError::Validation(
            "runner.max_messages must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_storage(storage: &StorageConfig) -> Result<(), ConfigError> {
    if storage.batch_size == 0 {
        return Err(ConfigError::Validation(
            "storage.batch_size must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_workflow(workflow: &WorkflowConfig) -> Result<(), ConfigError> {
    let business_line = workflow.business_line.trim();
    if business_line.is_empty()
        || !business_line.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-')
    {
        return Err(ConfigError::Validation(
            "workflow.business_line must be a non-empty identifier ([A-Za-z0-9_-])".to_string(),
        ));
    }

    if workflow.constellation.trim().is_empty() {
        return Err(ConfigError::Validation(
            "workflow.constellation must not be empty".to_string(),
        ));
    }

    if workflow.max_items == Some(0) {
        return Err(ConfigError::Validation(
            "workflow.max_items must be greater than zero when set".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

/// Parses an override value, naming the variable when it does not fit `T`.
fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    llm: Option<LlmPatch>,
    runner: Option<RunnerPatch>,
    storage: Option<StoragePatch>,
    workflow: Option<WorkflowPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_tokens: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct RunnerPatch {
    token_limit: Option<usize>,
    max_retries: Option<u32>,
    base_delay_ms: Option<u64>,
    phase_timeout_secs: Option<u64>,
    max_messages: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct StoragePatch {
    batch_size: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct WorkflowPatch {
    business_line: Option<String>,
    constellation: Option<String>,
    constellations_dir: Option<PathBuf>,
    prompts_dir: Option<PathBuf>,
    max_items: Option<usize>,
    prefix_outputs: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};
    use std::time::Duration;

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LlmProvider, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    const MANAGED_VARS: &[&str] = &[
        "MATCHLINE_LLM_PROVIDER",
        "MATCHLINE_LLM_API_KEY",
        "MATCHLINE_RUNNER_MAX_RETRIES",
        "MATCHLINE_STORAGE_BATCH_SIZE",
        "MATCHLINE_WORKFLOW_CONSTELLATION",
        "MATCHLINE_LOG_LEVEL",
        "MATCHLINE_LOG_FORMAT",
        "OPENAI_API_KEY",
        "TEST_MATCHLINE_KEY",
    ];

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_match_documented_values() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(MANAGED_VARS);

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;

        ensure(config.runner.token_limit == 30_000, "token limit defaults to 30000")?;
        ensure(config.runner.max_retries == 3, "max retries defaults to 3")?;
        ensure(config.runner.base_delay() == Duration::from_secs(1), "base delay defaults to 1s")?;
        ensure(config.storage.batch_size == 5, "batch size defaults to 5")?;
        ensure(config.workflow.constellation == "p1m1m2c", "default constellation")?;
        ensure(config.workflow.prefix_outputs, "outputs are prefixed by default")?;
        ensure(
            config.runner.phase_timeout() == Some(Duration::from_secs(600)),
            "phase timeout defaults to 600s",
        )
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(MANAGED_VARS);
        env::set_var("TEST_MATCHLINE_KEY", "sk-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("matchline.toml");
            fs::write(
                &path,
                r#"
[llm]
provider = "openai"
api_key = "${TEST_MATCHLINE_KEY}"
model = "gpt-4o"

[runner]
phase_timeout_secs = 0
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.llm.provider == LlmProvider::OpenAi, "provider should come from file")?;
            ensure(
                config.llm.api_key.as_ref().map(|key| key.expose_secret() == "sk-from-env")
                    == Some(true),
                "api key should be interpolated from environment",
            )?;
            ensure(config.runner.phase_timeout().is_none(), "zero disables the phase timeout")
        })();

        clear_vars(MANAGED_VARS);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(MANAGED_VARS);
        env::set_var("MATCHLINE_WORKFLOW_CONSTELLATION", "p1m1_p2m2");
        env::set_var("MATCHLINE_STORAGE_BATCH_SIZE", "8");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("matchline.toml");
            fs::write(
                &path,
                r#"
[storage]
batch_size = 2

[workflow]
constellation = "p1m1c1_p2m2c2"
business_line = "resi"

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    constellation: Some("p1m1c1m2c2".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.workflow.constellation == "p1m1c1m2c2", "override should win")?;
            ensure(config.storage.batch_size == 8, "env should win over file")?;
            ensure(config.workflow.business_line == "resi", "file should win over defaults")?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")
        })();

        clear_vars(MANAGED_VARS);
        result
    }

    #[test]
    fn provider_key_falls_back_to_vendor_variable() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(MANAGED_VARS);
        env::set_var("MATCHLINE_LLM_PROVIDER", "openai");
        env::set_var("OPENAI_API_KEY", "sk-vendor");
        env::set_var("MATCHLINE_LOG_FORMAT", "json");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.llm.api_key.as_ref().map(|key| key.expose_secret() == "sk-vendor")
                    == Some(true),
                "OPENAI_API_KEY should be used when MATCHLINE_LLM_API_KEY is unset",
            )?;
            ensure(matches!(config.logging.format, LogFormat::Json), "json log format from env")
        })();

        clear_vars(MANAGED_VARS);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(MANAGED_VARS);
        env::set_var("MATCHLINE_LLM_PROVIDER", "anthropic");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("ANTHROPIC_API_KEY")
            );
            ensure(has_message, "validation failure should name the missing key variable")
        })();

        clear_vars(MANAGED_VARS);
        result
    }

    #[test]
    fn invalid_numeric_env_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(MANAGED_VARS);
        env::set_var("MATCHLINE_RUNNER_MAX_RETRIES", "three");

        let result = (|| -> Result<(), String> {
            let error = AppConfig::load(LoadOptions::default())
                .err()
                .ok_or_else(|| "non-numeric retries should fail".to_string())?;
            ensure(
                matches!(error, ConfigError::InvalidEnvOverride { ref key, .. } if key == "MATCHLINE_RUNNER_MAX_RETRIES"),
                "error should name the offending variable",
            )
        })();

        clear_vars(MANAGED_VARS);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(MANAGED_VARS);
        env::set_var("MATCHLINE_LLM_PROVIDER", "openai");
        env::set_var("MATCHLINE_LLM_API_KEY", "sk-secret-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(!debug.contains("sk-secret-value"), "debug output should not contain api key")?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )
        })();

        clear_vars(MANAGED_VARS);
        result
    }
}
