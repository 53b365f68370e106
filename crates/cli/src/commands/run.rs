use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use matchline_agent::{build_client, GroupChatSettings, RoundRobinSession};
use matchline_core::config::{AppConfig, ConfigOverrides, LoadOptions};
use matchline_core::{
    bootstrap, AuditSink, NegotiationSession, TracingAuditSink, WorkflowError, WorkflowPaths,
};

use crate::commands::{runtime, CommandResult};

#[derive(Debug, Clone, Default, Args)]
pub struct RunArgs {
    #[arg(long, help = "Scenario descriptor naming every input and output file")]
    pub scenario: Option<PathBuf>,
    #[arg(long, conflicts_with = "scenario", requires = "offers", help = "Registrations JSON list")]
    pub registrations: Option<PathBuf>,
    #[arg(long, conflicts_with = "scenario", requires = "registrations", help = "Supplier offer catalog JSON")]
    pub offers: Option<PathBuf>,
    #[arg(long, help = "Capacity file (defaults into the results directory)")]
    pub capacity: Option<PathBuf>,
    #[arg(long, help = "Optional incentives JSON handed to the enrichment phase")]
    pub incentives: Option<PathBuf>,
    #[arg(long, default_value = "results", help = "Output directory when running from direct file arguments")]
    pub results_dir: PathBuf,
    #[arg(long, help = "Constellation name")]
    pub constellation: Option<String>,
    #[arg(long, help = "Model identifier passed to the provider")]
    pub model: Option<String>,
    #[arg(long, help = "Business line selecting the prompt set")]
    pub business_line: Option<String>,
    #[arg(long, help = "Process at most this many registrations")]
    pub max_items: Option<usize>,
}

impl RunArgs {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            llm_model: self.model.clone(),
            business_line: self.business_line.clone(),
            constellation: self.constellation.clone(),
            max_items: self.max_items,
            ..ConfigOverrides::default()
        }
    }

    pub fn paths(&self) -> Result<WorkflowPaths, WorkflowError> {
        let paths = match (&self.scenario, &self.registrations, &self.offers) {
            (Some(scenario), _, _) => WorkflowPaths::from_scenario(scenario)?,
            (None, Some(registrations), Some(offers)) => {
                WorkflowPaths::from_inputs(registrations.clone(), offers.clone(), &self.results_dir)
            }
            _ => {
                return Err(WorkflowError::Configuration(
                    "either --scenario or both --registrations and --offers are required".to_string(),
                ))
            }
        };
        let paths = match &self.capacity {
            Some(capacity) => paths.with_capacity(capacity.clone()),
            None => paths,
        };
        Ok(match &self.incentives {
            Some(incentives) => paths.with_incentives(Some(incentives.clone())),
            None => paths,
        })
    }
}

pub fn run(args: RunArgs, config_path: Option<PathBuf>) -> CommandResult {
    let config = match AppConfig::load(LoadOptions {
        config_path,
        overrides: args.overrides(),
        ..LoadOptions::default()
    }) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "run",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };
    crate::init_logging(&config);

    let client = match build_client(&config.llm) {
        Ok(client) => client,
        Err(error) => {
            return CommandResult::failure("run", "llm_client", format!("{error:#}"), 2);
        }
    };
    let session = RoundRobinSession::new(
        client,
        GroupChatSettings {
            model: config.llm.model.clone(),
            max_tokens: config.llm.max_tokens,
            max_messages: config.runner.max_messages,
        },
    );

    execute(&config, &args, Arc::new(session), Arc::new(TracingAuditSink))
}

/// Runs the workflow against an already-built negotiation session.
pub fn execute(
    config: &AppConfig,
    args: &RunArgs,
    session: Arc<dyn NegotiationSession>,
    audit: Arc<dyn AuditSink>,
) -> CommandResult {
    let paths = match args.paths() {
        Ok(paths) => paths,
        Err(error) => return CommandResult::from_workflow_error("run", &error),
    };
    let runtime = match runtime("run") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let orchestrator = bootstrap(config, paths, session, audit).await?;
        orchestrator.run().await
    });

    match result {
        Ok(summary) => {
            let message = format!(
                "processed {} registration(s): {} succeeded, {} failed",
                summary.total,
                summary.succeeded,
                summary.failed.len()
            );
            CommandResult::success_with("run", message, serde_json::to_value(&summary).ok())
        }
        Err(error) => {
            tracing::error!(
                event_name = "system.run.aborted",
                error_class = error.error_class(),
                error = %error,
                "workflow run aborted"
            );
            CommandResult::from_workflow_error("run", &error)
        }
    }
}
