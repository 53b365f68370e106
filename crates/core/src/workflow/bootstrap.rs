use std::sync::Arc;

use crate::audit::{AuditSink, RunContext};
use crate::capacity::CapacityAllocator;
use crate::config::AppConfig;
use crate::constellation::ConstellationRegistry;
use crate::errors::WorkflowError;
use crate::negotiation::{NegotiationSession, ResilientRunner, RetryPolicy};
use crate::prompts::PromptLibrary;
use crate::scenario::{output_prefix, WorkflowPaths};
use crate::store::{BatchWriter, JsonListStore};
use crate::timing::StatsSink;
use crate::workflow::inputs::WorkflowInputs;
use crate::workflow::orchestrator::{Orchestrator, OrchestratorParts};

/// Registry of built-in constellations plus the configured descriptor
/// directory, if any.
pub fn constellation_registry(config: &AppConfig) -> Result<ConstellationRegistry, WorkflowError> {
    let registry = ConstellationRegistry::builtin();
    match &config.workflow.constellations_dir {
        Some(dir) => Ok(registry.with_dir(dir)?),
        None => Ok(registry),
    }
}

/// Resolves everything a run needs before the first registration is touched.
/// Any error here is a startup failure and aborts the run.
pub async fn bootstrap(
    config: &AppConfig,
    paths: WorkflowPaths,
    session: Arc<dyn NegotiationSession>,
    audit: Arc<dyn AuditSink>,
) -> Result<Orchestrator, WorkflowError> {
    let workflow = &config.workflow;
    let constellation = constellation_registry(config)?.load(&workflow.constellation)?;
    let context = RunContext::new(&constellation.name);
    tracing::info!(
        event_name = "system.bootstrap.start",
        run_id = %context.run_id,
        constellation = %constellation.name,
        business_line = %workflow.business_line,
        model = %config.llm.model,
        "starting workflow bootstrap"
    );

    let paths = if workflow.prefix_outputs {
        paths.prefixed(&output_prefix(
            &constellation.name,
            &workflow.business_line,
            &config.llm.model,
        ))
    } else {
        paths
    };

    let prompts = PromptLibrary::load(&workflow.prompts_dir, &workflow.business_line, &constellation)?;
    let inputs = WorkflowInputs::load(&paths, workflow.max_items).await?;

    let allocator =
        CapacityAllocator::open(paths.capacity.clone(), &inputs.catalog, context.clone()).await?;
    let stats =
        StatsSink::init(paths.stats.clone(), &constellation.timing_columns, context.clone()).await?;
    let writer = BatchWriter::auto(JsonListStore::new(context.clone()), config.storage.batch_size);
    let runner = ResilientRunner::new(
        RetryPolicy { max_retries: config.runner.max_retries, base_delay: config.runner.base_delay() },
        config.runner.token_limit,
        context.clone(),
    );

    tracing::info!(
        event_name = "system.bootstrap.ready",
        run_id = %context.run_id,
        registrations = inputs.registrations.len(),
        prompts = prompts.len(),
        matches = %paths.matches.display(),
        pos = %paths.pos.display(),
        stats = %paths.stats.display(),
        capacity = %paths.capacity.display(),
        "workflow bootstrap complete"
    );

    Ok(Orchestrator::new(OrchestratorParts {
        constellation,
        prompts,
        inputs,
        paths,
        session,
        runner,
        allocator,
        writer,
        stats,
        audit,
        context,
        phase_timeout: config.runner.phase_timeout(),
    }))
}
