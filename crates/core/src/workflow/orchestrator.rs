use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::Instrument;

use crate::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, RunContext};
use crate::capacity::CapacityAllocator;
use crate::domain::offer::OfferCatalog;
use crate::domain::phase::{AgentRole, Constellation, OutputKind, Phase};
use crate::domain::registration::{record_key, Registration, RegistrationId, PRIMARY_KEY};
use crate::errors::WorkflowError;
use crate::flows::{FlowContext, FlowEvent, RegistrationFlow, RegistrationState};
use crate::negotiation::{NegotiationSession, Participant, ResilientRunner, SessionRequest};
use crate::prompts::PromptLibrary;
use crate::scenario::WorkflowPaths;
use crate::store::BatchWriter;
use crate::timing::{PhaseTimer, StatsSink};
use crate::workflow::evaluate::{evaluate_phase, payload_records, PhaseEvaluation};
use crate::workflow::inputs::WorkflowInputs;
use crate::workflow::message::{build_phase_message, MessageInputs};

/// Everything the orchestrator runs with, assembled by `bootstrap` or by
/// tests.
pub struct OrchestratorParts {
    pub constellation: Constellation,
    pub prompts: PromptLibrary,
    pub inputs: WorkflowInputs,
    pub paths: WorkflowPaths,
    pub session: Arc<dyn NegotiationSession>,
    pub runner: ResilientRunner,
    pub allocator: CapacityAllocator,
    pub writer: BatchWriter,
    pub stats: StatsSink,
    pub audit: Arc<dyn AuditSink>,
    pub context: RunContext,
    pub phase_timeout: Option<Duration>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedRegistration {
    pub registration_id: RegistrationId,
    pub phase: Option<String>,
    pub error_class: String,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub constellation: String,
    pub total: usize,
    pub succeeded: usize,
    pub failed: Vec<FailedRegistration>,
    pub records_written: usize,
}

struct PhaseFailure {
    phase: Option<String>,
    error: WorkflowError,
}

/// Drives every registration through the constellation's phases, strictly in
/// input order. A failing registration is recorded and skipped; only errors
/// that make the whole run meaningless end it early.
pub struct Orchestrator {
    constellation: Constellation,
    prompts: PromptLibrary,
    inputs: WorkflowInputs,
    paths: WorkflowPaths,
    session: Arc<dyn NegotiationSession>,
    runner: ResilientRunner,
    allocator: CapacityAllocator,
    writer: BatchWriter,
    stats: StatsSink,
    audit: Arc<dyn AuditSink>,
    context: RunContext,
    phase_timeout: Option<Duration>,
    flow: RegistrationFlow,
    matches: BTreeMap<RegistrationId, Vec<Value>>,
    records_written: usize,
}

impl Orchestrator {
    pub fn new(parts: OrchestratorParts) -> Self {
        let flow = RegistrationFlow::new(FlowContext::for_constellation(&parts.constellation));
        Self {
            constellation: parts.constellation,
            prompts: parts.prompts,
            inputs: parts.inputs,
            paths: parts.paths,
            session: parts.session,
            runner: parts.runner,
            allocator: parts.allocator,
            writer: parts.writer,
            stats: parts.stats,
            audit: parts.audit,
            context: parts.context,
            phase_timeout: parts.phase_timeout,
            flow,
            matches: BTreeMap::new(),
            records_written: 0,
        }
    }

    pub fn context(&self) -> &RunContext {
        &self.context
    }

    pub fn paths(&self) -> &WorkflowPaths {
        &self.paths
    }

    pub fn constellation(&self) -> &Constellation {
        &self.constellation
    }

    pub async fn run(mut self) -> Result<RunSummary, WorkflowError> {
        let registrations = std::mem::take(&mut self.inputs.registrations);
        let total = registrations.len();
        let mut failed = Vec::new();

        tracing::info!(
            event_name = "workflow.run_started",
            run_id = %self.context.run_id,
            constellation = %self.constellation.name,
            registrations = total,
            "workflow run started"
        );

        for (position, registration) in registrations.iter().enumerate() {
            let span = tracing::info_span!(
                "registration",
                run_id = %self.context.run_id,
                registration_id = %registration.id,
                position = position + 1,
                total
            );

            let mut timer = PhaseTimer::new();
            let outcome = self.process_registration(registration, &mut timer).instrument(span).await;
            self.record_stats(&registration.id, &timer).await;

            match outcome {
                Ok(()) => {
                    tracing::info!(
                        event_name = "workflow.registration_done",
                        run_id = %self.context.run_id,
                        registration_id = %registration.id,
                        "registration processed"
                    );
                }
                Err(failure) => {
                    tracing::warn!(
                        event_name = "workflow.registration_failed",
                        run_id = %self.context.run_id,
                        registration_id = %registration.id,
                        phase = failure.phase.as_deref().unwrap_or(""),
                        error_class = failure.error.error_class(),
                        error = %failure.error,
                        "registration failed; continuing with the next one"
                    );
                    failed.push(FailedRegistration {
                        registration_id: registration.id.clone(),
                        phase: failure.phase,
                        error_class: failure.error.error_class().to_string(),
                        message: failure.error.to_string(),
                    });
                }
            }
        }

        let pending = self.writer.pending_count(None);
        if pending > 0 {
            tracing::info!(
                event_name = "workflow.flushing",
                run_id = %self.context.run_id,
                pending,
                "flushing pending writes"
            );
        }
        let flushed = self.writer.flush_all().await?;

        let summary = RunSummary {
            run_id: self.context.run_id.clone(),
            constellation: self.constellation.name.clone(),
            total,
            succeeded: total - failed.len(),
            failed,
            records_written: self.records_written,
        };
        tracing::info!(
            event_name = "workflow.run_finished",
            run_id = %summary.run_id,
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed.len(),
            records_written = summary.records_written,
            final_flush = flushed,
            "workflow run finished"
        );
        Ok(summary)
    }

    async fn process_registration(
        &mut self,
        registration: &Registration,
        timer: &mut PhaseTimer,
    ) -> Result<(), PhaseFailure> {
        let id = registration.id.clone();
        let mut state = self.flow.initial_state();
        let mut current_phase = None;

        let outcome = async {
            state = self.advance(state, FlowEvent::BeginPhase, &id)?;
            for index in 0..self.constellation.phases.len() {
                let phase = self.constellation.phases[index].clone();
                current_phase = Some(phase.name.clone());

                let span = tracing::info_span!("phase", phase = %phase.name, index);
                self.run_phase(index, &phase, registration, &mut state, timer)
                    .instrument(span)
                    .await?;
            }
            Ok::<(), WorkflowError>(())
        }
        .await;

        tracing::debug!(
            event_name = "workflow.registration_timings",
            registration_id = %id,
            timings = %timer.format_summary(),
            "registration timing breakdown"
        );

        match outcome {
            Ok(()) => Ok(()),
            Err(error) => {
                if !state.is_terminal() {
                    let _ = self.advance(state, FlowEvent::Fail, &id);
                }
                Err(PhaseFailure { phase: current_phase, error })
            }
        }
    }

    async fn run_phase(
        &mut self,
        index: usize,
        phase: &Phase,
        registration: &Registration,
        state: &mut RegistrationState,
        timer: &mut PhaseTimer,
    ) -> Result<(), WorkflowError> {
        let id = &registration.id;
        tracing::info!(
            event_name = "workflow.phase_started",
            registration_id = %id,
            phase = %phase.name,
            description = %phase.description,
            "phase started"
        );

        if phase.capacity_update_before && self.has_matches(id) {
            *state = self.advance(*state, FlowEvent::ReserveCapacity, id)?;
            let started = Instant::now();
            let consumed = self.consume_capacity(phase, id).await;
            timer.record(format!("{}_capacity_update_before", phase.name), started.elapsed());
            consumed?;
        }

        *state = self.advance(*state, FlowEvent::Negotiate, id)?;
        let started = Instant::now();
        let negotiated = self.negotiate(phase, registration, state).await;
        let elapsed = started.elapsed();
        if let Some(column) = self.constellation.timing_columns.get(index) {
            timer.record(column.clone(), elapsed);
        }
        timer.record(format!("{}_negotiation", phase.name), elapsed);
        let evaluation = negotiated?;

        if !evaluation.result.success {
            return Err(WorkflowError::NegotiationFailure(format!(
                "phase `{}` ended without an approved payload ({} of {} producer payload(s), reviewer approved: {})",
                phase.name,
                evaluation.signals.payloads_present,
                evaluation.signals.producers_expected,
                evaluation.signals.reviewer_approved || evaluation.signals.stop_reason_approved,
            )));
        }

        *state = self.advance(*state, FlowEvent::Persist, id)?;
        let started = Instant::now();
        self.persist(phase, id, &evaluation);
        timer.record(format!("{}_file_write", phase.name), started.elapsed());

        if phase.capacity_update_after && self.has_matches(id) {
            *state = self.advance(*state, FlowEvent::ConsumeCapacity, id)?;
            let started = Instant::now();
            let consumed = self.consume_capacity(phase, id).await;
            timer.record(format!("{}_capacity_update", phase.name), started.elapsed());
            consumed?;
        }

        *state = self.advance(*state, FlowEvent::CompletePhase, id)?;
        tracing::info!(
            event_name = "workflow.phase_completed",
            registration_id = %id,
            phase = %phase.name,
            seconds = elapsed.as_secs_f64(),
            "phase completed"
        );
        Ok(())
    }

    /// NEGOTIATING and EXTRACTING, bounded together by the phase timeout.
    async fn negotiate(
        &self,
        phase: &Phase,
        registration: &Registration,
        state: &mut RegistrationState,
    ) -> Result<PhaseEvaluation, WorkflowError> {
        let request = self.session_request(phase, registration).await?;

        let work = async {
            let outcome = self.runner.run(self.session.as_ref(), request).await?;
            *state = self.advance(*state, FlowEvent::Extract, &registration.id)?;
            let evaluation = evaluate_phase(phase, &outcome.transcript);
            Ok::<_, WorkflowError>((outcome, evaluation))
        };

        let (outcome, evaluation) = match self.phase_timeout {
            Some(limit) => match tokio::time::timeout(limit, work).await {
                Ok(result) => result?,
                Err(_) => {
                    return Err(WorkflowError::PhaseTimeout { seconds: limit.as_secs() });
                }
            },
            None => work.await?,
        };

        for message in &outcome.transcript.messages {
            tracing::info!(
                event_name = "negotiation.message",
                registration_id = %registration.id,
                phase = %phase.name,
                role = %message.source,
                "{}",
                message.content
            );
        }
        self.audit.emit(
            AuditEvent::new(
                &self.context,
                Some(registration.id.clone()),
                "negotiation.completed",
                AuditCategory::Negotiation,
                if evaluation.result.success { AuditOutcome::Success } else { AuditOutcome::Rejected },
            )
            .with_phase(phase.name.clone())
            .with_metadata("attempts", outcome.attempts.to_string())
            .with_metadata("truncated", outcome.truncated.to_string())
            .with_metadata("stop_reason", outcome.transcript.stop_reason.clone().unwrap_or_default()),
        );

        Ok(evaluation)
    }

    async fn session_request(
        &self,
        phase: &Phase,
        registration: &Registration,
    ) -> Result<SessionRequest, WorkflowError> {
        let participants = phase
            .agents
            .iter()
            .map(|agent| {
                self.prompts
                    .get(&agent.prompt_key)
                    .map(|prompt| Participant { role: agent.role, system_prompt: prompt.to_string() })
                    .ok_or_else(|| {
                        WorkflowError::Configuration(format!(
                            "no prompt loaded for key `{}`",
                            agent.prompt_key
                        ))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let ledger = self.allocator.snapshot().await;
        let offers: OfferCatalog = self.inputs.catalog.with_capacity(ledger.records());
        let matches = self.matches.get(&registration.id).map(Vec::as_slice).unwrap_or(&[]);
        let message = build_phase_message(
            phase,
            &MessageInputs {
                registration,
                offers: &offers,
                matches,
                incentives: self.inputs.incentives.as_ref(),
            },
        );

        Ok(SessionRequest { phase: phase.name.clone(), participants, message })
    }

    /// Routes each producer's records to its output file and caches matches
    /// for later phases of the same registration.
    fn persist(&mut self, phase: &Phase, id: &RegistrationId, evaluation: &PhaseEvaluation) {
        for (role, payload) in &evaluation.result.outputs {
            let records: Vec<Value> =
                payload_records(payload).into_iter().map(|record| keyed(record, id)).collect();
            let Some(kind) = role.output_kind() else {
                continue;
            };
            let path = match kind {
                OutputKind::Matches => self.paths.matches.clone(),
                OutputKind::Enriched => self.paths.pos.clone(),
            };

            for record in &records {
                self.writer.append(&path, record.clone());
            }
            self.records_written += records.len();
            if *role == AgentRole::Producer1 {
                self.matches.entry(id.clone()).or_default().extend(records.iter().cloned());
            }

            self.audit.emit(
                AuditEvent::new(
                    &self.context,
                    Some(id.clone()),
                    "persistence.records_buffered",
                    AuditCategory::Persistence,
                    AuditOutcome::Success,
                )
                .with_phase(phase.name.clone())
                .with_metadata("path", path.display().to_string())
                .with_metadata("records", records.len().to_string()),
            );
        }
    }

    async fn consume_capacity(&self, phase: &Phase, id: &RegistrationId) -> Result<(), WorkflowError> {
        let matches = self.matches.get(id).map(Vec::as_slice).unwrap_or(&[]);
        let result = self.allocator.increment_for_latest_match(matches).await;

        let event = match &result {
            Ok(record) => AuditEvent::new(
                &self.context,
                Some(id.clone()),
                "capacity.consumed",
                AuditCategory::Capacity,
                AuditOutcome::Success,
            )
            .with_metadata("supplier_id", record.supplier_id.to_string())
            .with_metadata("used", record.used.to_string())
            .with_metadata("capacity", record.capacity.to_string()),
            Err(error) => AuditEvent::new(
                &self.context,
                Some(id.clone()),
                "capacity.rejected",
                AuditCategory::Capacity,
                AuditOutcome::Rejected,
            )
            .with_metadata("error", error.to_string()),
        };
        self.audit.emit(event.with_phase(phase.name.clone()));

        result.map(|_| ()).map_err(WorkflowError::from)
    }

    fn has_matches(&self, id: &RegistrationId) -> bool {
        self.matches.get(id).is_some_and(|matches| !matches.is_empty())
    }

    fn advance(
        &self,
        state: RegistrationState,
        event: FlowEvent,
        id: &RegistrationId,
    ) -> Result<RegistrationState, WorkflowError> {
        self.flow
            .apply_with_audit(state, event, self.audit.as_ref(), &self.context, id)
            .map(|outcome| outcome.to)
            .map_err(WorkflowError::from)
    }

    async fn record_stats(&self, id: &RegistrationId, timer: &PhaseTimer) {
        let values: Vec<(String, f64)> = self
            .constellation
            .timing_columns
            .iter()
            .filter_map(|column| timer.seconds(column).map(|seconds| (column.clone(), seconds)))
            .collect();
        if values.is_empty() {
            return;
        }

        if let Err(error) = self.stats.record(id, &values).await {
            tracing::error!(
                event_name = "workflow.stats_write_failed",
                run_id = %self.context.run_id,
                registration_id = %id,
                path = %self.stats.path().display(),
                error = %error,
                "could not record timing row"
            );
        }
    }
}

/// Stamps the registration id on records that carry no key of their own.
fn keyed(mut record: Value, id: &RegistrationId) -> Value {
    if record_key(&record).is_none() {
        if let Value::Object(fields) = &mut record {
            fields.insert(PRIMARY_KEY.to_string(), Value::String(id.0.clone()));
        }
    }
    record
}
