//! Runs a normalized plan one step at a time, threading the record each step
//! discovers into the steps that depend on it.

use std::sync::Arc;

use clientdesk_core::domain::action::{ActionKind, ActionProposal};
use clientdesk_core::domain::module::ModuleDescriptor;
use clientdesk_core::domain::plan::{DiscoveredRecord, ExecutionContext, Plan, Step, StepAction};
use clientdesk_core::domain::record::{Fields, Record};
use clientdesk_core::errors::ApplicationError;
use clientdesk_core::fetch::RecordFetcher;
use clientdesk_core::registry::ModuleRegistry;
use clientdesk_core::store::{Criteria, RemoteStore, SearchQuery, StoreError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::actions::{inject_dependency, ActionHandler};
use crate::conversation::{ChatResponse, ConfirmationState, ConversationTurn};
use crate::describe::{describe_record, describe_results};
use crate::guardrails::{GuardrailDecision, GuardrailIntent};
use crate::llm::{text_generation_error, LlmClient};
use crate::prompts::{action_prompt, answer_prompt};
use crate::protocol::parse_reply;

pub const NO_TARGET_MESSAGE: &str = "No record found to act on.";
const NO_RELATED: &[String] = &[];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Completed,
    Skipped,
    AwaitingConfirmation,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepReport {
    pub index: u32,
    pub agent_slug: String,
    pub action: StepAction,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Everything about the current request a step may need.
#[derive(Clone, Copy, Debug)]
pub struct TurnContext<'a> {
    pub active_slug: &'a str,
    pub active_record_id: Option<&'a str>,
    pub history: &'a [ConversationTurn],
    pub confirmation: ConfirmationState,
    /// Related lists to load for the active record instead of the module defaults.
    pub related: Option<&'a [String]>,
}

enum StepResult {
    Continue { segment: String, status: StepStatus, record_id: Option<String> },
    Wrote { segment: String, record_id: Option<String> },
    Halt { segment: String },
}

#[derive(Clone)]
pub struct PlanExecutor {
    store: Arc<dyn RemoteStore>,
    registry: Arc<ModuleRegistry>,
    fetcher: RecordFetcher,
    actions: ActionHandler,
    llm: Arc<dyn LlmClient>,
    search_per_page: u32,
}

impl PlanExecutor {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        registry: Arc<ModuleRegistry>,
        fetcher: RecordFetcher,
        actions: ActionHandler,
        llm: Arc<dyn LlmClient>,
        search_per_page: u32,
    ) -> Self {
        Self { store, registry, fetcher, actions, llm, search_per_page: search_per_page.max(1) }
    }

    pub async fn execute(&self, plan: &Plan, turn: TurnContext<'_>) -> Result<ChatResponse, ApplicationError> {
        let mut context = ExecutionContext::new();
        let mut segments = Vec::with_capacity(plan.steps.len());
        let mut reports = Vec::with_capacity(plan.steps.len());
        let mut writes = 0usize;

        for step in &plan.steps {
            info!(
                event_name = "agent.plan.step_started",
                step = step.index,
                agent = %step.agent_slug,
                action = step.action.as_str(),
                "plan step started"
            );
            let descriptor = self
                .registry
                .resolve(&step.agent_slug)
                .ok_or_else(|| ApplicationError::UnknownModule { slug: step.agent_slug.clone() })?;

            let dependency = match step.depends_on_step {
                Some(depends_on) => match context.get(depends_on) {
                    Some(found) => Some(found.clone()),
                    None => {
                        debug!(
                            event_name = "agent.plan.dependency_missing",
                            step = step.index,
                            depends_on,
                            "no record discovered by dependency"
                        );
                        segments.push(NO_TARGET_MESSAGE.to_string());
                        reports.push(report(step, StepStatus::Skipped, None));
                        continue;
                    }
                },
                None => None,
            };

            let outcome = match step.action {
                StepAction::Search => self.search(step, descriptor, dependency.as_ref(), turn).await,
                StepAction::Query => self.query(step, descriptor, dependency.as_ref(), turn).await,
                StepAction::Create => {
                    self.mutate(step, descriptor, ActionKind::Create, dependency.as_ref(), turn).await
                }
                StepAction::Update => {
                    self.mutate(step, descriptor, ActionKind::Update, dependency.as_ref(), turn).await
                }
                StepAction::Verify if turn.confirmation.prior_verify_confirmed => {
                    debug!(event_name = "agent.plan.verify_satisfied", step = step.index, "verify already confirmed");
                    Ok(StepResult::Continue { segment: String::new(), status: StepStatus::Completed, record_id: None })
                }
                StepAction::Verify => Ok(StepResult::Halt { segment: confirmation_message(descriptor, step) }),
            };

            // After a write, a failing step ends the plan with a report rather than an error.
            let result = match outcome {
                Ok(result) => result,
                Err(error) if writes > 0 => {
                    warn!(
                        event_name = "agent.plan.step_failed",
                        step = step.index,
                        module = %descriptor.remote_module,
                        writes,
                        error = %error,
                        "plan step failed after earlier writes"
                    );
                    segments.push(format!("Step {} could not be completed: {error}", step.index));
                    let mut failed = report(step, StepStatus::Failed, None);
                    failed.error = Some(error.to_string());
                    reports.push(failed);
                    return Ok(ChatResponse {
                        answer: segments.join("\n\n"),
                        requires_confirmation: false,
                        steps: reports,
                    });
                }
                Err(error) => return Err(error),
            };

            match result {
                StepResult::Wrote { segment, record_id } => {
                    writes += 1;
                    if let Some(id) = &record_id {
                        context.record(step.index, descriptor.slug.clone(), id.clone());
                    }
                    segments.push(segment);
                    reports.push(report(step, StepStatus::Completed, record_id));
                }
                StepResult::Continue { segment, status, record_id } => {
                    if let Some(id) = &record_id {
                        context.record(step.index, descriptor.slug.clone(), id.clone());
                    }
                    if !segment.is_empty() {
                        segments.push(segment);
                    }
                    reports.push(report(step, status, record_id));
                }
                StepResult::Halt { segment } => {
                    info!(
                        event_name = "agent.plan.awaiting_confirmation",
                        step = step.index,
                        module = %descriptor.remote_module,
                        "plan halted for confirmation"
                    );
                    segments.push(segment);
                    reports.push(report(step, StepStatus::AwaitingConfirmation, None));
                    return Ok(ChatResponse { answer: segments.join("\n\n"), requires_confirmation: true, steps: reports });
                }
            }
        }

        Ok(ChatResponse { answer: segments.join("\n\n"), requires_confirmation: false, steps: reports })
    }

    async fn search(
        &self,
        step: &Step,
        descriptor: &ModuleDescriptor,
        dependency: Option<&DiscoveredRecord>,
        turn: TurnContext<'_>,
    ) -> Result<StepResult, ApplicationError> {
        let context = match dependency {
            Some(found) => Some((found.module_slug.as_str(), found.record_id.as_str())),
            None => turn.active_record_id.map(|id| (turn.active_slug, id)),
        };

        let mut rows = Vec::new();
        if let Some(criteria) = context.and_then(|(slug, id)| self.narrowing(descriptor, slug, id)) {
            rows = self.run_search(descriptor, &SearchQuery::Criteria(criteria)).await?;
        }
        if rows.is_empty() && !step.query.trim().is_empty() {
            let word = SearchQuery::Word(step.query.trim().to_string());
            rows = self.run_search(descriptor, &word).await?;
        }

        let records = rows.into_iter().map(Record::from_fields).collect::<Vec<_>>();
        let first_id = records.first().map(|record| record.id.clone()).filter(|id| !id.is_empty());
        Ok(StepResult::Continue {
            segment: describe_results(descriptor, &records),
            status: StepStatus::Completed,
            record_id: first_id,
        })
    }

    /// Criteria restricting a search to rows linked to the context record,
    /// when this module has a direct search field pointing at its module.
    fn narrowing(&self, descriptor: &ModuleDescriptor, context_slug: &str, context_id: &str) -> Option<Criteria> {
        let field = descriptor.field(descriptor.context_search_field.as_deref()?)?;
        let context_module = self.registry.resolve(context_slug)?;
        let linked = field.reference_target()?.eq_ignore_ascii_case(&context_module.remote_module);
        linked.then(|| Criteria::equals(field.api_name.clone(), context_id))
    }

    async fn run_search(
        &self,
        descriptor: &ModuleDescriptor,
        query: &SearchQuery,
    ) -> Result<Vec<Fields>, ApplicationError> {
        match self.store.search(&descriptor.remote_module, query, self.search_per_page).await {
            Ok(rows) => Ok(rows),
            Err(StoreError::NotFound | StoreError::NoContent) => Ok(Vec::new()),
            Err(error) => Err(error.into_upstream()),
        }
    }

    async fn query(
        &self,
        step: &Step,
        descriptor: &ModuleDescriptor,
        dependency: Option<&DiscoveredRecord>,
        turn: TurnContext<'_>,
    ) -> Result<StepResult, ApplicationError> {
        let record_id = match target_id(step, descriptor, dependency, turn) {
            Ok(id) => id,
            Err(skip) => return Ok(skip),
        };

        let related = if dependency.is_none() { turn.related } else { None };
        let (record, report) = self.fetcher.fetch(&descriptor.slug, &record_id, related).await?;
        if report.is_partial() {
            debug!(
                event_name = "agent.plan.partial_context",
                step = step.index,
                skipped = report.skipped.len(),
                "answering from a partial record"
            );
        }

        let prompt = answer_prompt(descriptor, &describe_record(descriptor, &record), &step.query, turn.history);
        let reply = self.llm.complete(&prompt).await.map_err(text_generation_error)?;
        let parsed = parse_reply(&reply);

        if let Some(mut proposal) = parsed.action {
            self.check_proposal(step, descriptor, &proposal, None)?;
            if proposal.action == ActionKind::Update && proposal.record_id.is_none() {
                proposal.record_id = Some(record.id.clone());
            }
            return self.apply(step, descriptor, proposal, parsed.answer, turn).await;
        }

        Ok(StepResult::Continue { segment: parsed.answer, status: StepStatus::Completed, record_id: Some(record.id) })
    }

    async fn mutate(
        &self,
        step: &Step,
        descriptor: &ModuleDescriptor,
        kind: ActionKind,
        dependency: Option<&DiscoveredRecord>,
        turn: TurnContext<'_>,
    ) -> Result<StepResult, ApplicationError> {
        if let Some(halt) = self.gate(descriptor, kind, turn.confirmation) {
            return Ok(halt);
        }

        let record_id = match kind {
            ActionKind::Update => match target_id(step, descriptor, dependency, turn) {
                Ok(id) => Some(id),
                Err(skip) => return Ok(skip),
            },
            ActionKind::Create => None,
        };

        // Update prompts carry the current values of the target record.
        let current = match &record_id {
            Some(id) => {
                let (record, _) = self.fetcher.fetch(&descriptor.slug, id, Some(NO_RELATED)).await?;
                Some(describe_record(descriptor, &record))
            }
            None => None,
        };

        let prompt = action_prompt(
            descriptor,
            kind.as_str(),
            record_id.as_deref(),
            current.as_deref(),
            &step.query,
            turn.history,
        );
        let reply = self.llm.complete(&prompt).await.map_err(text_generation_error)?;
        let parsed = parse_reply(&reply);

        let Some(mut proposal) = parsed.action else {
            if let Some(rejected) = &parsed.rejected {
                debug!(event_name = "agent.action.block_rejected", step = step.index, error = %rejected, "action block ignored");
            }
            return Ok(StepResult::Continue { segment: parsed.answer, status: StepStatus::Skipped, record_id: None });
        };
        self.check_proposal(step, descriptor, &proposal, Some(kind))?;

        if let Some(found) = dependency {
            if let Some(dependency_module) = self.registry.resolve(&found.module_slug) {
                let field = inject_dependency(descriptor, dependency_module, &found.record_id, &mut proposal);
                debug!(
                    event_name = "agent.plan.dependency_injected",
                    step = step.index,
                    field = field.as_deref().unwrap_or("record_id"),
                    "dependency id threaded into proposal"
                );
            }
        }
        if proposal.action == ActionKind::Update && proposal.record_id.is_none() {
            proposal.record_id = record_id;
        }

        self.apply(step, descriptor, proposal, parsed.answer, turn).await
    }

    async fn apply(
        &self,
        step: &Step,
        descriptor: &ModuleDescriptor,
        proposal: ActionProposal,
        answer: String,
        turn: TurnContext<'_>,
    ) -> Result<StepResult, ApplicationError> {
        if let Some(halt) = self.gate(descriptor, proposal.action, turn.confirmation) {
            return Ok(halt);
        }

        let outcome = match self.actions.execute(&proposal, &turn.confirmation).await {
            Ok(outcome) => outcome,
            Err(ApplicationError::ConfirmationRequired { .. }) => {
                return Ok(StepResult::Halt { segment: confirmation_message(descriptor, step) });
            }
            Err(error) => return Err(error),
        };

        let verb = match outcome.action {
            ActionKind::Create => "Created",
            ActionKind::Update => "Updated",
        };
        let summary = format!("{verb} {} record {}.", outcome.module, outcome.record_id);
        let segment = if answer.is_empty() { summary } else { format!("{answer}\n{summary}") };
        let record_id = Some(outcome.record_id).filter(|id| !id.is_empty());
        Ok(StepResult::Wrote { segment, record_id })
    }

    /// A proposal may only touch the module its step was planned for, and a
    /// create or update step only accepts that same action.
    fn check_proposal(
        &self,
        step: &Step,
        descriptor: &ModuleDescriptor,
        proposal: &ActionProposal,
        expected: Option<ActionKind>,
    ) -> Result<(), ApplicationError> {
        let target = self
            .registry
            .resolve_any(&proposal.module_slug)
            .ok_or_else(|| ApplicationError::UnknownModule { slug: proposal.module_slug.clone() })?;
        if target.slug != descriptor.slug {
            warn!(
                event_name = "agent.plan.proposal_mismatch",
                step = step.index,
                planned = %descriptor.remote_module,
                proposed = %target.remote_module,
                "proposal targets another module"
            );
            return Err(ApplicationError::validation(
                descriptor.remote_module.clone(),
                format!(
                    "step {} was planned for {} but the proposed change targets {}",
                    step.index, descriptor.remote_module, target.remote_module
                ),
            ));
        }
        match expected {
            Some(kind) if kind != proposal.action => Err(ApplicationError::validation(
                descriptor.remote_module.clone(),
                format!("step {} was planned to {kind} but the proposal would {}", step.index, proposal.action),
            )),
            _ => Ok(()),
        }
    }

    /// Holds a write before any model call or remote write when it would not
    /// be allowed anyway.
    fn gate(&self, descriptor: &ModuleDescriptor, kind: ActionKind, confirmation: ConfirmationState) -> Option<StepResult> {
        let intent = GuardrailIntent::write(descriptor.remote_module.clone(), kind);
        match self.actions.guardrails().evaluate(&intent, &confirmation) {
            GuardrailDecision::Allow => None,
            GuardrailDecision::Degrade { user_message, .. } => Some(StepResult::Halt { segment: user_message }),
            GuardrailDecision::Deny { user_message, .. } => {
                Some(StepResult::Continue { segment: user_message, status: StepStatus::Skipped, record_id: None })
            }
        }
    }
}

/// The record a query or update acts on: the dependency's record when it
/// belongs to this module, else the caller's record for the active module.
/// `Err` carries the skip to report instead.
fn target_id(
    step: &Step,
    descriptor: &ModuleDescriptor,
    dependency: Option<&DiscoveredRecord>,
    turn: TurnContext<'_>,
) -> Result<String, StepResult> {
    if let Some(found) = dependency {
        if found.module_slug == descriptor.slug {
            return Ok(found.record_id.clone());
        }
        let source = step
            .depends_on_step
            .map(|index| format!("step {index}"))
            .unwrap_or_else(|| "an earlier step".to_string());
        return Err(StepResult::Continue {
            segment: format!(
                "The record found in {source} belongs to {}, so there is no {} record to {}.",
                found.module_slug,
                descriptor.slug,
                step.action.as_str()
            ),
            status: StepStatus::Skipped,
            record_id: None,
        });
    }
    if turn.active_slug.eq_ignore_ascii_case(&descriptor.slug) {
        if let Some(id) = turn.active_record_id {
            return Ok(id.to_string());
        }
    }
    Err(StepResult::Continue { segment: NO_TARGET_MESSAGE.to_string(), status: StepStatus::Skipped, record_id: None })
}

fn confirmation_message(descriptor: &ModuleDescriptor, step: &Step) -> String {
    let request = step.query.trim();
    if request.is_empty() {
        format!("Please confirm the change to {}. Reply \"Yes\" to proceed.", descriptor.remote_module)
    } else {
        format!(
            "Please confirm the change to {}: \"{request}\". Reply \"Yes\" to proceed.",
            descriptor.remote_module
        )
    }
}

fn report(step: &Step, status: StepStatus, record_id: Option<String>) -> StepReport {
    StepReport {
        index: step.index,
        agent_slug: step.agent_slug.clone(),
        action: step.action,
        status,
        record_id,
        error: None,
    }
}
