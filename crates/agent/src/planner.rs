use std::sync::Arc;

use clientdesk_core::domain::plan::{Plan, PlanError, Step, StepAction};
use clientdesk_core::errors::ApplicationError;
use clientdesk_core::registry::ModuleRegistry;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::conversation::ChatRequest;
use crate::llm::{text_generation_error, LlmClient};
use crate::prompts::planning_prompt;

#[derive(Clone)]
pub struct Planner {
    llm: Arc<dyn LlmClient>,
    registry: Arc<ModuleRegistry>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WirePlan {
    Wrapped { plan: Vec<WireStep> },
    Bare(Vec<WireStep>),
}

#[derive(Debug, Deserialize)]
struct WireStep {
    #[serde(default)]
    step: Option<Value>,
    #[serde(alias = "module")]
    agent: String,
    action: String,
    #[serde(default)]
    query: String,
    #[serde(default)]
    depends_on_step: Option<Value>,
    #[serde(default)]
    context_dependency: Option<String>,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>, registry: Arc<ModuleRegistry>) -> Self {
        Self { llm, registry }
    }

    /// One model call. Unusable output falls back to a single step on the
    /// active module; only a failed model call is an error.
    pub async fn plan(&self, request: &ChatRequest) -> Result<Plan, ApplicationError> {
        let prompt = planning_prompt(
            &self.registry,
            &request.slug,
            request.active_record_id(),
            &request.query,
            &request.history,
        );
        let reply = self.llm.complete(&prompt).await.map_err(text_generation_error)?;

        match parse_plan(&reply, &self.registry) {
            Ok(plan) => {
                debug!(event_name = "agent.plan.generated", steps = plan.steps.len(), "plan generated");
                Ok(plan)
            }
            Err(error) => {
                warn!(
                    event_name = "agent.plan.fallback",
                    error = %error,
                    "plan output unusable; falling back to a single step"
                );
                Ok(fallback_plan(request))
            }
        }
    }
}

pub fn fallback_plan(request: &ChatRequest) -> Plan {
    let slug = request.slug.trim().to_ascii_lowercase();
    let action = if request.active_record_id().is_some() { StepAction::Query } else { StepAction::Search };
    Plan::single(Step {
        index: 1,
        agent_slug: slug,
        action,
        query: request.query.clone(),
        depends_on_step: None,
    })
}

#[derive(Debug, thiserror::Error)]
pub enum PlanParseError {
    #[error("plan is not valid JSON: {0}")]
    Json(String),
    #[error("plan names unknown module `{0}`")]
    UnknownModule(String),
    #[error("invalid dependency reference `{0}`")]
    Dependency(String),
    #[error(transparent)]
    Plan(#[from] PlanError),
}

pub fn parse_plan(reply: &str, registry: &ModuleRegistry) -> Result<Plan, PlanParseError> {
    let cleaned = reply.replace("```json", "").replace("```", "");
    let wire = serde_json::from_str::<WirePlan>(cleaned.trim())
        .map_err(|error| PlanParseError::Json(error.to_string()))?;
    let wire_steps = match wire {
        WirePlan::Wrapped { plan } | WirePlan::Bare(plan) => plan,
    };

    let mut steps = Vec::with_capacity(wire_steps.len());
    for (position, wire_step) in wire_steps.into_iter().enumerate() {
        let fallback_index = u32::try_from(position + 1).unwrap_or(u32::MAX);
        let index = wire_step.step.as_ref().and_then(step_number).unwrap_or(fallback_index);
        let action = wire_step.action.parse::<StepAction>()?;
        let agent_slug = registry
            .resolve_any(&wire_step.agent)
            .map(|descriptor| descriptor.slug.clone())
            .ok_or_else(|| PlanParseError::UnknownModule(wire_step.agent.clone()))?;

        let depends_on_step = match (&wire_step.depends_on_step, &wire_step.context_dependency) {
            (Some(Value::Null) | None, None) => None,
            (Some(value), _) if !value.is_null() => {
                Some(step_number(value).ok_or_else(|| PlanParseError::Dependency(value.to_string()))?)
            }
            (_, Some(reference)) => Some(
                step_number(&Value::String(reference.clone()))
                    .ok_or_else(|| PlanParseError::Dependency(reference.clone()))?,
            ),
            _ => None,
        };

        steps.push(Step { index, agent_slug, action, query: wire_step.query, depends_on_step });
    }

    Ok(Plan { steps }.normalize()?)
}

/// Accepts `2`, `"2"` and the `"step_2_id"` reference form.
fn step_number(value: &Value) -> Option<u32> {
    match value {
        Value::Number(number) => number.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(text) => {
            let trimmed = text.trim();
            let digits = trimmed
                .strip_prefix("step_")
                .map(|rest| rest.trim_end_matches("_id"))
                .unwrap_or(trimmed);
            digits.parse().ok()
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use clientdesk_core::domain::plan::StepAction;
    use clientdesk_core::registry::ModuleRegistry;

    use super::{parse_plan, PlanParseError, Planner};
    use crate::conversation::ChatRequest;
    use crate::llm::ScriptedLlm;

    fn registry() -> Arc<ModuleRegistry> {
        Arc::new(ModuleRegistry::builtin().expect("registry"))
    }

    #[test]
    fn legacy_context_dependency_is_understood() {
        let plan = parse_plan(
            r#"```json
{"plan": [
  {"step": 1, "agent": "contacts", "action": "search", "query": "Jane Doe"},
  {"step": 2, "agent": "Tasks", "action": "create", "query": "call Jane", "context_dependency": "step_1_id"}
]}
```"#,
            &registry(),
        )
        .expect("plan parses");

        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[1].agent_slug, "tasks");
        assert_eq!(plan.steps[1].action, StepAction::Create);
        assert_eq!(plan.steps[1].depends_on_step, Some(1));
    }

    #[test]
    fn steps_are_reordered_by_index() {
        let plan = parse_plan(
            r#"[{"step": "2", "agent": "deals", "action": "query", "query": "b", "depends_on_step": 1},
                {"step": 1, "agent": "accounts", "action": "search", "query": "a"}]"#,
            &registry(),
        )
        .expect("plan parses");
        assert_eq!(plan.steps.iter().map(|s| s.index).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn forward_dependencies_and_unknown_modules_are_rejected() {
        let forward = parse_plan(
            r#"{"plan": [{"step": 1, "agent": "deals", "action": "query", "query": "x", "depends_on_step": 2},
                         {"step": 2, "agent": "deals", "action": "query", "query": "y"}]}"#,
            &registry(),
        );
        assert!(matches!(forward, Err(PlanParseError::Plan(_))));

        let unknown = parse_plan(
            r#"{"plan": [{"step": 1, "agent": "widgets", "action": "query", "query": "x"}]}"#,
            &registry(),
        );
        assert!(matches!(unknown, Err(PlanParseError::UnknownModule(ref name)) if name == "widgets"));
    }

    #[tokio::test]
    async fn unusable_output_falls_back_to_query_on_active_record() {
        let llm = Arc::new(ScriptedLlm::new(["I am not JSON"]));
        let planner = Planner::new(llm, registry());
        let request = ChatRequest::new("deals", Some("4000000000100"), "give me a brief");

        let plan = planner.plan(&request).await.expect("fallback plan");
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].action, StepAction::Query);
        assert_eq!(plan.steps[0].agent_slug, "deals");
    }

    #[tokio::test]
    async fn empty_plan_without_record_falls_back_to_search() {
        let llm = Arc::new(ScriptedLlm::new([r#"{"plan": []}"#]));
        let planner = Planner::new(llm, registry());
        let plan = planner.plan(&ChatRequest::new("contacts", None, "Jane Doe")).await.expect("plan");

        assert_eq!(plan.steps[0].action, StepAction::Search);
        assert_eq!(plan.steps[0].query, "Jane Doe");
    }

    #[tokio::test]
    async fn model_failure_is_an_upstream_error() {
        let planner = Planner::new(Arc::new(ScriptedLlm::default()), registry());
        let result = planner.plan(&ChatRequest::new("deals", None, "x")).await;
        assert!(matches!(result, Err(clientdesk_core::errors::ApplicationError::Upstream { .. })));
    }
}
