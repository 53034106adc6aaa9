use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepAction {
    Search,
    Query,
    Create,
    Update,
    Verify,
}

impl StepAction {
    pub fn is_mutation(self) -> bool {
        matches!(self, Self::Create | Self::Update)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::Query => "query",
            Self::Create => "create",
            Self::Update => "update",
            Self::Verify => "verify",
        }
    }
}

impl std::str::FromStr for StepAction {
    type Err = PlanError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "search" => Ok(Self::Search),
            "query" => Ok(Self::Query),
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "verify" => Ok(Self::Verify),
            other => Err(PlanError::UnknownAction(other.to_string())),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub index: u32,
    pub agent_slug: String,
    pub action: StepAction,
    pub query: String,
    #[serde(default)]
    pub depends_on_step: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("plan has no steps")]
    Empty,
    #[error("unknown plan action `{0}`")]
    UnknownAction(String),
    #[error("step {index} appears more than once")]
    DuplicateIndex { index: u32 },
    #[error("step {index} depends on step {depends_on}, which does not run before it")]
    InvalidDependency { index: u32, depends_on: u32 },
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub steps: Vec<Step>,
}

impl Plan {
    pub fn single(step: Step) -> Self {
        Self { steps: vec![step] }
    }

    /// Orders steps by index and rejects plans whose dependencies do not point
    /// strictly backwards.
    pub fn normalize(mut self) -> Result<Self, PlanError> {
        if self.steps.is_empty() {
            return Err(PlanError::Empty);
        }
        self.steps.sort_by_key(|step| step.index);

        let mut seen = BTreeSet::new();
        for step in &self.steps {
            if !seen.insert(step.index) {
                return Err(PlanError::DuplicateIndex { index: step.index });
            }
            if let Some(depends_on) = step.depends_on_step {
                if depends_on >= step.index || !seen.contains(&depends_on) {
                    return Err(PlanError::InvalidDependency { index: step.index, depends_on });
                }
            }
        }

        Ok(self)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredRecord {
    pub module_slug: String,
    pub record_id: String,
}

/// Record ids discovered by earlier steps of one turn. Entries are only ever
/// added; a step index is written at most once.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionContext {
    discovered: BTreeMap<u32, DiscoveredRecord>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, index: u32, module_slug: impl Into<String>, record_id: impl Into<String>) {
        self.discovered.entry(index).or_insert_with(|| DiscoveredRecord {
            module_slug: module_slug.into(),
            record_id: record_id.into(),
        });
    }

    pub fn get(&self, index: u32) -> Option<&DiscoveredRecord> {
        self.discovered.get(&index)
    }

    pub fn len(&self) -> usize {
        self.discovered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.discovered.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{ExecutionContext, Plan, PlanError, Step, StepAction};

    fn step(index: u32, action: StepAction, depends_on_step: Option<u32>) -> Step {
        Step {
            index,
            agent_slug: "contacts".to_string(),
            action,
            query: String::new(),
            depends_on_step,
        }
    }

    #[test]
    fn normalize_sorts_steps_by_index() {
        let plan = Plan {
            steps: vec![step(2, StepAction::Create, Some(1)), step(1, StepAction::Search, None)],
        }
        .normalize()
        .expect("plan should normalize");

        let indexes = plan.steps.iter().map(|s| s.index).collect::<Vec<_>>();
        assert_eq!(indexes, vec![1, 2]);
    }

    #[test]
    fn normalize_rejects_forward_dependencies() {
        let result = Plan {
            steps: vec![step(1, StepAction::Search, Some(2)), step(2, StepAction::Query, None)],
        }
        .normalize();
        assert_eq!(result, Err(PlanError::InvalidDependency { index: 1, depends_on: 2 }));
    }

    #[test]
    fn normalize_rejects_duplicates_and_empty_plans() {
        assert_eq!(Plan::default().normalize(), Err(PlanError::Empty));
        let result = Plan {
            steps: vec![step(1, StepAction::Search, None), step(1, StepAction::Query, None)],
        }
        .normalize();
        assert_eq!(result, Err(PlanError::DuplicateIndex { index: 1 }));
    }

    #[test]
    fn context_entries_are_write_once() {
        let mut context = ExecutionContext::new();
        context.record(1, "contacts", "111");
        context.record(1, "contacts", "222");
        assert_eq!(context.get(1).map(|entry| entry.record_id.as_str()), Some("111"));
        assert_eq!(context.len(), 1);
    }

    #[test]
    fn actions_parse_case_insensitively() {
        assert_eq!("VERIFY".parse::<StepAction>(), Ok(StepAction::Verify));
        assert!("delete".parse::<StepAction>().is_err());
    }
}
