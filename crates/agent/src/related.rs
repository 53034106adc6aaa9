//! Model-driven choice of the related lists a question needs.
//!
//! The model may only pick from the module's own candidates. Anything it
//! invents is dropped, and an empty or unreadable reply leaves the fetch on
//! the module defaults.

use std::sync::Arc;

use clientdesk_core::domain::module::ModuleDescriptor;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::llm::LlmClient;
use crate::prompts::related_selection_prompt;

#[derive(Clone)]
pub struct RelatedSelector {
    llm: Arc<dyn LlmClient>,
}

impl RelatedSelector {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// `None` means "use the defaults"; selection never fails a turn.
    pub async fn select(&self, descriptor: &ModuleDescriptor, query: &str) -> Option<Vec<String>> {
        if descriptor.related_candidates().is_empty() {
            return None;
        }

        let reply = match self.llm.complete(&related_selection_prompt(descriptor, query)).await {
            Ok(reply) => reply,
            Err(error) => {
                warn!(
                    event_name = "agent.related.selection_failed",
                    module = %descriptor.remote_module,
                    error = %format!("{error:#}"),
                    "related list selection failed, using defaults"
                );
                return None;
            }
        };

        let selected = parse_selection(&reply, descriptor);
        info!(
            event_name = "agent.related.selected",
            module = %descriptor.remote_module,
            lists = ?selected,
            "related lists selected"
        );
        selected
    }
}

/// Known list names from a JSON array reply, in reply order and spelled the
/// way the module table spells them.
pub fn parse_selection(reply: &str, descriptor: &ModuleDescriptor) -> Option<Vec<String>> {
    let cleaned = reply.replace("```json", "").replace("```", "");
    let Ok(entries) = serde_json::from_str::<Vec<Value>>(cleaned.trim()) else {
        debug!(
            event_name = "agent.related.unparseable",
            module = %descriptor.remote_module,
            "related list reply is not a JSON array"
        );
        return None;
    };

    let candidates = descriptor.related_candidates();
    let mut selected: Vec<String> = Vec::new();
    for entry in entries {
        let Some(name) = entry.as_str().map(str::trim) else {
            continue;
        };
        match candidates.iter().find(|candidate| candidate.eq_ignore_ascii_case(name)) {
            Some(known) if !selected.iter().any(|list| list == known) => selected.push(known.to_string()),
            Some(_) => {}
            None => debug!(
                event_name = "agent.related.unknown_list",
                module = %descriptor.remote_module,
                list = name,
                "model named a list the module does not have"
            ),
        }
    }

    (!selected.is_empty()).then_some(selected)
}
