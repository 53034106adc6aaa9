use std::fmt::Write as _;

use clientdesk_core::domain::module::ModuleDescriptor;
use clientdesk_core::registry::ModuleRegistry;

use crate::conversation::{recent_history, ConversationTurn};
use crate::protocol::{ACTION_END, ACTION_START};

pub fn schema_block(descriptor: &ModuleDescriptor) -> String {
    let mut out = String::new();
    for field in &descriptor.field_schema {
        match field.reference_target() {
            Some(target) => {
                let _ = writeln!(out, "- {} ({} -> {target})", field.api_name, field.kind.as_str());
            }
            None => {
                let _ = writeln!(out, "- {} ({})", field.api_name, field.kind.as_str());
            }
        }
    }
    out
}

pub fn history_block(history: &[ConversationTurn]) -> String {
    let recent = recent_history(history);
    if recent.is_empty() {
        return String::new();
    }

    let mut out = String::from("### CONVERSATION HISTORY\n");
    for turn in recent {
        let _ = writeln!(out, "{}: {}", turn.role.label(), turn.content);
    }
    out
}

/// Question answering over one fetched record.
pub fn answer_prompt(
    descriptor: &ModuleDescriptor,
    context: &str,
    query: &str,
    history: &[ConversationTurn],
) -> String {
    format!(
        "You are an assistant for financial advisers working in their CRM.\n\n\
         ### DATA SCHEMA ({module})\n{schema}\n\
         ### RECORD CONTEXT\n{context}\n\n\
         {history}\n\
         ### USER QUESTION\n\"{query}\"\n\n\
         ### INSTRUCTIONS\n\
         - Answer based ONLY on the data provided.\n\
         - Refer to lookups by name, never by id.\n\
         - If the data does not contain the answer, say so.\n\n\
         Answer:",
        module = descriptor.remote_module,
        schema = schema_block(descriptor),
        history = history_block(history),
    )
}

/// Asks for a single create/update proposal in the action block format.
pub fn action_prompt(
    descriptor: &ModuleDescriptor,
    action: &str,
    record_id: Option<&str>,
    context: Option<&str>,
    query: &str,
    history: &[ConversationTurn],
) -> String {
    let name_hint = descriptor
        .name_field
        .as_deref()
        .map(|field| format!("- A create MUST set `{field}`.\n"))
        .unwrap_or_default();
    let record_hint = record_id
        .map(|id| format!("- The record being updated has id {id}; use it as `record_id`.\n"))
        .unwrap_or_default();
    let context_block = context.map(|text| format!("### CURRENT RECORD\n{text}\n\n")).unwrap_or_default();

    format!(
        "You prepare CRM changes for financial advisers.\n\n\
         ### DATA SCHEMA ({module})\n{schema}\n\
         {context_block}\
         {history}\n\
         ### REQUEST\n\"{query}\"\n\n\
         ### INSTRUCTIONS\n\
         - Produce exactly one `{action}` for module \"{module}\".\n\
         - Only use field names from the schema.\n\
         - For lookups, pass the person or record name as text; the system converts it to an id.\n\
         {name_hint}{record_hint}\n\
         ### ACTION PROTOCOL\n\
         Write one short sentence describing the change, then:\n\
         {ACTION_START}\n\
         {{\"action\": \"{action}\", \"module\": \"{module}\", \"record_id\": \"<id for updates>\", \"data\": {{\"Field_Name\": \"Value\"}}}}\n\
         {ACTION_END}\n",
        module = descriptor.remote_module,
        schema = schema_block(descriptor),
        history = history_block(history),
    )
}

/// Proactive review of one record; the reply is JSON recommendations.
pub fn scan_prompt(descriptor: &ModuleDescriptor, context: &str) -> String {
    format!(
        "You review CRM records for financial advisers and suggest what to do next.\n\n\
         ### DATA SCHEMA ({module})\n{schema}\n\
         ### RECORD CONTEXT\n{context}\n\n\
         ### INSTRUCTIONS\n\
         Give 2-3 recommendations. Look for missing contact details, overdue follow-ups, \
         incomplete or inconsistent data and relationships worth acting on.\n\
         Suggested actions may only set fields listed in the schema. Use an empty \"actions\" \
         list when there is nothing to change.\n\n\
         ### OUTPUT JSON FORMAT\n\
         {{\"recommendations\": [{{\"type\": \"alert|suggestion|action\", \"message\": \"text\", \
         \"priority\": \"high|medium|low\", \"actions\": [{{\"label\": \"Button label\", \
         \"field\": \"Field_API_Name\", \"value\": \"New value\"}}]}}]}}\n\n\
         JSON:",
        module = descriptor.remote_module,
        schema = schema_block(descriptor),
    )
}

/// Routing step before a fetch: which related lists does the question need.
pub fn related_selection_prompt(descriptor: &ModuleDescriptor, query: &str) -> String {
    let candidates = descriptor.related_candidates();
    format!(
        "You route questions about a CRM record to the related lists needed to answer them.\n\n\
         USER QUESTION: \"{query}\"\n\n\
         RELATED LISTS OF {module}:\n{lists}\n\n\
         INSTRUCTIONS:\n\
         1. Match synonyms to list names (\"debt\" means liabilities, \"job\" means professional contacts).\n\
         2. Select every list that could contain the answer.\n\
         3. For a general summary or overview return {defaults}.\n\
         4. Return ONLY a JSON array of list names, with no markdown or explanation.\n\n\
         Example: [\"Notes\", \"Deals\"]",
        module = descriptor.remote_module,
        lists = serde_json::to_string(&candidates).unwrap_or_default(),
        defaults = serde_json::to_string(&descriptor.default_related).unwrap_or_default(),
    )
}

/// Plan generation over the whole module table.
pub fn planning_prompt(
    registry: &ModuleRegistry,
    active_slug: &str,
    active_record_id: Option<&str>,
    query: &str,
    history: &[ConversationTurn],
) -> String {
    let mut modules = String::new();
    for slug in registry.slugs() {
        if let Some(descriptor) = registry.resolve(slug) {
            let _ = writeln!(modules, "- {slug} ({})", descriptor.remote_module);
        }
    }
    let active_record = active_record_id.unwrap_or("none");

    format!(
        "You are the orchestrator for a financial advice CRM. Turn the request into a JSON plan.\n\n\
         ### MODULES\n{modules}\n\
         ### CURRENT CONTEXT\nActive module: {active_slug}\nActive record id: {active_record}\n\n\
         {history}\n\
         ### RULES\n\
         1. Questions about the active record (brief, summary, details) use action \"query\".\n\
         2. Finding records uses action \"search\" with only the search term as the query.\n\
         3. Chains (\"find John and create a task\") use one step per module; later steps set \
         \"depends_on_step\" to the step whose record they act on.\n\
         4. For \"create\" or \"update\", when the history shows no \"Yes\" confirmation, use action \"verify\" \
         for that step instead.\n\n\
         ### OUTPUT JSON FORMAT\n\
         {{\"plan\": [{{\"step\": 1, \"agent\": \"slug\", \"action\": \"search|query|create|update|verify\", \
         \"query\": \"text\", \"depends_on_step\": null}}]}}\n\n\
         ### REQUEST\n\"{query}\"\n\n\
         JSON plan:",
        history = history_block(history),
    )
}
