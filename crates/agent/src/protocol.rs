//! The `<<<ACTION>>> {json} <<<END_ACTION>>>` block a model may append to an
//! answer to request a create or update.

use clientdesk_core::domain::action::{ActionKind, ActionProposal};
use clientdesk_core::domain::record::Fields;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

pub const ACTION_START: &str = "<<<ACTION>>>";
pub const ACTION_END: &str = "<<<END_ACTION>>>";

#[derive(Clone, Debug, PartialEq)]
pub struct ParsedReply {
    pub answer: String,
    pub action: Option<ActionProposal>,
    /// Why a block that was present got ignored.
    pub rejected: Option<ProtocolError>,
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("more than one action block")]
    Duplicate,
    #[error("action block is not terminated")]
    Unterminated,
    #[error("end marker without a start marker")]
    Unopened,
    #[error("action payload is not valid JSON: {0}")]
    Json(String),
    #[error("unsupported action `{0}`")]
    UnsupportedAction(String),
    #[error("action payload names no module")]
    MissingModule,
}

#[derive(Debug, Deserialize)]
struct WireAction {
    action: String,
    #[serde(default, alias = "module_slug", alias = "agent")]
    module: Option<String>,
    #[serde(default, alias = "id")]
    record_id: Option<Value>,
    #[serde(default)]
    data: Fields,
}

/// Splits a model reply into answer text and at most one action proposal.
/// Anything other than exactly one well-formed block yields no action and
/// the whole text as the answer.
pub fn parse_reply(text: &str) -> ParsedReply {
    match extract(text) {
        Ok(None) => ParsedReply { answer: text.trim().to_string(), action: None, rejected: None },
        Ok(Some((answer, action))) => ParsedReply { answer, action: Some(action), rejected: None },
        Err(error) => ParsedReply { answer: text.trim().to_string(), action: None, rejected: Some(error) },
    }
}

fn extract(text: &str) -> Result<Option<(String, ActionProposal)>, ProtocolError> {
    let starts = text.matches(ACTION_START).count();
    let ends = text.matches(ACTION_END).count();
    match (starts, ends) {
        (0, 0) => return Ok(None),
        (0, _) => return Err(ProtocolError::Unopened),
        (1, 0) => return Err(ProtocolError::Unterminated),
        (1, 1) => {}
        _ => return Err(ProtocolError::Duplicate),
    }

    let start = text.find(ACTION_START).ok_or(ProtocolError::Unopened)?;
    let end = text.find(ACTION_END).ok_or(ProtocolError::Unterminated)?;
    if end < start {
        return Err(ProtocolError::Unterminated);
    }

    let payload = strip_fences(&text[start + ACTION_START.len()..end]);
    let wire = serde_json::from_str::<WireAction>(payload)
        .map_err(|error| ProtocolError::Json(error.to_string()))?;
    let action = parse_kind(&wire.action)?;
    let module_slug = wire
        .module
        .map(|module| module.trim().to_string())
        .filter(|module| !module.is_empty())
        .ok_or(ProtocolError::MissingModule)?;
    let record_id = wire.record_id.as_ref().and_then(|value| match value {
        Value::String(id) if !id.trim().is_empty() => Some(id.trim().to_string()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    });

    let before = text[..start].trim_end();
    let after = text[end + ACTION_END.len()..].trim_start();
    let answer = match (before.is_empty(), after.is_empty()) {
        (_, true) => before.to_string(),
        (true, false) => after.to_string(),
        (false, false) => format!("{before}\n{after}"),
    };

    Ok(Some((answer.trim().to_string(), ActionProposal { action, module_slug, record_id, data: wire.data })))
}

fn parse_kind(raw: &str) -> Result<ActionKind, ProtocolError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "create" => Ok(ActionKind::Create),
        "update" => Ok(ActionKind::Update),
        other => Err(ProtocolError::UnsupportedAction(other.to_string())),
    }
}

fn strip_fences(payload: &str) -> &str {
    let trimmed = payload.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
