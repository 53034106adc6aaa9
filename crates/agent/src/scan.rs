//! Proactive review of one record: the model suggests follow-ups and field
//! fixes, nothing is written.

use clientdesk_core::domain::module::ModuleDescriptor;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

const MAX_RECOMMENDATIONS: usize = 5;
const NOTHING_TO_RECOMMEND: &str = "No specific recommendations at this time. The record looks complete.";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRequest {
    #[serde(alias = "module", alias = "entity_type")]
    pub slug: String,
    #[serde(alias = "id", alias = "entity_id")]
    pub record_id: String,
}

impl ScanRequest {
    pub fn new(slug: impl Into<String>, record_id: impl Into<String>) -> Self {
        Self { slug: slug.into(), record_id: record_id.into() }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationKind {
    Alert,
    Suggestion,
    Action,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Medium,
    Low,
}

/// A field change the caller may offer as a button. Applying it goes through
/// a normal confirmed chat turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SuggestedAction {
    pub label: String,
    pub field: String,
    pub value: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    #[serde(rename = "type")]
    pub kind: RecommendationKind,
    pub message: String,
    pub priority: Priority,
    #[serde(default)]
    pub actions: Vec<SuggestedAction>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanResponse {
    pub recommendations: Vec<Recommendation>,
}

#[derive(Debug, Deserialize)]
struct WireScan {
    #[serde(default)]
    recommendations: Vec<Value>,
}

/// Lenient parse of the model reply. Entries that do not fit the shape are
/// dropped, as are actions naming fields outside the module schema. An empty
/// result becomes a single low-priority note.
pub fn parse_recommendations(reply: &str, descriptor: &ModuleDescriptor) -> ScanResponse {
    let cleaned = reply.replace("```json", "").replace("```", "");
    let wire = match serde_json::from_str::<WireScan>(cleaned.trim()) {
        Ok(wire) => wire,
        Err(error) => {
            warn!(
                event_name = "agent.scan.unparseable",
                module = %descriptor.remote_module,
                error = %error,
                "scan reply is not valid JSON"
            );
            WireScan { recommendations: Vec::new() }
        }
    };

    let mut recommendations = Vec::new();
    for entry in wire.recommendations {
        let Ok(mut recommendation) = serde_json::from_value::<Recommendation>(entry) else {
            continue;
        };
        if recommendation.message.trim().is_empty() {
            continue;
        }
        let before = recommendation.actions.len();
        recommendation.actions.retain(|action| descriptor.has_field(&action.field));
        if recommendation.actions.len() < before {
            debug!(
                event_name = "agent.scan.actions_dropped",
                module = %descriptor.remote_module,
                dropped = before - recommendation.actions.len(),
                "suggested actions outside the schema dropped"
            );
        }
        recommendations.push(recommendation);
        if recommendations.len() == MAX_RECOMMENDATIONS {
            break;
        }
    }

    if recommendations.is_empty() {
        recommendations.push(Recommendation {
            kind: RecommendationKind::Suggestion,
            message: NOTHING_TO_RECOMMEND.to_string(),
            priority: Priority::Low,
            actions: Vec::new(),
        });
    }
    ScanResponse { recommendations }
}

#[cfg(test)]
mod tests {
    use clientdesk_core::registry::ModuleRegistry;
    use serde_json::json;

    use super::{parse_recommendations, Priority, RecommendationKind, ScanRequest, NOTHING_TO_RECOMMEND};

    #[test]
    fn actions_outside_the_schema_are_dropped() {
        let registry = ModuleRegistry::builtin().expect("registry");
        let accounts = registry.resolve("accounts").expect("accounts");
        let reply = r#"```json
        {"recommendations": [
          {"type": "alert", "message": "Website is missing", "priority": "high",
           "actions": [
             {"label": "Add website", "type": "UPDATE_FIELD", "field": "Website", "value": "https://acme.example"},
             {"label": "Paint it", "type": "UPDATE_FIELD", "field": "Colour", "value": "Blue"}
           ]},
          {"type": "suggestion", "message": "Schedule an annual review", "priority": "medium"}
        ]}
        ```"#;

        let response = parse_recommendations(reply, accounts);

        assert_eq!(response.recommendations.len(), 2);
        let first = &response.recommendations[0];
        assert_eq!(first.kind, RecommendationKind::Alert);
        assert_eq!(first.priority, Priority::High);
        assert_eq!(first.actions.len(), 1);
        assert_eq!(first.actions[0].field, "Website");
        assert!(response.recommendations[1].actions.is_empty());
    }

    #[test]
    fn malformed_entries_are_skipped() {
        let registry = ModuleRegistry::builtin().expect("registry");
        let accounts = registry.resolve("accounts").expect("accounts");
        let reply = json!({"recommendations": [
            {"type": "shout", "message": "Unknown kind", "priority": "high"},
            {"type": "alert", "message": "   ", "priority": "low"},
            {"type": "action", "message": "Log the last call", "priority": "low"}
        ]})
        .to_string();

        let response = parse_recommendations(&reply, accounts);

        assert_eq!(response.recommendations.len(), 1);
        assert_eq!(response.recommendations[0].message, "Log the last call");
    }

    #[test]
    fn unusable_reply_yields_a_single_note() {
        let registry = ModuleRegistry::builtin().expect("registry");
        let accounts = registry.resolve("accounts").expect("accounts");

        for reply in ["not json at all", r#"{"recommendations": []}"#] {
            let response = parse_recommendations(reply, accounts);
            assert_eq!(response.recommendations.len(), 1);
            assert_eq!(response.recommendations[0].message, NOTHING_TO_RECOMMEND);
            assert_eq!(response.recommendations[0].priority, Priority::Low);
        }
    }

    #[test]
    fn request_accepts_entity_aliases() {
        let request: ScanRequest =
            serde_json::from_value(json!({"entity_type": "Accounts", "entity_id": "4000000000001"})).expect("request");
        assert_eq!(request, ScanRequest::new("Accounts", "4000000000001"));
    }
}
