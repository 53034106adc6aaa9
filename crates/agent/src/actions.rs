use std::sync::Arc;

use clientdesk_core::domain::action::{ActionKind, ActionProposal, WriteOutcome};
use clientdesk_core::domain::module::ModuleDescriptor;
use clientdesk_core::domain::record::{display_value, Fields};
use clientdesk_core::errors::{ApplicationError, UpstreamService};
use clientdesk_core::lookup::LookupResolver;
use clientdesk_core::registry::ModuleRegistry;
use clientdesk_core::store::{RemoteStore, StoreError};
use serde_json::Value;
use tracing::{info, warn};

use crate::conversation::ConfirmationState;
use crate::guardrails::{GuardrailDecision, GuardrailIntent, GuardrailPolicy};

/// Validates and applies one create/update proposal.
#[derive(Clone)]
pub struct ActionHandler {
    store: Arc<dyn RemoteStore>,
    registry: Arc<ModuleRegistry>,
    resolver: LookupResolver,
    guardrails: GuardrailPolicy,
}

impl ActionHandler {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        registry: Arc<ModuleRegistry>,
        resolver: LookupResolver,
        guardrails: GuardrailPolicy,
    ) -> Self {
        Self { store, registry, resolver, guardrails }
    }

    pub fn guardrails(&self) -> &GuardrailPolicy {
        &self.guardrails
    }

    pub async fn execute(
        &self,
        proposal: &ActionProposal,
        confirmation: &ConfirmationState,
    ) -> Result<WriteOutcome, ApplicationError> {
        let descriptor = self
            .registry
            .resolve_any(&proposal.module_slug)
            .ok_or_else(|| ApplicationError::UnknownModule { slug: proposal.module_slug.clone() })?;

        validate_fields(descriptor, &proposal.data)?;
        let record_id = validate_shape(descriptor, proposal)?;
        let data = self.resolve_references(descriptor, &proposal.data).await?;

        let intent = GuardrailIntent::write(descriptor.remote_module.clone(), proposal.action);
        match self.guardrails.evaluate(&intent, confirmation) {
            GuardrailDecision::Allow => {}
            GuardrailDecision::Degrade { reason_code, .. } => {
                info!(
                    event_name = "agent.action.confirmation_required",
                    module = %descriptor.remote_module,
                    action_key = %intent.action_key(),
                    reason_code,
                    "write held for confirmation"
                );
                return Err(ApplicationError::ConfirmationRequired {
                    module: descriptor.remote_module.clone(),
                    action: proposal.action,
                });
            }
            GuardrailDecision::Deny { reason_code, user_message, .. } => {
                warn!(
                    event_name = "agent.action.denied",
                    module = %descriptor.remote_module,
                    action_key = %intent.action_key(),
                    reason_code,
                    "write denied by guardrail"
                );
                return Err(ApplicationError::validation(descriptor.remote_module.clone(), user_message));
            }
        }

        let module = descriptor.remote_module.as_str();
        let response = match (proposal.action, record_id) {
            (ActionKind::Create, _) => self.store.create(module, &data).await,
            (ActionKind::Update, Some(id)) => self.store.update(module, id, &data).await,
            (ActionKind::Update, None) => {
                return Err(ApplicationError::validation(module, "update requires a record_id"));
            }
        }
        .map_err(|error| write_error(module, error))?;

        let written_id = response
            .get("id")
            .and_then(display_value)
            .or_else(|| record_id.map(str::to_string))
            .unwrap_or_default();
        if written_id.is_empty() {
            warn!(
                event_name = "agent.action.missing_id",
                module,
                action = %proposal.action,
                "remote write succeeded without returning an id"
            );
        }

        info!(
            event_name = "agent.action.write_applied",
            module,
            action = %proposal.action,
            record_id = %written_id,
            "remote write applied"
        );

        Ok(WriteOutcome { action: proposal.action, module: module.to_string(), record_id: written_id, fields: response })
    }

    async fn resolve_references(
        &self,
        descriptor: &ModuleDescriptor,
        data: &Fields,
    ) -> Result<Fields, ApplicationError> {
        let mut resolved = Fields::new();
        for (key, value) in data {
            let value = match descriptor.field(key) {
                Some(field) if field.kind.is_reference() => self.resolver.resolve_value(field, value).await?,
                _ => value.clone(),
            };
            resolved.insert(key.clone(), value);
        }
        Ok(resolved)
    }
}

fn validate_fields(descriptor: &ModuleDescriptor, data: &Fields) -> Result<(), ApplicationError> {
    for key in data.keys() {
        let Some(field) = descriptor.field(key) else {
            return Err(ApplicationError::validation(
                descriptor.remote_module.clone(),
                format!("unknown field `{key}`"),
            ));
        };
        if field.kind.is_computed() {
            return Err(ApplicationError::validation(
                descriptor.remote_module.clone(),
                format!("`{key}` is computed by the CRM and cannot be written"),
            ));
        }
    }
    Ok(())
}

/// Returns the target id for updates.
fn validate_shape<'a>(
    descriptor: &ModuleDescriptor,
    proposal: &'a ActionProposal,
) -> Result<Option<&'a str>, ApplicationError> {
    match proposal.action {
        ActionKind::Create => {
            if let Some(name_field) = &descriptor.name_field {
                let present = proposal.data.get(name_field).and_then(display_value).is_some();
                if !present {
                    return Err(ApplicationError::validation(
                        descriptor.remote_module.clone(),
                        format!("create requires `{name_field}`"),
                    ));
                }
            }
            Ok(None)
        }
        ActionKind::Update => {
            let record_id = proposal.record_id.as_deref().map(str::trim).filter(|id| !id.is_empty());
            if record_id.is_none() {
                return Err(ApplicationError::validation(
                    descriptor.remote_module.clone(),
                    "update requires a record_id",
                ));
            }
            if proposal.data.is_empty() {
                return Err(ApplicationError::validation(
                    descriptor.remote_module.clone(),
                    "update has no fields to change",
                ));
            }
            Ok(record_id)
        }
    }
}

/// Writes are not retried; the remote message is passed through as-is.
fn write_error(module: &str, error: StoreError) -> ApplicationError {
    let service = if matches!(error, StoreError::Auth(_)) { UpstreamService::Auth } else { UpstreamService::Crm };
    let message = match error {
        StoreError::NotFound => format!("{module} record not found"),
        other => other.to_string(),
    };
    ApplicationError::Upstream { service, message, retryable: false }
}

/// Writes the dependency id into the proposal: the record itself for a
/// same-module update, otherwise the reference field pointing at its module.
pub fn inject_dependency(
    target: &ModuleDescriptor,
    dependency: &ModuleDescriptor,
    dependency_id: &str,
    proposal: &mut ActionProposal,
) -> Option<String> {
    if proposal.action == ActionKind::Update && target.slug == dependency.slug {
        proposal.record_id = Some(dependency_id.to_string());
        return None;
    }

    let field = target.reference_field_for(&dependency.remote_module)?;
    proposal.data.insert(field.api_name.clone(), Value::String(dependency_id.to_string()));
    Some(field.api_name.clone())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use clientdesk_core::domain::action::{ActionKind, ActionProposal};
    use clientdesk_core::errors::ApplicationError;
    use clientdesk_core::lookup::LookupResolver;
    use clientdesk_core::registry::ModuleRegistry;
    use clientdesk_core::store::memory::{InMemoryStore, StoreCall};
    use clientdesk_core::store::StoreError;
    use serde_json::json;

    use super::{inject_dependency, ActionHandler};
    use crate::conversation::ConfirmationState;
    use crate::guardrails::GuardrailPolicy;

    fn handler(store: Arc<InMemoryStore>) -> ActionHandler {
        let registry = Arc::new(ModuleRegistry::builtin().expect("registry"));
        let resolver = LookupResolver::new(store.clone(), registry.clone(), 10);
        ActionHandler::new(store, registry, resolver, GuardrailPolicy::default())
    }

    fn proposal(action: ActionKind, module: &str, record_id: Option<&str>, data: serde_json::Value) -> ActionProposal {
        ActionProposal {
            action,
            module_slug: module.to_string(),
            record_id: record_id.map(str::to_string),
            data: data.as_object().cloned().unwrap_or_default(),
        }
    }

    #[tokio::test]
    async fn create_resolves_names_and_writes_once() {
        let store = Arc::new(InMemoryStore::new().with_record(
            "Contacts",
            json!({"id": "4000000012345", "First_Name": "Jane", "Last_Name": "Doe"}),
        ));
        let outcome = handler(store.clone())
            .execute(
                &proposal(ActionKind::Create, "Tasks", None, json!({"Subject": "Call Jane", "Who_Id": "Jane Doe"})),
                &ConfirmationState::confirmed(),
            )
            .await
            .expect("create succeeds");

        assert_eq!(outcome.module, "Tasks");
        assert!(!outcome.record_id.is_empty());
        let writes = store.write_calls();
        assert_eq!(writes.len(), 1);
        assert!(matches!(
            &writes[0],
            StoreCall::Create { module, data } if module == "Tasks" && data.get("Who_Id") == Some(&json!("4000000012345"))
        ));
    }

    #[tokio::test]
    async fn unconfirmed_write_is_held() {
        let store = Arc::new(InMemoryStore::new());
        let result = handler(store.clone())
            .execute(
                &proposal(ActionKind::Create, "tasks", None, json!({"Subject": "Call"})),
                &ConfirmationState::unconfirmed(),
            )
            .await;

        assert!(matches!(
            result,
            Err(ApplicationError::ConfirmationRequired { ref module, action: ActionKind::Create }) if module == "Tasks"
        ));
        assert!(store.write_calls().is_empty());
    }

    #[tokio::test]
    async fn validation_failures_make_no_remote_calls() {
        let store = Arc::new(InMemoryStore::new());
        let handler = handler(store.clone());
        let confirmed = ConfirmationState::confirmed();

        let missing_name = handler
            .execute(&proposal(ActionKind::Create, "deals", None, json!({"Stage": "Qualification"})), &confirmed)
            .await;
        assert!(matches!(missing_name, Err(ApplicationError::Validation { ref message, .. }) if message.contains("Deal_Name")));

        let unknown_field = handler
            .execute(
                &proposal(ActionKind::Update, "deals", Some("4000000000100"), json!({"Colour": "Blue"})),
                &confirmed,
            )
            .await;
        assert!(matches!(unknown_field, Err(ApplicationError::Validation { ref message, .. }) if message.contains("Colour")));

        let computed = handler
            .execute(
                &proposal(ActionKind::Update, "quotes", Some("4000000000200"), json!({"Grand_Total": 10})),
                &confirmed,
            )
            .await;
        assert!(matches!(computed, Err(ApplicationError::Validation { .. })));

        let no_id = handler
            .execute(&proposal(ActionKind::Update, "deals", None, json!({"Stage": "Won"})), &confirmed)
            .await;
        assert!(matches!(no_id, Err(ApplicationError::Validation { .. })));

        let unknown_module =
            handler.execute(&proposal(ActionKind::Create, "widgets", None, json!({})), &confirmed).await;
        assert!(matches!(unknown_module, Err(ApplicationError::UnknownModule { .. })));

        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn unresolved_reference_aborts_before_writing() {
        let store = Arc::new(
            InMemoryStore::new().with_record("Accounts", json!({"id": "4000000000001", "Account_Name": "Acme"})),
        );
        let result = handler(store.clone())
            .execute(
                &proposal(ActionKind::Create, "deals", None, json!({"Deal_Name": "New", "Account_Name": "Acme Holdings"})),
                &ConfirmationState::confirmed(),
            )
            .await;

        assert!(matches!(
            result,
            Err(ApplicationError::UnresolvedReference { ref field, ref value })
                if field == "Account_Name" && value == "Acme Holdings"
        ));
        assert!(store.write_calls().is_empty());
    }

    #[tokio::test]
    async fn remote_write_errors_are_not_retried() {
        let store = Arc::new(InMemoryStore::new().with_write_failure(StoreError::Status {
            status: 400,
            body: "INVALID_DATA: Stage".to_string(),
        }));
        let result = handler(store.clone())
            .execute(
                &proposal(ActionKind::Update, "deals", Some("4000000000100"), json!({"Stage": "Bogus"})),
                &ConfirmationState::confirmed(),
            )
            .await;

        assert!(matches!(
            result,
            Err(ApplicationError::Upstream { ref message, retryable: false, .. }) if message.contains("INVALID_DATA")
        ));
        assert_eq!(store.write_calls().len(), 1);
    }

    #[test]
    fn dependency_goes_to_the_matching_reference_field() {
        let registry = ModuleRegistry::builtin().expect("registry");
        let tasks = registry.resolve("tasks").expect("tasks");
        let contacts = registry.resolve("contacts").expect("contacts");
        let deals = registry.resolve("deals").expect("deals");

        let mut create = proposal(ActionKind::Create, "tasks", None, json!({"Subject": "Call", "Who_Id": "Jane Doe"}));
        assert_eq!(inject_dependency(tasks, contacts, "4000000012345", &mut create).as_deref(), Some("Who_Id"));
        assert_eq!(create.data.get("Who_Id"), Some(&json!("4000000012345")));

        let mut update = proposal(ActionKind::Update, "deals", None, json!({"Stage": "Won"}));
        assert_eq!(inject_dependency(deals, deals, "4000000000100", &mut update), None);
        assert_eq!(update.record_id.as_deref(), Some("4000000000100"));
    }
}
