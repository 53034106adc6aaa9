//! Turns human-readable reference values ("Jane Doe", "Acme Holdings") into
//! remote record ids before a write.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::domain::module::{FieldSpec, ModuleDescriptor};
use crate::domain::record::value_as_id;
use crate::errors::{ApplicationError, UpstreamService};
use crate::registry::ModuleRegistry;
use crate::store::{Criteria, RemoteStore, SearchQuery, StoreError};

/// Remote ids are long runs of digits; anything else is a display value.
pub fn is_id_shaped(value: &str) -> bool {
    (10..=20).contains(&value.len()) && value.bytes().all(|byte| byte.is_ascii_digit())
}

#[derive(Clone)]
pub struct LookupResolver {
    store: Arc<dyn RemoteStore>,
    registry: Arc<ModuleRegistry>,
    per_page: u32,
}

impl LookupResolver {
    pub fn new(store: Arc<dyn RemoteStore>, registry: Arc<ModuleRegistry>, per_page: u32) -> Self {
        Self { store, registry, per_page: per_page.max(1) }
    }

    pub async fn resolve(&self, field: &FieldSpec, raw: &str) -> Result<String, ApplicationError> {
        let value = raw.trim();
        if is_id_shaped(value) {
            return Ok(value.to_string());
        }
        if value.is_empty() {
            return Err(self.unresolved(field, raw));
        }

        let target = field.reference_target().ok_or_else(|| {
            ApplicationError::validation(
                field.api_name.clone(),
                format!("`{}` is not a reference field", field.api_name),
            )
        })?;
        let descriptor = self.registry.by_remote_module(target);
        let module = descriptor.map(|module| module.remote_module.as_str()).unwrap_or(target);
        let criteria = criteria_for(descriptor, value);

        let rows = match self.store.search(module, &SearchQuery::Criteria(criteria), self.per_page).await {
            Ok(rows) => rows,
            Err(StoreError::NotFound | StoreError::NoContent) => Vec::new(),
            Err(StoreError::Auth(message)) => {
                return Err(ApplicationError::upstream(UpstreamService::Auth, message, false));
            }
            Err(error) => {
                return Err(ApplicationError::upstream(
                    UpstreamService::Crm,
                    format!("lookup search on {module} failed: {error}"),
                    true,
                ));
            }
        };

        if rows.len() > 1 {
            debug!(
                event_name = "orchestrator.lookup.ambiguous",
                field = %field.api_name,
                lookup_module = module,
                matches = rows.len(),
                "several records match; taking the first"
            );
        }

        rows.first()
            .and_then(|row| row.get("id"))
            .and_then(value_as_id)
            .ok_or_else(|| self.unresolved(field, raw))
    }

    /// Resolves a reference value as it appears in an action payload: plain
    /// strings, `{"id": ..}` or `{"name": ..}` objects, and arrays for
    /// multi-lookups. `null` passes through so a reference can be cleared.
    pub async fn resolve_value(&self, field: &FieldSpec, value: &Value) -> Result<Value, ApplicationError> {
        match value {
            Value::Null => Ok(Value::Null),
            Value::Array(items) => {
                let mut resolved = Vec::with_capacity(items.len());
                for item in items {
                    resolved.push(Value::String(self.resolve_scalar(field, item).await?));
                }
                Ok(Value::Array(resolved))
            }
            other => Ok(Value::String(self.resolve_scalar(field, other).await?)),
        }
    }

    async fn resolve_scalar(&self, field: &FieldSpec, value: &Value) -> Result<String, ApplicationError> {
        match value {
            Value::String(text) => self.resolve(field, text).await,
            Value::Number(number) => self.resolve(field, &number.to_string()).await,
            Value::Object(object) => {
                if let Some(id) = object.get("id").and_then(value_as_id) {
                    return Ok(id);
                }
                match object.get("name").and_then(Value::as_str) {
                    Some(name) => self.resolve(field, name).await,
                    None => Err(self.unresolved(field, &value.to_string())),
                }
            }
            other => Err(self.unresolved(field, &other.to_string())),
        }
    }

    fn unresolved(&self, field: &FieldSpec, value: &str) -> ApplicationError {
        ApplicationError::UnresolvedReference { field: field.api_name.clone(), value: value.to_string() }
    }
}

/// Person-like targets match on first and last name; everything else on
/// the target's display field.
fn criteria_for(descriptor: Option<&ModuleDescriptor>, value: &str) -> Criteria {
    if let Some(names) = descriptor.and_then(|module| module.person_name_fields.as_ref()) {
        let mut words = value.split_whitespace();
        let first = words.next().unwrap_or_default();
        let rest = words.collect::<Vec<_>>().join(" ");
        if rest.is_empty() {
            return Criteria::equals(names.last.clone(), first);
        }
        return Criteria::And(vec![
            Criteria::equals(names.first.clone(), first),
            Criteria::equals(names.last.clone(), rest),
        ]);
    }

    let display_field =
        descriptor.map(|module| module.display_field.clone()).unwrap_or_else(|| "Name".to_string());
    Criteria::equals(display_field, value)
}
