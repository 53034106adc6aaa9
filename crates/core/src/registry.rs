//! Static table of CRM modules the orchestrator can address.
//!
//! The table is loaded once at startup from a single TOML document (the
//! built-in one is embedded in the binary) and is read-only afterwards.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;

use crate::domain::module::{FieldKind, FieldSpec, ModuleDescriptor, PersonNameFields};

const BUILTIN_MODULES: &str = include_str!("../data/modules.toml");

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("could not read module table `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse module table: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("module `{slug}`: invalid field entry `{entry}` ({reason})")]
    InvalidField { slug: String, entry: String, reason: String },
    #[error("module table is invalid: {0}")]
    Validation(String),
}

#[derive(Clone, Debug, Default)]
pub struct ModuleRegistry {
    by_slug: HashMap<String, Arc<ModuleDescriptor>>,
    by_remote: HashMap<String, Arc<ModuleDescriptor>>,
}

impl ModuleRegistry {
    pub fn builtin() -> Result<Self, RegistryError> {
        Self::from_toml_str(BUILTIN_MODULES)
    }

    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        let raw = fs::read_to_string(path)
            .map_err(|source| RegistryError::ReadFile { path: path.to_path_buf(), source })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, RegistryError> {
        let table = toml::from_str::<ModuleTable>(raw)?;
        let descriptors =
            table.module.into_iter().map(ModuleEntry::into_descriptor).collect::<Result<Vec<_>, _>>()?;
        Self::from_descriptors(descriptors)
    }

    pub fn from_descriptors(
        descriptors: impl IntoIterator<Item = ModuleDescriptor>,
    ) -> Result<Self, RegistryError> {
        let mut registry = Self::default();
        for mut descriptor in descriptors {
            descriptor.slug = normalize_slug(&descriptor.slug);
            validate_descriptor(&descriptor)?;

            let descriptor = Arc::new(descriptor);
            let remote_key = descriptor.remote_module.to_ascii_lowercase();
            if registry.by_slug.insert(descriptor.slug.clone(), descriptor.clone()).is_some() {
                return Err(RegistryError::Validation(format!(
                    "slug `{}` is declared more than once",
                    descriptor.slug
                )));
            }
            registry.by_remote.entry(remote_key).or_insert(descriptor);
        }

        if registry.by_slug.is_empty() {
            return Err(RegistryError::Validation("no modules declared".to_string()));
        }
        Ok(registry)
    }

    pub fn resolve(&self, slug: &str) -> Option<&ModuleDescriptor> {
        self.by_slug.get(&normalize_slug(slug)).map(Arc::as_ref)
    }

    pub fn by_remote_module(&self, remote_module: &str) -> Option<&ModuleDescriptor> {
        self.by_remote.get(&remote_module.trim().to_ascii_lowercase()).map(Arc::as_ref)
    }

    /// Accepts either a slug or a remote module name; generated text tends to
    /// use the latter.
    pub fn resolve_any(&self, name: &str) -> Option<&ModuleDescriptor> {
        self.resolve(name).or_else(|| self.by_remote_module(name))
    }

    pub fn slugs(&self) -> Vec<&str> {
        let mut slugs = self.by_slug.keys().map(String::as_str).collect::<Vec<_>>();
        slugs.sort_unstable();
        slugs
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &ModuleDescriptor> {
        self.by_slug.values().map(Arc::as_ref)
    }

    pub fn len(&self) -> usize {
        self.by_slug.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_slug.is_empty()
    }
}

fn normalize_slug(slug: &str) -> String {
    slug.trim().to_ascii_lowercase()
}

fn validate_descriptor(descriptor: &ModuleDescriptor) -> Result<(), RegistryError> {
    if descriptor.slug.is_empty() {
        return Err(RegistryError::Validation("module slug must not be empty".to_string()));
    }
    if descriptor.remote_module.trim().is_empty() {
        return Err(RegistryError::Validation(format!(
            "module `{}` has an empty remote_module",
            descriptor.slug
        )));
    }
    if let Some(name_field) = &descriptor.name_field {
        if !descriptor.has_field(name_field) {
            return Err(RegistryError::Validation(format!(
                "module `{}` names `{name_field}` as its name field but does not declare it",
                descriptor.slug
            )));
        }
    }
    for field in &descriptor.field_schema {
        if field.kind.is_reference() && field.reference_target().is_none() {
            return Err(RegistryError::Validation(format!(
                "module `{}` field `{}` is a reference without a lookup target",
                descriptor.slug, field.api_name
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct ModuleTable {
    #[serde(default)]
    module: Vec<ModuleEntry>,
}

#[derive(Debug, Deserialize)]
struct ModuleEntry {
    slug: String,
    remote_module: String,
    #[serde(default)]
    default_related: Vec<String>,
    #[serde(default)]
    optional_related: Vec<String>,
    #[serde(default)]
    fields: Vec<String>,
    name_field: Option<String>,
    display_field: Option<String>,
    person_name_fields: Option<PersonNameFields>,
    context_search_field: Option<String>,
    #[serde(default)]
    directory: bool,
    #[serde(default)]
    list_columns: BTreeMap<String, Vec<String>>,
}

impl ModuleEntry {
    fn into_descriptor(self) -> Result<ModuleDescriptor, RegistryError> {
        let field_schema = self
            .fields
            .iter()
            .map(|entry| parse_field(&self.slug, entry))
            .collect::<Result<Vec<_>, _>>()?;

        let default_related = dedupe(self.default_related);
        let optional_related = dedupe(self.optional_related)
            .into_iter()
            .filter(|list| !default_related.contains(list))
            .collect();

        Ok(ModuleDescriptor {
            slug: self.slug,
            remote_module: self.remote_module,
            default_related,
            optional_related,
            field_schema,
            name_field: self.name_field,
            display_field: self.display_field.unwrap_or_else(|| "Name".to_string()),
            person_name_fields: self.person_name_fields,
            context_search_field: self.context_search_field,
            directory: self.directory,
            list_columns: self.list_columns,
        })
    }
}

fn dedupe(lists: Vec<String>) -> Vec<String> {
    let mut unique = Vec::with_capacity(lists.len());
    for list in lists {
        if !unique.contains(&list) {
            unique.push(list);
        }
    }
    unique
}

fn parse_field(slug: &str, entry: &str) -> Result<FieldSpec, RegistryError> {
    let invalid = |reason: &str| RegistryError::InvalidField {
        slug: slug.to_string(),
        entry: entry.to_string(),
        reason: reason.to_string(),
    };

    let mut parts = entry.split(':').map(str::trim);
    let api_name = parts.next().filter(|name| !name.is_empty()).ok_or_else(|| invalid("missing name"))?;
    let kind = parts.next().ok_or_else(|| invalid("missing kind"))?;
    let kind = parse_kind(kind).ok_or_else(|| invalid("unknown kind"))?;
    let target = parts.next().filter(|target| !target.is_empty()).map(str::to_string);
    if parts.next().is_some() {
        return Err(invalid("too many segments"));
    }

    Ok(FieldSpec { api_name: api_name.to_string(), kind, lookup_target: target })
}

fn parse_kind(raw: &str) -> Option<FieldKind> {
    let kind = match raw.to_ascii_lowercase().as_str() {
        "text" => FieldKind::Text,
        "picklist" => FieldKind::Picklist,
        "currency" => FieldKind::Currency,
        "date" => FieldKind::Date,
        "datetime" => FieldKind::Datetime,
        "boolean" => FieldKind::Boolean,
        "lookup" => FieldKind::Lookup,
        "owner_lookup" => FieldKind::OwnerLookup,
        "user_lookup" => FieldKind::UserLookup,
        "multi_lookup" => FieldKind::MultiLookup,
        "subform" => FieldKind::Subform,
        "formula" => FieldKind::Formula,
        "rollup" => FieldKind::Rollup,
        _ => return None,
    };
    Some(kind)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::{ModuleRegistry, RegistryError};
    use crate::domain::module::FieldKind;

    #[test]
    fn builtin_table_resolves_every_slug_to_a_remote_module() {
        let registry = ModuleRegistry::builtin().expect("builtin table should load");
        assert!(registry.len() >= 10);
        for slug in registry.slugs() {
            let descriptor = registry.resolve(slug).expect("listed slug should resolve");
            assert!(!descriptor.remote_module.is_empty(), "{slug} has an empty remote module");
        }
    }

    #[test]
    fn unknown_slugs_are_not_found() {
        let registry = ModuleRegistry::builtin().expect("builtin table should load");
        assert!(registry.resolve("widgets").is_none());
        assert!(registry.resolve("").is_none());
    }

    #[test]
    fn resolve_is_case_insensitive_and_accepts_remote_names() {
        let registry = ModuleRegistry::builtin().expect("builtin table should load");
        assert_eq!(registry.resolve("Deals").map(|d| d.remote_module.as_str()), Some("Deals"));
        assert_eq!(
            registry.resolve_any("Financial_Goals_New").map(|d| d.slug.as_str()),
            Some("financial_goals_new")
        );
    }

    #[test]
    fn user_directory_is_flagged() {
        let registry = ModuleRegistry::builtin().expect("builtin table should load");
        let users = registry.resolve("users").expect("users module");
        assert!(users.directory);
        assert_eq!(users.remote_module, "users");
    }

    #[test]
    fn field_entries_parse_kind_and_target() {
        let registry = ModuleRegistry::builtin().expect("builtin table should load");
        let tasks = registry.resolve("tasks").expect("tasks module");
        let who = tasks.field("Who_Id").expect("Who_Id field");
        assert_eq!(who.kind, FieldKind::Lookup);
        assert_eq!(who.lookup_target.as_deref(), Some("Contacts"));
        assert_eq!(tasks.name_field.as_deref(), Some("Subject"));
    }

    #[test]
    fn duplicate_slugs_are_rejected() {
        let raw = r#"
[[module]]
slug = "deals"
remote_module = "Deals"

[[module]]
slug = "DEALS"
remote_module = "Deals"
"#;
        let error = ModuleRegistry::from_toml_str(raw).expect_err("duplicates must fail");
        assert!(matches!(error, RegistryError::Validation(ref message) if message.contains("deals")));
    }

    #[test]
    fn reference_fields_without_target_are_rejected() {
        let raw = r#"
[[module]]
slug = "deals"
remote_module = "Deals"
fields = ["Account_Name:lookup"]
"#;
        assert!(matches!(
            ModuleRegistry::from_toml_str(raw),
            Err(RegistryError::Validation(_))
        ));
    }

    #[test]
    fn optional_related_lists_skip_repeats_of_the_defaults() {
        let raw = r#"
[[module]]
slug = "accounts"
remote_module = "Accounts"
default_related = ["Notes", "Deals", "Notes"]
optional_related = ["Deals", "Expenses_New", "Expenses_New"]
"#;
        let registry = ModuleRegistry::from_toml_str(raw).expect("table should load");
        let accounts = registry.resolve("accounts").expect("accounts module");
        assert_eq!(accounts.default_related, vec!["Notes", "Deals"]);
        assert_eq!(accounts.optional_related, vec!["Expenses_New"]);
        assert_eq!(accounts.related_candidates(), vec!["Notes", "Deals", "Expenses_New"]);
    }

    #[test]
    fn unknown_field_kind_names_the_entry() {
        let raw = r#"
[[module]]
slug = "deals"
remote_module = "Deals"
fields = ["Amount:money"]
"#;
        let error = ModuleRegistry::from_toml_str(raw).expect_err("unknown kind must fail");
        assert!(error.to_string().contains("Amount:money"));
    }

    #[test]
    fn load_reads_operator_supplied_table() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("modules.toml");
        fs::write(
            &path,
            r#"
[[module]]
slug = "widgets"
remote_module = "Widgets_New"
name_field = "Name"
fields = ["Name:text", "Owner:owner_lookup"]
"#,
        )
        .expect("write table");

        let registry = ModuleRegistry::load(&path).expect("table should load");
        let widgets = registry.resolve("widgets").expect("widgets module");
        assert_eq!(widgets.remote_module, "Widgets_New");
        assert_eq!(widgets.display_field, "Name");
        assert_eq!(
            widgets.field("Owner").and_then(|f| f.reference_target()),
            Some("Users")
        );
    }
}
