use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Picklist,
    Currency,
    Date,
    Datetime,
    Boolean,
    Lookup,
    OwnerLookup,
    UserLookup,
    MultiLookup,
    Subform,
    Formula,
    Rollup,
}

impl FieldKind {
    /// Kinds whose written value must be a remote record id.
    pub fn is_reference(self) -> bool {
        matches!(self, Self::Lookup | Self::OwnerLookup | Self::UserLookup | Self::MultiLookup)
    }

    /// Computed server-side; never accepted in a write.
    pub fn is_computed(self) -> bool {
        matches!(self, Self::Formula | Self::Rollup)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Picklist => "picklist",
            Self::Currency => "currency",
            Self::Date => "date",
            Self::Datetime => "datetime",
            Self::Boolean => "boolean",
            Self::Lookup => "lookup",
            Self::OwnerLookup => "owner_lookup",
            Self::UserLookup => "user_lookup",
            Self::MultiLookup => "multi_lookup",
            Self::Subform => "subform",
            Self::Formula => "formula",
            Self::Rollup => "rollup",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub api_name: String,
    pub kind: FieldKind,
    #[serde(default)]
    pub lookup_target: Option<String>,
}

impl FieldSpec {
    pub fn new(api_name: impl Into<String>, kind: FieldKind) -> Self {
        Self { api_name: api_name.into(), kind, lookup_target: None }
    }

    pub fn lookup(api_name: impl Into<String>, kind: FieldKind, target: impl Into<String>) -> Self {
        Self { api_name: api_name.into(), kind, lookup_target: Some(target.into()) }
    }

    /// The remote module a reference field points at. Owner and user lookups
    /// always land in the user directory even when the schema omits a target.
    pub fn reference_target(&self) -> Option<&str> {
        match (&self.lookup_target, self.kind) {
            (Some(target), kind) if kind.is_reference() => Some(target.as_str()),
            (None, FieldKind::OwnerLookup | FieldKind::UserLookup) => Some("Users"),
            _ => None,
        }
    }
}

/// First/last name pair used to match person-like modules by display name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonNameFields {
    pub first: String,
    pub last: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    pub slug: String,
    pub remote_module: String,
    #[serde(default)]
    pub default_related: Vec<String>,
    /// Extra lists a model-driven selection may pick beyond the defaults.
    #[serde(default)]
    pub optional_related: Vec<String>,
    #[serde(default)]
    pub field_schema: Vec<FieldSpec>,
    #[serde(default)]
    pub name_field: Option<String>,
    #[serde(default = "default_display_field")]
    pub display_field: String,
    #[serde(default)]
    pub person_name_fields: Option<PersonNameFields>,
    #[serde(default)]
    pub context_search_field: Option<String>,
    #[serde(default)]
    pub directory: bool,
    #[serde(default)]
    pub list_columns: BTreeMap<String, Vec<String>>,
}

fn default_display_field() -> String {
    "Name".to_string()
}

impl ModuleDescriptor {
    pub fn field(&self, api_name: &str) -> Option<&FieldSpec> {
        self.field_schema.iter().find(|field| field.api_name == api_name)
    }

    pub fn has_field(&self, api_name: &str) -> bool {
        self.field(api_name).is_some()
    }

    /// Default lists first, then the optional ones, without repeats.
    pub fn related_candidates(&self) -> Vec<&str> {
        let mut candidates: Vec<&str> = Vec::new();
        for list in self.default_related.iter().chain(&self.optional_related) {
            if !candidates.contains(&list.as_str()) {
                candidates.push(list);
            }
        }
        candidates
    }

    pub fn reference_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.field_schema.iter().filter(|field| field.kind.is_reference())
    }

    /// The first reference field that points at `remote_module`.
    pub fn reference_field_for(&self, remote_module: &str) -> Option<&FieldSpec> {
        self.reference_fields().find(|field| {
            field
                .reference_target()
                .map(|target| target.eq_ignore_ascii_case(remote_module))
                .unwrap_or(false)
        })
    }
}
