use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type Fields = Map<String, Value>;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub fields: Fields,
    #[serde(default)]
    pub related: BTreeMap<String, Vec<Record>>,
}

impl Record {
    /// Builds a record from a raw remote row. The `id` key stays in `fields`
    /// so describers see exactly what the store returned.
    pub fn from_fields(fields: Fields) -> Self {
        let id = fields.get("id").and_then(value_as_id).unwrap_or_default();
        Self { id, fields, related: BTreeMap::new() }
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Text form of a field: plain strings, numbers, or a lookup's `name`.
    pub fn text(&self, name: &str) -> Option<String> {
        self.fields.get(name).and_then(display_value)
    }
}

pub(crate) fn value_as_id(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

pub fn display_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) if text.trim().is_empty() => None,
        Value::String(text) => Some(text.clone()),
        Value::Bool(flag) => Some(if *flag { "Yes" } else { "No" }.to_string()),
        Value::Number(number) => Some(number.to_string()),
        Value::Object(object) => object.get("name").and_then(display_value),
        Value::Array(items) => {
            let parts = items.iter().filter_map(display_value).collect::<Vec<_>>();
            (!parts.is_empty()).then(|| parts.join(", "))
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum SkipReason {
    Empty,
    TimedOut,
    Failed(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedList {
    pub list: String,
    #[serde(flatten)]
    pub reason: SkipReason,
}

/// Diagnostics for one composite fetch. Empty and failed related lists are
/// both absent from `Record::related`; only this report tells them apart.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchReport {
    pub module: String,
    pub record_id: String,
    pub fetched: Vec<String>,
    pub skipped: Vec<SkippedList>,
}

impl FetchReport {
    pub fn new(module: impl Into<String>, record_id: impl Into<String>) -> Self {
        Self { module: module.into(), record_id: record_id.into(), ..Self::default() }
    }

    pub fn is_partial(&self) -> bool {
        self.skipped.iter().any(|skip| skip.reason != SkipReason::Empty)
    }

    pub fn skip_reason(&self, list: &str) -> Option<&SkipReason> {
        self.skipped.iter().find(|skip| skip.list == list).map(|skip| &skip.reason)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{display_value, FetchReport, Record, SkipReason, SkippedList};

    #[test]
    fn record_takes_id_from_fields() {
        let fields = json!({"id": "4000000012345", "Deal_Name": "Renewal"});
        let record = Record::from_fields(fields.as_object().cloned().unwrap_or_default());
        assert_eq!(record.id, "4000000012345");
        assert_eq!(record.text("Deal_Name").as_deref(), Some("Renewal"));
    }

    #[test]
    fn display_value_flattens_lookups_and_booleans() {
        assert_eq!(display_value(&json!({"name": "Acme", "id": "1"})).as_deref(), Some("Acme"));
        assert_eq!(display_value(&json!(true)).as_deref(), Some("Yes"));
        assert_eq!(display_value(&json!([{"name": "A"}, {"name": "B"}])).as_deref(), Some("A, B"));
        assert_eq!(display_value(&json!("  ")), None);
    }

    #[test]
    fn empty_lists_do_not_make_a_report_partial() {
        let mut report = FetchReport::new("Deals", "1");
        report.skipped.push(SkippedList { list: "Notes".to_string(), reason: SkipReason::Empty });
        assert!(!report.is_partial());

        report.skipped.push(SkippedList { list: "Quotes".to_string(), reason: SkipReason::TimedOut });
        assert!(report.is_partial());
        assert_eq!(report.skip_reason("Quotes"), Some(&SkipReason::TimedOut));
    }
}
