//! Plain-text renderings of records for prompts and search summaries.

use std::fmt::Write as _;

use clientdesk_core::domain::module::{FieldKind, ModuleDescriptor};
use clientdesk_core::domain::record::{display_value, Fields, Record};
use serde_json::Value;

const RELATED_KEY_LIMIT: usize = 5;
const PRIORITY_KEYWORDS: [&str; 8] = ["name", "subject", "stage", "amount", "total", "status", "date", "role"];

pub fn describe_record(descriptor: &ModuleDescriptor, record: &Record) -> String {
    let mut out = format!("=== {} DETAILS ===\n", descriptor.remote_module.to_ascii_uppercase());
    if !record.id.is_empty() {
        let _ = writeln!(out, "ID: {}", record.id);
    }

    for field in &descriptor.field_schema {
        let Some(value) = record.field(&field.api_name) else {
            continue;
        };
        if field.kind == FieldKind::Subform {
            write_subform(&mut out, &field.api_name, value);
            continue;
        }
        if let Some(text) = display_value(value) {
            let _ = writeln!(out, "{}: {text}", label(&field.api_name));
        }
    }

    out.push_str("\n--- RELATED LISTS ---\n");
    if record.related.is_empty() {
        out.push_str("(No related records found)\n");
    }
    for (list, rows) in &record.related {
        let _ = writeln!(out, "\n# {} ({} items)", label(list), rows.len());
        let columns = descriptor.list_columns.get(list);
        for (position, row) in rows.iter().enumerate() {
            let _ = writeln!(out, "  {}. {}", position + 1, related_row(row, columns.map(Vec::as_slice)));
        }
    }

    out.trim_end().to_string()
}

/// Summary of search results; the id of every row is always shown.
pub fn describe_results(descriptor: &ModuleDescriptor, rows: &[Record]) -> String {
    if rows.is_empty() {
        return format!("No {} found.", descriptor.remote_module);
    }

    let mut out = format!("=== FOUND {} {} ===\n", rows.len(), descriptor.remote_module.to_ascii_uppercase());
    for (position, row) in rows.iter().enumerate() {
        let _ = writeln!(out, "\n--- #{} ---", position + 1);
        let _ = writeln!(out, "ID: {}", row.id);
        if let Some(name) = record_title(descriptor, row) {
            let _ = writeln!(out, "Name: {name}");
        }
        for (key, value) in &row.fields {
            if is_hidden_key(key) || Some(key.as_str()) == descriptor.name_field.as_deref() {
                continue;
            }
            if let Some(text) = display_value(value) {
                let _ = writeln!(out, "{key}: {text}");
            }
        }
    }

    out.trim_end().to_string()
}

/// The most human-friendly name for a row of this module.
pub fn record_title(descriptor: &ModuleDescriptor, record: &Record) -> Option<String> {
    if let Some(names) = &descriptor.person_name_fields {
        let parts = [record.text(&names.first), record.text(&names.last)]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>();
        if !parts.is_empty() {
            return Some(parts.join(" "));
        }
    }

    descriptor
        .name_field
        .as_deref()
        .and_then(|field| record.text(field))
        .or_else(|| record.text(&descriptor.display_field))
}

fn write_subform(out: &mut String, name: &str, value: &Value) {
    let Value::Array(rows) = value else {
        return;
    };
    if rows.is_empty() {
        return;
    }

    let _ = writeln!(out, "\n--- {} (Subform) ---", label(name));
    for (position, row) in rows.iter().enumerate() {
        let Value::Object(row) = row else {
            continue;
        };
        let details = row
            .iter()
            .filter(|(key, _)| !is_hidden_key(key) && key.as_str() != "s_id")
            .filter_map(|(key, value)| display_value(value).map(|text| format!("{key}: {text}")))
            .collect::<Vec<_>>();
        let _ = writeln!(out, "  {}. {}", position + 1, details.join(", "));
    }
}

fn related_row(row: &Record, columns: Option<&[String]>) -> String {
    let mut parts = Vec::new();
    if !row.id.is_empty() {
        parts.push(format!("ID: {}", row.id));
    }

    match columns {
        Some(columns) => {
            for column in columns {
                if let Some(text) = row.text(column) {
                    parts.push(format!("{column}: {text}"));
                }
            }
        }
        None => {
            for key in priority_keys(&row.fields).into_iter().take(RELATED_KEY_LIMIT) {
                if let Some(text) = row.text(key) {
                    parts.push(format!("{key}: {text}"));
                }
            }
        }
    }

    parts.join(" | ")
}

/// Scalar, non-empty keys ordered by how early a priority keyword appears in them.
fn priority_keys(fields: &Fields) -> Vec<&str> {
    let mut keys = fields
        .iter()
        .filter(|(key, value)| {
            let scalar = match value {
                Value::String(text) => !text.trim().is_empty(),
                Value::Number(_) => true,
                _ => false,
            };
            scalar && !is_hidden_key(key)
        })
        .map(|(key, _)| key.as_str())
        .collect::<Vec<_>>();
    keys.sort_by_key(|key| {
        let lowered = key.to_ascii_lowercase();
        PRIORITY_KEYWORDS.iter().position(|keyword| lowered.contains(keyword)).unwrap_or(PRIORITY_KEYWORDS.len())
    });
    keys
}

fn is_hidden_key(key: &str) -> bool {
    key.eq_ignore_ascii_case("id") || key.starts_with('$') || key == "Tag"
}

fn label(api_name: &str) -> String {
    api_name.trim_start_matches("Related_").replace('_', " ")
}
