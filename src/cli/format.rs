//! Output formatting for CLI display.

use crate::model::{PropertyValue, RemoteDocument};

/// Format a property value for human-readable display.
pub(super) fn format_value(value: &PropertyValue) -> String {
    match value {
        PropertyValue::Title(s) | PropertyValue::Text(s) => s.clone(),
        PropertyValue::Number(Some(n)) => n.to_string(),
        PropertyValue::Checkbox(b) => if *b { "yes" } else { "no" }.to_string(),
        PropertyValue::Date(Some(s)) | PropertyValue::Select(Some(s)) => s.clone(),
        PropertyValue::Number(None) | PropertyValue::Date(None) | PropertyValue::Select(None) => {
            "-".to_string()
        }
        PropertyValue::MultiSelect(names) => names.join(", "),
        PropertyValue::Relation(ids) => format!("{} linked", ids.len()),
    }
}

/// Format a document as a header line followed by one indented line per
/// property.
pub(super) fn format_document(document: &RemoteDocument) -> String {
    let short_id = &document.id.to_string()[..8];
    let mut out = format!("{short_id}  created {}", document.created_at);
    let width = document
        .properties
        .keys()
        .map(String::len)
        .max()
        .unwrap_or(0);
    for (name, value) in &document.properties {
        out.push_str(&format!("\n  {name:<width$}  {}", format_value(value)));
    }
    out
}
