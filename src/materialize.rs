//! Materialize raw values into schema-typed property values, and normalize
//! stored values back into directly comparable primitives.
//!
//! `materialize` is the only way a [`PropertyValue`] gets built from source
//! data, so every write carries the declared type of its property.

use std::collections::BTreeSet;
use std::fmt;

use jiff::civil::DateTime;
use serde_json::Value;

use crate::model::{PropertyType, PropertyValue};

/// Longest text the default store accepts in a single title or text value.
pub const DEFAULT_MAX_TEXT_LENGTH: usize = 2000;

#[derive(Debug, thiserror::Error)]
pub enum MaterializeError {
    #[error("expected a number, found {0}")]
    NotANumber(String),
}

/// Converts `value` into the wire representation for a property of type `ty`.
///
/// Text is truncated to `max_text` characters. Empty inputs become the
/// type's empty value.
pub fn materialize(
    ty: PropertyType,
    value: &Value,
    max_text: usize,
) -> Result<PropertyValue, MaterializeError> {
    let materialized = match ty {
        PropertyType::Title => PropertyValue::Title(truncate(stringify(value), max_text)),
        PropertyType::Text => PropertyValue::Text(truncate(stringify(value), max_text)),
        PropertyType::Number => PropertyValue::Number(to_number(value)?),
        PropertyType::Checkbox => PropertyValue::Checkbox(truthy(value)),
        PropertyType::Date => PropertyValue::Date(to_date(value)),
        PropertyType::Select => PropertyValue::Select(
            truthy(value)
                .then(|| stringify(value).trim().to_string())
                .filter(|s| !s.is_empty()),
        ),
        PropertyType::MultiSelect => PropertyValue::MultiSelect(tokenize(value)),
        PropertyType::Relation => PropertyValue::Relation(match value {
            Value::Array(items) => items
                .iter()
                .map(stringify)
                .filter(|s| !s.is_empty())
                .collect(),
            Value::Null => Vec::new(),
            other => {
                let id = stringify(other);
                if id.is_empty() { Vec::new() } else { vec![id] }
            }
        }),
    };
    Ok(materialized)
}

/// A stored or target value projected into a form that compares directly.
#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    Text(String),
    Number(Option<f64>),
    Choice(Option<String>),
    Choices(BTreeSet<String>),
    /// Leading `YYYY-MM-DD` of the date's start.
    Date(Option<String>),
    Flag(bool),
    /// Relations compare by cardinality only.
    Count(usize),
}

/// Projects a property value into its comparison form.
pub fn normalize(value: &PropertyValue) -> Normalized {
    match value {
        PropertyValue::Title(s) | PropertyValue::Text(s) => Normalized::Text(s.clone()),
        PropertyValue::Number(n) => Normalized::Number(*n),
        PropertyValue::Checkbox(b) => Normalized::Flag(*b),
        PropertyValue::Date(d) => {
            Normalized::Date(d.as_ref().map(|s| s.chars().take(10).collect()))
        }
        PropertyValue::Select(c) => Normalized::Choice(c.clone()),
        PropertyValue::MultiSelect(names) => Normalized::Choices(names.iter().cloned().collect()),
        PropertyValue::Relation(ids) => Normalized::Count(ids.len()),
    }
}

impl fmt::Display for Normalized {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => write!(f, "{s:?}"),
            Self::Number(Some(n)) => write!(f, "{n}"),
            Self::Choice(Some(s)) | Self::Date(Some(s)) => write!(f, "{s}"),
            Self::Number(None) | Self::Choice(None) | Self::Date(None) => f.write_str("null"),
            Self::Choices(names) => {
                let names: Vec<&str> = names.iter().map(String::as_str).collect();
                write!(f, "[{}]", names.join(", "))
            }
            Self::Flag(b) => write!(f, "{b}"),
            Self::Count(n) => write!(f, "{n} item(s)"),
        }
    }
}

/// Splits a value into choice names.
///
/// Lists pass through. Strings split on `,`, `;`, or `|` when any is
/// present, otherwise on whitespace.
pub fn tokenize(value: &Value) -> Vec<String> {
    if let Value::Array(items) = value {
        return items
            .iter()
            .map(|v| stringify(v).trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }
    let s = stringify(value);
    let s = s.trim();
    if s.is_empty() {
        return Vec::new();
    }
    let parts: Vec<&str> = if s.contains([',', ';', '|']) {
        s.split([',', ';', '|']).collect()
    } else {
        s.split_whitespace().collect()
    };
    parts
        .into_iter()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(String::from)
        .collect()
}

/// Renders a raw value as plain text.
///
/// Whole floats print without a trailing `.0`; lists join with spaces.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < 1e15 => {
                #[allow(clippy::cast_possible_truncation)]
                let whole = f as i64;
                whole.to_string()
            }
            _ => n.to_string(),
        },
        Value::Array(items) => items
            .iter()
            .map(stringify)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" "),
        Value::Object(_) => value.to_string(),
    }
}

fn truncate(s: String, max: usize) -> String {
    if s.chars().count() <= max {
        s
    } else {
        s.chars().take(max).collect()
    }
}

fn to_number(value: &Value) -> Result<Option<f64>, MaterializeError> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => Ok(n.as_f64()),
        Value::Bool(b) => Ok(Some(if *b { 1.0 } else { 0.0 })),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .map(Some)
            .ok_or_else(|| MaterializeError::NotANumber(format!("{s:?}"))),
        other => Err(MaterializeError::NotANumber(other.to_string())),
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Date starts pass through unless they are a naive `YYYY-MM-DD HH:MM`,
/// which is combined into `YYYY-MM-DDTHH:MM:00`.
fn to_date(value: &Value) -> Option<String> {
    if !truthy(value) {
        return None;
    }
    let raw = stringify(value);
    let raw = raw.trim();
    if raw.contains('T') && (raw.contains('+') || raw.contains('Z')) {
        return Some(raw.to_string());
    }
    if raw.contains(' ') {
        return Some(match DateTime::strptime("%Y-%m-%d %H:%M", raw) {
            Ok(dt) => dt.strftime("%Y-%m-%dT%H:%M:00").to_string(),
            Err(_) => raw.to_string(),
        });
    }
    Some(raw.to_string())
}
