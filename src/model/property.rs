//! Property values: the typed wire representation written to the sink.

use serde::{Deserialize, Serialize};

use super::PropertyType;

/// A property value tagged with its schema type.
///
/// Values are only ever built for their declared type, so a mistyped write
/// is caught before it reaches the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "kebab-case")]
pub enum PropertyValue {
    Title(String),
    Text(String),
    Number(Option<f64>),
    Checkbox(bool),
    /// ISO date or date-time start.
    Date(Option<String>),
    Select(Option<String>),
    MultiSelect(Vec<String>),
    /// Ids of related documents.
    Relation(Vec<String>),
}

impl PropertyValue {
    /// The empty value used to clear a property of the given type.
    pub fn empty(ty: PropertyType) -> Self {
        match ty {
            PropertyType::Title => Self::Title(String::new()),
            PropertyType::Text => Self::Text(String::new()),
            PropertyType::Number => Self::Number(None),
            PropertyType::Checkbox => Self::Checkbox(false),
            PropertyType::Date => Self::Date(None),
            PropertyType::Select => Self::Select(None),
            PropertyType::MultiSelect => Self::MultiSelect(Vec::new()),
            PropertyType::Relation => Self::Relation(Vec::new()),
        }
    }

    pub fn property_type(&self) -> PropertyType {
        match self {
            Self::Title(_) => PropertyType::Title,
            Self::Text(_) => PropertyType::Text,
            Self::Number(_) => PropertyType::Number,
            Self::Checkbox(_) => PropertyType::Checkbox,
            Self::Date(_) => PropertyType::Date,
            Self::Select(_) => PropertyType::Select,
            Self::MultiSelect(_) => PropertyType::MultiSelect,
            Self::Relation(_) => PropertyType::Relation,
        }
    }

    /// The plain string form for title, text, select, and date values.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Title(s) | Self::Text(s) => Some(s),
            Self::Select(s) | Self::Date(s) => s.as_deref(),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => *n,
            _ => None,
        }
    }
}
