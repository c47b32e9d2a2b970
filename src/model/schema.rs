//! Schema: the declared type of every property in a database.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The declared type of a single property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PropertyType {
    /// The document title. At most one per schema.
    Title,
    #[serde(alias = "rich-text", alias = "rich_text")]
    Text,
    Number,
    #[serde(alias = "boolean")]
    Checkbox,
    Date,
    /// Single choice.
    Select,
    /// Multiple choice.
    #[serde(alias = "multi_select")]
    MultiSelect,
    /// Links to other documents, stored as ids.
    Relation,
}

impl PropertyType {
    /// The stable name used in storage and configuration.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Title => "title",
            Self::Text => "text",
            Self::Number => "number",
            Self::Checkbox => "checkbox",
            Self::Date => "date",
            Self::Select => "select",
            Self::MultiSelect => "multi-select",
            Self::Relation => "relation",
        }
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PropertyType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "title" => Ok(Self::Title),
            "text" | "rich-text" | "rich_text" => Ok(Self::Text),
            "number" => Ok(Self::Number),
            "checkbox" | "boolean" => Ok(Self::Checkbox),
            "date" => Ok(Self::Date),
            "select" => Ok(Self::Select),
            "multi-select" | "multi_select" => Ok(Self::MultiSelect),
            "relation" => Ok(Self::Relation),
            other => Err(format!("unknown property type: {other}")),
        }
    }
}

/// Property name to declared type, in declaration order.
///
/// Owned by the sink store. The reconciler reads it once per run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    fields: Vec<(String, PropertyType)>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`Schema::insert`].
    #[cfg(test)]
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, ty: PropertyType) -> Self {
        self.insert(name, ty);
        self
    }

    /// Declares a property, replacing the type of an existing one in place.
    pub fn insert(&mut self, name: impl Into<String>, ty: PropertyType) {
        let name = name.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = ty,
            None => self.fields.push((name, ty)),
        }
    }

    pub fn get(&self, name: &str) -> Option<PropertyType> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, ty)| *ty)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, PropertyType)> {
        self.fields.iter().map(|(n, ty)| (n.as_str(), *ty))
    }

    /// The first title property, if any.
    pub fn title_field(&self) -> Option<&str> {
        self.iter()
            .find(|(_, ty)| *ty == PropertyType::Title)
            .map(|(n, _)| n)
    }

    /// All date properties in declaration order.
    pub fn date_fields(&self) -> impl Iterator<Item = &str> {
        self.iter()
            .filter(|(_, ty)| *ty == PropertyType::Date)
            .map(|(n, _)| n)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<N: Into<String>> FromIterator<(N, PropertyType)> for Schema {
    fn from_iter<I: IntoIterator<Item = (N, PropertyType)>>(iter: I) -> Self {
        let mut schema = Self::new();
        for (name, ty) in iter {
            schema.insert(name, ty);
        }
        schema
    }
}
