//! Natural keys: what makes two records "the same event" across runs.

use std::fmt;

use jiff::civil::Date;
use serde_json::Value;

/// Identifies one real-world event across sync runs.
///
/// Usually a calendar date, optionally narrowed by equality terms
/// (activity type, activity name). Keys without a date rely on terms alone.
#[derive(Debug, Clone, PartialEq)]
pub struct NaturalKey {
    pub date: Option<Date>,
    pub terms: Vec<KeyTerm>,
}

/// A single `property = value` constraint within a key.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyTerm {
    pub property: String,
    pub value: Value,
}

impl NaturalKey {
    /// A key identified by its date alone.
    pub fn date(date: Date) -> Self {
        Self {
            date: Some(date),
            terms: Vec::new(),
        }
    }

    /// A key identified by its terms alone.
    pub fn terms(terms: Vec<KeyTerm>) -> Self {
        Self { date: None, terms }
    }

    #[must_use]
    pub fn with_term(mut self, property: impl Into<String>, value: impl Into<Value>) -> Self {
        self.terms.push(KeyTerm {
            property: property.into(),
            value: value.into(),
        });
        self
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(date) = self.date {
            write!(f, "{date}")?;
        }
        if !self.terms.is_empty() {
            if self.date.is_some() {
                f.write_str(" ")?;
            }
            let terms: Vec<String> = self
                .terms
                .iter()
                .map(|t| match &t.value {
                    Value::String(s) => format!("{}={s}", t.property),
                    other => format!("{}={other}", t.property),
                })
                .collect();
            write!(f, "[{}]", terms.join(", "))?;
        }
        Ok(())
    }
}
