//! Field-level diff between a document's current properties and a target.

use std::fmt;

use crate::materialize::{Normalized, normalize};
use crate::model::Properties;

/// One field whose normalized value differs from the target.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldChange {
    pub field: String,

    /// `None` when the document has no value for the field at all.
    pub old: Option<Normalized>,
    pub new: Normalized,
}

impl fmt::Display for FieldChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.old {
            Some(old) => write!(f, "{}: {old} -> {}", self.field, self.new),
            None => write!(f, "{}: (absent) -> {}", self.field, self.new),
        }
    }
}

/// Every target field whose normalized value differs from `current`, or
/// that `current` lacks.
pub fn diff(current: &Properties, target: &Properties) -> Vec<FieldChange> {
    target
        .iter()
        .filter_map(|(field, want)| {
            let new = normalize(want);
            let old = current.get(field).map(normalize);
            (old.as_ref() != Some(&new)).then(|| FieldChange {
                field: field.clone(),
                old,
                new,
            })
        })
        .collect()
}
