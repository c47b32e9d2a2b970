//! Query filters understood by the sink store.

use jiff::civil::Date;

use super::{Properties, PropertyValue};

/// A predicate over a document's properties.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// The date property's stored start equals `date` exactly.
    ///
    /// A stored date-time does not equal its date-only prefix.
    DateEquals { property: String, date: String },

    /// The date property's calendar day falls in `[on_or_after, before)`.
    DateRange {
        property: String,
        on_or_after: Date,
        before: Date,
    },

    /// A title, text, or select property equals `value`.
    TextEquals { property: String, value: String },

    NumberEquals { property: String, value: f64 },

    /// All inner filters match. An empty conjunction matches everything.
    And(Vec<Filter>),
}

impl Filter {
    /// Conjoins `self` with `others`, flattening when there is nothing to add.
    #[must_use]
    pub fn and(self, others: &[Filter]) -> Self {
        if others.is_empty() {
            return self;
        }
        let mut all = Vec::with_capacity(others.len() + 1);
        all.push(self);
        all.extend_from_slice(others);
        Self::And(all)
    }

    pub fn matches(&self, properties: &Properties) -> bool {
        match self {
            Self::DateEquals { property, date } => matches!(
                properties.get(property),
                Some(PropertyValue::Date(Some(start))) if start == date
            ),
            Self::DateRange {
                property,
                on_or_after,
                before,
            } => {
                let Some(PropertyValue::Date(Some(start))) = properties.get(property) else {
                    return false;
                };
                let Some(day) = start.get(..10).and_then(|s| s.parse::<Date>().ok()) else {
                    return false;
                };
                day >= *on_or_after && day < *before
            }
            Self::TextEquals { property, value } => match properties.get(property) {
                Some(
                    PropertyValue::Title(s) | PropertyValue::Text(s) | PropertyValue::Select(Some(s)),
                ) => s == value,
                _ => false,
            },
            Self::NumberEquals { property, value } => matches!(
                properties.get(property),
                Some(PropertyValue::Number(Some(n))) if (n - value).abs() < f64::EPSILON
            ),
            Self::And(filters) => filters.iter().all(|f| f.matches(properties)),
        }
    }
}
