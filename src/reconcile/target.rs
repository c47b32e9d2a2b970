//! Target construction: the full materialized property set for one key.

use jiff::Timestamp;
use serde_json::Value;
use tracing::debug;

use crate::materialize::materialize;
use crate::model::{Fields, NaturalKey, Properties, PropertyType, PropertyValue, Schema};

use super::{ReconcileError, ReconcilerOptions, WriteMode};

/// Everything needed to materialize a target for one key.
pub(super) struct TargetBuilder<'a> {
    pub schema: &'a Schema,
    pub options: &'a ReconcilerOptions,
    pub date_field: Option<&'a str>,
    pub max_text: usize,
}

impl TargetBuilder<'_> {
    /// Materializes `desired` against the schema and enforces the key.
    ///
    /// Supplied fields win over key-derived dates and titles; key terms
    /// always win. Fields outside the schema are skipped. In overwrite mode
    /// every remaining schema field is cleared.
    pub fn build(
        &self,
        key: &NaturalKey,
        desired: &Fields,
        mode: WriteMode,
        now: Timestamp,
    ) -> Result<Properties, ReconcileError> {
        let mut target = Properties::new();

        for (field, value) in desired {
            let Some(ty) = self.schema.get(field) else {
                debug!(%key, %field, "skipping field not in schema");
                continue;
            };
            target.insert(field.clone(), self.materialize(key, field, ty, value)?);
        }

        if let Some(date) = key.date {
            let iso = date.to_string();
            let date_fields = self
                .options
                .preferred_date_fields
                .iter()
                .map(String::as_str)
                .chain(self.date_field)
                .filter(|f| self.schema.get(f) == Some(PropertyType::Date));
            for field in date_fields {
                target
                    .entry(field.to_string())
                    .or_insert_with(|| PropertyValue::Date(Some(iso.clone())));
            }
            if let Some(title) = self.schema.title_field()
                && !key.terms.iter().any(|t| t.property == title)
            {
                target
                    .entry(title.to_string())
                    .or_insert_with(|| PropertyValue::Title(iso.clone()));
            }
        }

        for term in &key.terms {
            if let Some(ty) = self.schema.get(&term.property) {
                let value = self.materialize(key, &term.property, ty, &term.value)?;
                target.insert(term.property.clone(), value);
            }
        }

        if let Some(field) = self.options.synced_at_field.as_deref()
            && self.schema.get(field) == Some(PropertyType::Date)
        {
            target.insert(field.to_string(), PropertyValue::Date(Some(now.to_string())));
        }

        if mode == WriteMode::Overwrite {
            for (field, ty) in self.schema.iter() {
                target
                    .entry(field.to_string())
                    .or_insert_with(|| PropertyValue::empty(ty));
            }
        }

        Ok(target)
    }

    fn materialize(
        &self,
        key: &NaturalKey,
        field: &str,
        ty: PropertyType,
        value: &Value,
    ) -> Result<PropertyValue, ReconcileError> {
        materialize(ty, value, self.max_text).map_err(|source| ReconcileError::Materialize {
            key: key.to_string(),
            field: field.to_string(),
            source,
        })
    }
}
