//! JSON export files: a saved API response, one record or an array of them.

use std::fs;
use std::path::PathBuf;

use jiff::civil::Date;
use serde_json::Value;
use tracing::debug;

use crate::model::{DayRange, Record};

use super::{SourceError, SourceProvider};

/// Reads records from a JSON file and keeps those whose day falls in the
/// requested range.
///
/// The file is re-read on every fetch.
pub struct JsonExport<F> {
    path: PathBuf,
    day_of: F,
}

impl<F> JsonExport<F>
where
    F: Fn(&Record) -> Option<Date>,
{
    /// `day_of` decides which day a record belongs to. Records without a
    /// day are dropped.
    pub fn new(path: impl Into<PathBuf>, day_of: F) -> Self {
        Self {
            path: path.into(),
            day_of,
        }
    }

    fn load(&self) -> Result<Vec<Record>, SourceError> {
        let contents = fs::read_to_string(&self.path).map_err(|source| SourceError::Read {
            path: self.path.clone(),
            source,
        })?;
        let value: Value = serde_json::from_str(&contents).map_err(|source| SourceError::Parse {
            path: self.path.clone(),
            source,
        })?;

        match value {
            Value::Object(record) => Ok(vec![record]),
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::Object(record) => Ok(record),
                    other => Err(SourceError::Shape {
                        path: self.path.clone(),
                        found: kind_of(&other),
                    }),
                })
                .collect(),
            other => Err(SourceError::Shape {
                path: self.path.clone(),
                found: kind_of(&other),
            }),
        }
    }
}

impl<F> SourceProvider for JsonExport<F>
where
    F: Fn(&Record) -> Option<Date>,
{
    fn fetch(&self, range: &DayRange) -> Result<Vec<Record>, SourceError> {
        let records = self.load()?;
        let total = records.len();
        let kept: Vec<Record> = records
            .into_iter()
            .filter(|r| (self.day_of)(r).is_some_and(|d| range.contains(d)))
            .collect();
        debug!(
            path = %self.path.display(),
            total,
            kept = kept.len(),
            %range,
            "loaded export"
        );
        Ok(kept)
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
