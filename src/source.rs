//! Source providers: where raw telemetry records come from.
//!
//! A provider yields loosely-typed records for a window of days. Records are
//! never persisted locally; the sync driver turns them into keyed writes.

mod export;

use std::io;
use std::path::PathBuf;

use jiff::civil::Date;

use crate::model::{DayRange, Record};

pub use export::JsonExport;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("invalid JSON in {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("{path}: expected an object or an array of objects, found {found}")]
    Shape { path: PathBuf, found: &'static str },
}

/// Yields raw records for a window of days.
pub trait SourceProvider {
    fn fetch(&self, range: &DayRange) -> Result<Vec<Record>, SourceError>;
}

impl<P: SourceProvider + ?Sized> SourceProvider for &P {
    fn fetch(&self, range: &DayRange) -> Result<Vec<Record>, SourceError> {
        (**self).fetch(range)
    }
}

/// Parses the leading `YYYY-MM-DD` of a date or date-time string.
pub fn leading_date(s: &str) -> Option<Date> {
    s.trim().get(..10)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    use jiff::civil::date;

    #[test]
    fn leading_date_accepts_dates_and_datetimes() {
        assert_eq!(leading_date("2024-05-01"), Some(date(2024, 5, 1)));
        assert_eq!(leading_date("2024-05-01 07:30:00"), Some(date(2024, 5, 1)));
        assert_eq!(leading_date("2024-05-01T07:30:00.0"), Some(date(2024, 5, 1)));
    }

    #[test]
    fn leading_date_rejects_garbage() {
        assert_eq!(leading_date(""), None);
        assert_eq!(leading_date("yesterday"), None);
        assert_eq!(leading_date("2024-13-01"), None);
    }
}
