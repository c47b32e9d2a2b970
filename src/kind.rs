//! Record kinds: how each kind of telemetry maps onto keyed writes.
//!
//! A kind knows which day a raw record belongs to, which natural key
//! identifies it, and which fields to write. The sync driver does the rest.

mod activity;
mod daily;
mod personal_record;
mod sleep;
mod steps;

use jiff::civil::Date;
use jiff::tz::TimeZone;
use jiff::{Timestamp, Zoned};
use serde_json::Value;
use uuid::Uuid;

use crate::model::{Fields, NaturalKey, Record};
use crate::reconcile::{ReconcileError, Reconciler, UpsertOutcome, WriteMode};
use crate::storage::SinkStore;

pub use activity::Activities;
pub use daily::{DailyInputs, DailyRollup, calendar_day};
pub use personal_record::PersonalRecords;
pub use sleep::Sleep;
pub use steps::Steps;

/// Settings shared by every kind.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Zone used to turn UTC instants into local dates and times.
    pub time_zone: TimeZone,

    /// Nightly sleep at or above this many hours meets the goal.
    pub sleep_goal_hours: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            time_zone: TimeZone::system(),
            sleep_goal_hours: 8.0,
        }
    }
}

/// What reconciling one key did.
#[derive(Debug, Clone)]
pub enum KindOutcome {
    Upserted(UpsertOutcome),

    /// An older document was archived and replaced by a new one.
    Superseded {
        archived: Uuid,
        outcome: UpsertOutcome,
    },

    /// Nothing written.
    Skipped(String),
}

pub trait RecordKind {
    fn name(&self) -> &'static str;

    /// The day a record belongs to, used for windowing and ordering.
    fn day_of(&self, record: &Record) -> Option<Date>;

    /// `None` when the record lacks what its key needs.
    fn key(&self, record: &Record) -> Option<NaturalKey>;

    fn fields(&self, record: &Record) -> Fields;

    /// Whether the record is worth writing at all.
    fn accept(&self, _record: &Record) -> bool {
        true
    }

    fn mode(&self) -> WriteMode {
        WriteMode::Overwrite
    }

    /// Writes one keyed record.
    fn reconcile<S: SinkStore + ?Sized>(
        &self,
        reconciler: &Reconciler<'_, S>,
        key: &NaturalKey,
        record: &Record,
        mode: WriteMode,
    ) -> Result<KindOutcome, ReconcileError> {
        reconciler
            .upsert(key, &self.fields(record), mode)
            .map(KindOutcome::Upserted)
    }
}

// ── Record access ──

/// Follows a path of object keys.
fn lookup<'r>(record: &'r Record, path: &[&str]) -> Option<&'r Value> {
    let (first, rest) = path.split_first()?;
    let mut value = record.get(*first)?;
    for key in rest {
        value = value.as_object()?.get(*key)?;
    }
    Some(value)
}

fn number(record: &Record, path: &[&str]) -> Option<f64> {
    lookup(record, path).and_then(Value::as_f64)
}

fn text<'r>(record: &'r Record, path: &[&str]) -> Option<&'r str> {
    lookup(record, path)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

/// The first of `keys` with a non-empty value, as text.
fn first_present(record: &Record, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match record.get(*k)? {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    })
}

/// `null` for missing numbers, so overwrite clears them.
fn number_or_null(value: Option<f64>) -> Value {
    value.map_or(Value::Null, Value::from)
}

/// `SOME_LABEL_NAME` → `Some Label Name`.
fn title_case(s: &str) -> String {
    s.split(['_', ' '])
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Epoch milliseconds as a local date-time in `tz`.
fn local_time(millis: i64, tz: &TimeZone) -> Option<Zoned> {
    Timestamp::from_millisecond(millis)
        .ok()
        .map(|ts| ts.to_zoned(tz.clone()))
}

/// ISO 8601 with offset, truncated to the minute.
fn minute_iso(zoned: &Zoned) -> String {
    zoned.strftime("%Y-%m-%dT%H:%M:00%:z").to_string()
}

#[cfg(test)]
fn record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        other => panic!("not an object: {other}"),
    }
}
