//! Nightly sleep summaries, one row per night.
//!
//! Stages arrive in seconds and are written in hours. Start and end arrive
//! as epoch milliseconds and are written as local date-times.

use jiff::civil::Date;
use serde_json::{Map, Value};

use crate::aggregate::round_to;
use crate::materialize::stringify;
use crate::model::{Fields, NaturalKey, Record};
use crate::source::leading_date;

use super::{RecordKind, Settings, local_time, lookup, minute_iso, number, number_or_null, text};

const STAGES: [&str; 3] = ["deepSleepSeconds", "lightSleepSeconds", "remSleepSeconds"];

/// Scores written as their bare qualifier.
const QUALIFIERS: [(&str, &str); 4] = [
    ("overall", "Sleep Overall (q)"),
    ("totalDuration", "Sleep Duration (q)"),
    ("stress", "Sleep Stress (q)"),
    ("restlessness", "Sleep Restlessness (q)"),
];

/// Scores written as `value(qualifier)`, tried under each source key in turn.
const DETAILED: [(&[&str], &str); 4] = [
    (&["awakeCount"], "Sleep Awake Count (q)"),
    (&["remPercentage"], "Sleep REM % (q)"),
    (&["lightPercentage", "light_percentage"], "Sleep Light % (q)"),
    (&["deepPercentage", "deep_percentage"], "Sleep Deep % (q)"),
];

pub struct Sleep {
    settings: Settings,
}

impl Sleep {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }
}

/// Seconds spent asleep: deep, light, and REM. Awake time doesn't count.
pub(super) fn total_seconds(record: &Record) -> f64 {
    STAGES
        .iter()
        .filter_map(|stage| number(record, &["dailySleepDTO", *stage]))
        .sum()
}

fn hours(seconds: f64) -> f64 {
    round_to(seconds / 3600.0, 2)
}

fn stage_hours(record: &Record, stage: &str) -> Value {
    Value::from(hours(number(record, &["dailySleepDTO", stage]).unwrap_or(0.0)))
}

/// `7h 5m`, whole minutes.
fn duration_text(seconds: f64) -> String {
    #[allow(clippy::cast_possible_truncation)]
    let minutes = (seconds / 60.0).floor() as i64;
    format!("{}h {}m", minutes / 60, minutes % 60)
}

/// The first timestamp found under any of `keys`, in the sleep summary or
/// at the top level.
fn timestamp_millis(record: &Record, keys: &[&str]) -> Option<i64> {
    keys.iter().find_map(|k| {
        lookup(record, &["dailySleepDTO", *k])
            .or_else(|| record.get(*k))
            .and_then(Value::as_i64)
            .filter(|ms| *ms != 0)
    })
}

/// Local start and end of the night, in the configured zone.
pub(super) fn window(record: &Record, settings: &Settings) -> (Option<String>, Option<String>) {
    let at = |keys: &[&str]| {
        timestamp_millis(record, keys)
            .and_then(|ms| local_time(ms, &settings.time_zone))
            .map(|z| minute_iso(&z))
    };
    (
        at(&["sleepStartTimestampGMT", "sleepStartTimestampLocal"]),
        at(&["sleepEndTimestampGMT", "sleepEndTimestampLocal"]),
    )
}

pub(super) fn resting_heart_rate(record: &Record) -> Option<f64> {
    number(record, &["restingHeartRate"]).or_else(|| number(record, &["dailySleepDTO", "restingHeartRate"]))
}

fn qualifier(item: &Map<String, Value>) -> Option<&str> {
    item.get("qualifierKey")
        .or_else(|| item.get("qualifier"))
        .and_then(Value::as_str)
}

/// `22(FAIR)`, or `None(EXCELLENT)` when only the qualifier is known.
fn score_text(item: &Map<String, Value>) -> String {
    let score = ["score", "value", "percentage"]
        .iter()
        .find_map(|k| item.get(*k).filter(|v| !v.is_null()))
        .map_or_else(|| "None".to_string(), stringify);
    match qualifier(item) {
        Some(q) => format!("{score}({q})"),
        None => score,
    }
}

/// The eight sleep-score fields, `null` where the export has no such score.
pub(super) fn score_fields(record: &Record) -> Vec<(&'static str, Value)> {
    let scores = record
        .get("sleepScores")
        .or_else(|| lookup(record, &["dailySleepDTO", "sleepScores"]))
        .and_then(Value::as_object);
    let item = |key: &str| scores.and_then(|s| s.get(key)).and_then(Value::as_object);

    let mut fields = Vec::with_capacity(QUALIFIERS.len() + DETAILED.len());
    for (key, field) in QUALIFIERS {
        let q = item(key).and_then(qualifier);
        fields.push((field, q.map_or(Value::Null, Value::from)));
    }
    for (keys, field) in DETAILED {
        let text = keys.iter().find_map(|k| item(*k)).map(score_text);
        fields.push((field, text.map_or(Value::Null, Value::from)));
    }
    fields
}

pub(super) fn calendar_date(record: &Record) -> Option<Date> {
    text(record, &["dailySleepDTO", "calendarDate"]).and_then(leading_date)
}

impl RecordKind for Sleep {
    fn name(&self) -> &'static str {
        "sleep"
    }

    fn day_of(&self, record: &Record) -> Option<Date> {
        calendar_date(record)
    }

    fn key(&self, record: &Record) -> Option<NaturalKey> {
        self.day_of(record).map(NaturalKey::date)
    }

    /// Nights with no recorded sleep are skipped.
    fn accept(&self, record: &Record) -> bool {
        total_seconds(record) > 0.0
    }

    fn fields(&self, record: &Record) -> Fields {
        let total = total_seconds(record);
        let (start, end) = window(record, &self.settings);
        let span = |z: &Option<String>| z.as_deref().and_then(|s| s.get(11..16)).unwrap_or("?").to_string();

        let mut fields = Fields::from([
            ("Sleep Total (h)".to_string(), Value::from(hours(total))),
            ("Sleep Light (h)".to_string(), stage_hours(record, "lightSleepSeconds")),
            ("Sleep Deep (h)".to_string(), stage_hours(record, "deepSleepSeconds")),
            ("Sleep REM (h)".to_string(), stage_hours(record, "remSleepSeconds")),
            ("Sleep Awake (h)".to_string(), stage_hours(record, "awakeSleepSeconds")),
            ("Sleep Duration".to_string(), Value::from(duration_text(total))),
            (
                "Sleep Window".to_string(),
                Value::from(format!("{} → {}", span(&start), span(&end))),
            ),
            (
                "Resting HR".to_string(),
                number_or_null(resting_heart_rate(record)),
            ),
            ("Sleep Start (local)".to_string(), start.map_or(Value::Null, Value::from)),
            ("Sleep End (local)".to_string(), end.map_or(Value::Null, Value::from)),
            (
                "Sleep Goal Met".to_string(),
                Value::from(total >= self.settings.sleep_goal_hours * 3600.0),
            ),
        ]);

        for (field, value) in score_fields(record) {
            fields.insert(field.to_string(), value);
        }
        fields
    }
}
