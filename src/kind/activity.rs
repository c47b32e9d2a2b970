//! Individual activities: runs, rides, walks.
//!
//! Keyed on the local start date plus type and name, so two activities of
//! the same day stay separate rows.

use jiff::civil::{Date, DateTime};
use jiff::tz::TimeZone;
use serde_json::Value;

use crate::aggregate::round_to;
use crate::model::{Fields, NaturalKey, Record};
use crate::source::leading_date;

use super::{RecordKind, Settings, number, number_or_null, text, title_case};

const AEROBIC_LABELS: [(&str, &str); 6] = [
    ("NO_AEROBIC_BENEFIT_0", "No Benefit"),
    ("MAINTAINING_AEROBIC_FITNESS_1", "Maintaining"),
    ("IMPACTING_TEMPO_22", "Impacting"),
    ("RECOVERY_5", "Recovery"),
    ("MAINTAINING_TEMPO_21", "Maintaining"),
    ("IMPROVING_VO2_MAX_15", "Impacting"),
];

const ANAEROBIC_LABELS: [(&str, &str); 5] = [
    ("NO_ANAEROBIC_BENEFIT_0", "No Benefit"),
    ("MAINTAINING_ANAEROBIC_FITNESS_1", "Maintaining"),
    ("MAINTAINING_ANAEROBIC_BASE_1", "Impacting"),
    ("RECOVERY_5", "Recovery"),
    ("MAINTAINING_TEMPO_21", "Maintaining"),
];

pub struct Activities {
    settings: Settings,
}

impl Activities {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }
}

/// Local start as `YYYY-MM-DD HH:MM`: `startTimeLocal` as given, else
/// `startTimeGMT` converted into `tz`.
pub(super) fn local_start(record: &Record, tz: &TimeZone) -> Option<String> {
    if let Some(local) = text(record, &["startTimeLocal"]) {
        return local.get(..16).or(local.get(..10)).map(String::from);
    }
    let gmt = text(record, &["startTimeGMT"])?;
    let utc = DateTime::strptime("%Y-%m-%d %H:%M:%S", gmt)
        .or_else(|_| DateTime::strptime("%Y-%m-%d %H:%M", gmt))
        .ok()?
        .to_zoned(TimeZone::UTC)
        .ok()?;
    Some(utc.with_time_zone(tz.clone()).strftime("%Y-%m-%d %H:%M").to_string())
}

pub(super) fn activity_day(record: &Record, tz: &TimeZone) -> Option<Date> {
    local_start(record, tz).as_deref().and_then(leading_date)
}

/// `trail_running` → `Trail Running`.
pub(super) fn activity_type(record: &Record) -> String {
    text(record, &["activityType", "typeKey"]).map_or_else(|| "Unknown".to_string(), title_case)
}

pub(super) fn activity_name(record: &Record) -> String {
    text(record, &["activityName"])
        .map_or_else(|| "Unnamed Activity".to_string(), |n| n.replace("ENTERTAINMENT", "Netflix"))
}

/// Garmin training-effect messages end in a numeric code; known ones map to
/// a short label, unknown ones are title-cased without the code.
fn effect_label(message: Option<&str>, labels: &[(&str, &str)]) -> String {
    let Some(message) = message else {
        return "Unknown".to_string();
    };
    if let Some((_, label)) = labels.iter().find(|(code, _)| *code == message) {
        return (*label).to_string();
    }
    let words = message.trim_end_matches(|c: char| c.is_ascii_digit() || c == '_');
    title_case(words)
}

/// Average pace as `m:ss min/km` from a speed in meters per second.
fn pace(speed: Option<f64>) -> String {
    match speed {
        Some(mps) if mps > 0.0 => {
            let min_per_km = 1000.0 / (mps * 60.0);
            #[allow(clippy::cast_possible_truncation)]
            let minutes = min_per_km.trunc() as i64;
            #[allow(clippy::cast_possible_truncation)]
            let seconds = ((min_per_km - min_per_km.trunc()) * 60.0).trunc() as i64;
            format!("{minutes}:{seconds:02} min/km")
        }
        _ => String::new(),
    }
}

impl RecordKind for Activities {
    fn name(&self) -> &'static str {
        "activities"
    }

    fn day_of(&self, record: &Record) -> Option<Date> {
        activity_day(record, &self.settings.time_zone)
    }

    fn key(&self, record: &Record) -> Option<NaturalKey> {
        let day = self.day_of(record)?;
        Some(
            NaturalKey::date(day)
                .with_term("Activity Type", activity_type(record))
                .with_term("Activity Name", activity_name(record)),
        )
    }

    fn fields(&self, record: &Record) -> Fields {
        let start = local_start(record, &self.settings.time_zone);
        let effect = |field: &str| number(record, &[field]).map(|e| round_to(e, 0));

        Fields::from([
            ("Date".to_string(), start.map_or(Value::Null, Value::from)),
            (
                "Distance (km)".to_string(),
                number_or_null(number(record, &["distance"]).map(|m| round_to(m / 1000.0, 2))),
            ),
            (
                "Duration (min)".to_string(),
                number_or_null(number(record, &["duration"]).map(|s| round_to(s / 60.0, 2))),
            ),
            (
                "Calories".to_string(),
                number_or_null(number(record, &["calories"])),
            ),
            (
                "Avg Pace".to_string(),
                Value::from(pace(number(record, &["averageSpeed"]))),
            ),
            (
                "Aerobic".to_string(),
                number_or_null(effect("aerobicTrainingEffect")),
            ),
            (
                "Anaerobic".to_string(),
                number_or_null(effect("anaerobicTrainingEffect")),
            ),
            (
                "Aerobic Effect".to_string(),
                Value::from(effect_label(
                    text(record, &["aerobicTrainingEffectMessage"]),
                    &AEROBIC_LABELS,
                )),
            ),
            (
                "Anaerobic Effect".to_string(),
                Value::from(effect_label(
                    text(record, &["anaerobicTrainingEffectMessage"]),
                    &ANAEROBIC_LABELS,
                )),
            ),
            (
                "Training Effect".to_string(),
                Value::from(
                    text(record, &["trainingEffectLabel"]).map_or_else(|| "Unknown".to_string(), title_case),
                ),
            ),
            (
                "PR".to_string(),
                record.get("pr").cloned().unwrap_or(Value::Bool(false)),
            ),
        ])
    }
}
