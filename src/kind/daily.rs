//! The daily rollup: one row per calendar day combining activities, steps,
//! sleep, and the daily wellness metrics.
//!
//! [`DailyInputs`] bundles the sources into one record per day of the
//! window, including days without any data, and [`DailyRollup`] turns each
//! bundle into a row.

use std::collections::BTreeMap;

use jiff::civil::{Date, Weekday};
use serde_json::{Map, Value};
use tracing::warn;

use crate::aggregate::{Aggregator, group_by_day, round_to};
use crate::model::{DayRange, Fields, NaturalKey, Record};
use crate::source::{SourceError, SourceProvider, leading_date};

use super::{RecordKind, Settings, first_present, lookup, number, number_or_null, sleep, text};
use super::{activity, steps::Steps};

const METERS_PER_MILE: f64 = 1609.34;
const POUNDS_PER_KG: f64 = 2.204_622_621_8;

/// The per-day sources of a rollup. Missing inputs contribute nothing.
#[derive(Default)]
pub struct DailyInputs<'a> {
    pub activities: Option<&'a dyn SourceProvider>,
    pub steps: Option<&'a dyn SourceProvider>,
    pub sleep: Option<&'a dyn SourceProvider>,

    /// Stress levels and body battery readings.
    pub wellness: Option<&'a dyn SourceProvider>,

    /// Moderate and vigorous intensity minutes.
    pub intensity: Option<&'a dyn SourceProvider>,
    pub hrv: Option<&'a dyn SourceProvider>,
    pub weight: Option<&'a dyn SourceProvider>,

    pub settings: Settings,
}

impl DailyInputs<'_> {
    /// Fetches one input, treating a failure as no data.
    fn fetch_input(
        name: &str,
        source: Option<&dyn SourceProvider>,
        range: &DayRange,
    ) -> Vec<Record> {
        let Some(source) = source else {
            return Vec::new();
        };
        match source.fetch(range) {
            Ok(records) => records,
            Err(e) => {
                warn!(input = name, error = %e, "fetch failed, treating as no data");
                Vec::new()
            }
        }
    }

    /// One record per day of a once-a-day input; the last one wins.
    fn daily_input<F>(
        name: &str,
        source: Option<&dyn SourceProvider>,
        range: &DayRange,
        day_of: F,
    ) -> BTreeMap<Date, Record>
    where
        F: Fn(&Record) -> Option<Date>,
    {
        last_per_day(group_by_day(Self::fetch_input(name, source, range), day_of))
    }
}

/// The day of a once-a-day wellness record: `calendarDate`,
/// `calendar_date`, or `date`.
pub fn calendar_day(record: &Record) -> Option<Date> {
    ["calendarDate", "calendar_date", "date"]
        .iter()
        .find_map(|k| text(record, &[*k]))
        .and_then(leading_date)
}

impl SourceProvider for DailyInputs<'_> {
    /// One bundle per day of `range`: `{"date", "activities": [..]}` plus
    /// `steps`, `sleep`, `wellness`, `intensity`, `hrv`, and `weight`, each
    /// an object or `null`.
    fn fetch(&self, range: &DayRange) -> Result<Vec<Record>, SourceError> {
        let tz = &self.settings.time_zone;
        let mut activities = group_by_day(
            Self::fetch_input("activities", self.activities, range),
            |r| activity::activity_day(r, tz),
        );
        let mut singles = [
            (
                "steps",
                Self::daily_input("steps", self.steps, range, |r| Steps.day_of(r)),
            ),
            (
                "sleep",
                Self::daily_input("sleep", self.sleep, range, sleep::calendar_date),
            ),
            (
                "wellness",
                Self::daily_input("wellness", self.wellness, range, calendar_day),
            ),
            (
                "intensity",
                Self::daily_input("intensity", self.intensity, range, calendar_day),
            ),
            ("hrv", Self::daily_input("hrv", self.hrv, range, calendar_day)),
            (
                "weight",
                Self::daily_input("weight", self.weight, range, calendar_day),
            ),
        ];

        let bundles = range
            .days()
            .map(|day| {
                let mut bundle = Map::new();
                bundle.insert("date".into(), Value::from(day.to_string()));
                bundle.insert(
                    "activities".into(),
                    Value::Array(
                        activities
                            .remove(&day)
                            .unwrap_or_default()
                            .into_iter()
                            .map(Value::Object)
                            .collect(),
                    ),
                );
                for (name, by_day) in &mut singles {
                    bundle.insert(
                        (*name).to_string(),
                        by_day.remove(&day).map_or(Value::Null, Value::Object),
                    );
                }
                bundle
            })
            .collect();
        Ok(bundles)
    }
}

fn last_per_day(grouped: BTreeMap<Date, Vec<Record>>) -> BTreeMap<Date, Record> {
    grouped
        .into_iter()
        .filter_map(|(day, mut records)| records.pop().map(|r| (day, r)))
        .collect()
}

// ── Activity extractors ──

fn activity_name(r: &Record) -> Option<String> {
    first_present(r, &["activityName", "activityId"])
}

fn activity_type(r: &Record) -> Option<String> {
    text(r, &["activityType", "typeKey"]).map(String::from)
}

fn training_effect(r: &Record) -> Option<String> {
    first_present(
        r,
        &["trainingEffectLabel", "overallTrainingEffectMessage", "trainingEffectMessage"],
    )
}

fn aerobic_effect(r: &Record) -> Option<String> {
    first_present(r, &["aerobicTrainingEffectMessage", "aerobicTrainingEffectLabel"])
}

fn anaerobic_effect(r: &Record) -> Option<String> {
    first_present(r, &["anaerobicTrainingEffectMessage", "anaerobicTrainingEffectLabel"])
}

fn activity_aggregator() -> Aggregator {
    Aggregator::new()
        .sum("distance_mi", "distance", METERS_PER_MILE, 2)
        .sum("duration_min", "duration", 60.0, 2)
        .sum("calories", "calories", 1.0, 0)
        .list("names", activity_name)
        .list("types", activity_type)
        .list("training_effect", training_effect)
        .list("aerobic_effect", aerobic_effect)
        .list("anaerobic_effect", anaerobic_effect)
        .category(activity_type)
}

// ── Wellness extractors ──

/// The first number found under any of `keys`.
fn first_number(record: &Record, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|k| number(record, &[*k]))
}

/// Average stress, maximum stress, average and minimum body battery.
fn wellness(record: &Record) -> (Option<f64>, Option<f64>, Option<f64>, Option<f64>) {
    let levels: Vec<f64> = ["bodyBatteryReadings", "body_battery_readings"]
        .iter()
        .find_map(|k| lookup(record, &[*k]).and_then(Value::as_array))
        .map(|readings| {
            readings
                .iter()
                .filter_map(|r| r.get("level").and_then(Value::as_f64))
                .collect()
        })
        .unwrap_or_default();

    #[allow(clippy::cast_precision_loss)]
    let avg = (!levels.is_empty())
        .then(|| round_to(levels.iter().sum::<f64>() / levels.len() as f64, 1));
    let min = levels.iter().copied().reduce(f64::min);
    (
        first_number(record, &["avgStressLevel", "avg_stress_level"]),
        first_number(record, &["maxStressLevel", "max_stress_level"]),
        avg,
        min,
    )
}

/// Total, moderate, and vigorous minutes. Vigorous minutes count double
/// toward the total.
fn intensity(record: &Record) -> (Option<f64>, Option<f64>, Option<f64>) {
    let moderate = first_number(record, &["moderateValue", "moderate_value"]);
    let vigorous = first_number(record, &["vigorousValue", "vigorous_value"]);
    let total = (moderate.is_some() || vigorous.is_some())
        .then(|| moderate.unwrap_or(0.0) + 2.0 * vigorous.unwrap_or(0.0));
    (total, moderate, vigorous)
}

/// Last night's average, else the weekly average.
fn hrv(record: &Record) -> Option<f64> {
    first_number(record, &["lastNightAvg", "last_night_avg"])
        .filter(|v| *v != 0.0)
        .or_else(|| first_number(record, &["weeklyAvg", "weekly_avg"]))
}

/// Weight in pounds (from grams) and BMI.
fn weight(record: &Record) -> (Option<f64>, Option<f64>) {
    let pounds = number(record, &["weight"]).map(|g| round_to(g / 1000.0 * POUNDS_PER_KG, 2));
    (pounds, number(record, &["bmi"]))
}

fn weekday_name(day: Date) -> &'static str {
    match day.weekday() {
        Weekday::Monday => "Monday",
        Weekday::Tuesday => "Tuesday",
        Weekday::Wednesday => "Wednesday",
        Weekday::Thursday => "Thursday",
        Weekday::Friday => "Friday",
        Weekday::Saturday => "Saturday",
        Weekday::Sunday => "Sunday",
    }
}

pub struct DailyRollup {
    settings: Settings,
}

impl DailyRollup {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }
}

impl RecordKind for DailyRollup {
    fn name(&self) -> &'static str {
        "daily"
    }

    fn day_of(&self, record: &Record) -> Option<Date> {
        text(record, &["date"]).and_then(leading_date)
    }

    fn key(&self, record: &Record) -> Option<NaturalKey> {
        self.day_of(record).map(NaturalKey::date)
    }

    fn fields(&self, record: &Record) -> Fields {
        let mut fields = Fields::new();
        let mut put = |name: &str, value: Value| {
            fields.insert(name.to_string(), value);
        };

        if let Some(day) = self.day_of(record) {
            put("date_key", Value::from(day.to_string()));
            put("weekday", Value::from(weekday_name(day)));
            put("iso_week", Value::from(day.iso_week_date().week()));
            put("year", Value::from(day.year()));
            put("month", Value::from(day.month()));
        }

        let activities: Vec<Record> = record
            .get("activities")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(|v| v.as_object().cloned()).collect())
            .unwrap_or_default();
        let agg = activity_aggregator().fold(&activities);
        put("Activities (#)", Value::from(agg.count));
        put("Activity Distance (mi)", Value::from(agg.sum("distance_mi")));
        put("Activity Duration (min)", Value::from(agg.sum("duration_min")));
        put("Activity Calories", Value::from(agg.sum("calories")));
        put("Activity Names", Value::from(agg.list("names")));
        put("Activity Types", Value::from(agg.list("types")));
        put("Training Effect (list)", Value::from(agg.list("training_effect")));
        put("Aerobic Effect (list)", Value::from(agg.list("aerobic_effect")));
        put("Anaerobic Effect (list)", Value::from(agg.list("anaerobic_effect")));
        put("primary_sport", Value::from(agg.primary.as_str()));
        put("activity_types_unique", Value::from(agg.unique.as_str()));
        put("has_activities", Value::from(agg.count > 0));

        let steps = record.get("steps").and_then(Value::as_object);
        let total_steps = steps.and_then(|s| number(s, &["totalSteps"]));
        put("Steps", number_or_null(total_steps));
        put("Step Goal", number_or_null(steps.and_then(|s| number(s, &["stepGoal"]))));
        put(
            "Walk Distance (mi)",
            number_or_null(
                steps
                    .and_then(|s| number(s, &["totalDistance"]))
                    .map(|m| round_to(m / METERS_PER_MILE, 2)),
            ),
        );
        put("has_steps", Value::from(total_steps.is_some()));

        let night = record.get("sleep").and_then(Value::as_object);
        put("has_sleep", Value::from(night.is_some()));
        if let Some(night) = night {
            let hours = |stage: &str| {
                Value::from(round_to(
                    number(night, &["dailySleepDTO", stage]).unwrap_or(0.0) / 3600.0,
                    2,
                ))
            };
            put(
                "Sleep Total (h)",
                Value::from(round_to(sleep::total_seconds(night) / 3600.0, 2)),
            );
            put("Sleep Light (h)", hours("lightSleepSeconds"));
            put("Sleep Deep (h)", hours("deepSleepSeconds"));
            put("Sleep REM (h)", hours("remSleepSeconds"));
            put("Sleep Awake (h)", hours("awakeSleepSeconds"));
            put("Resting HR", number_or_null(sleep::resting_heart_rate(night)));
            let (start, end) = sleep::window(night, &self.settings);
            put("Sleep Start (local)", start.map_or(Value::Null, Value::from));
            put("Sleep End (local)", end.map_or(Value::Null, Value::from));
            for (field, value) in sleep::score_fields(night) {
                put(field, value);
            }
        }

        let day_input = |name: &str| record.get(name).and_then(Value::as_object);

        let (stress_avg, stress_max, battery_avg, battery_min) =
            day_input("wellness").map_or((None, None, None, None), wellness);
        put("Stress Avg", number_or_null(stress_avg));
        put("Stress Max", number_or_null(stress_max));
        put("Body Battery Avg", number_or_null(battery_avg));
        put("Body Battery Min", number_or_null(battery_min));

        let (total, moderate, vigorous) = day_input("intensity").map_or((None, None, None), intensity);
        put("Intensity Minutes", number_or_null(total));
        put("Intensity Moderate (min)", number_or_null(moderate));
        put("Intensity Vigorous (min)", number_or_null(vigorous));

        put("HRV", number_or_null(day_input("hrv").and_then(hrv)));

        let (pounds, bmi) = day_input("weight").map_or((None, None), weight);
        put("Weight (lb)", number_or_null(pounds));
        put("BMI", number_or_null(bmi));
        put("has_weight", Value::from(pounds.is_some()));

        fields
    }
}
