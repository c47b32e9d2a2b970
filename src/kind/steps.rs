//! Daily step counts, one row per day.

use jiff::civil::Date;
use serde_json::Value;

use crate::aggregate::round_to;
use crate::model::{Fields, NaturalKey, Record};
use crate::source::leading_date;

use super::{RecordKind, number, number_or_null, text};

/// Steps rows are titled with this activity type and keyed on it.
const ACTIVITY_TYPE: &str = "Walking";

pub struct Steps;

impl RecordKind for Steps {
    fn name(&self) -> &'static str {
        "steps"
    }

    fn day_of(&self, record: &Record) -> Option<Date> {
        text(record, &["calendarDate"])
            .or_else(|| text(record, &["date"]))
            .and_then(leading_date)
    }

    fn key(&self, record: &Record) -> Option<NaturalKey> {
        let day = self.day_of(record)?;
        Some(NaturalKey::date(day).with_term("Activity Type", ACTIVITY_TYPE))
    }

    fn fields(&self, record: &Record) -> Fields {
        let km = number(record, &["totalDistance"]).map(|m| round_to(m / 1000.0, 2));
        Fields::from([
            ("Activity Type".to_string(), Value::from(ACTIVITY_TYPE)),
            (
                "Total Steps".to_string(),
                number_or_null(number(record, &["totalSteps"])),
            ),
            (
                "Step Goal".to_string(),
                number_or_null(number(record, &["stepGoal"])),
            ),
            ("Total Distance (km)".to_string(), number_or_null(km)),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use jiff::civil::date;
    use serde_json::json;

    use crate::kind::{KindOutcome, record};
    use crate::model::{Filter, PropertyType, PropertyValue, Schema};
    use crate::reconcile::{Reconciler, ReconcilerOptions, UpsertAction};
    use crate::storage::{SinkStore, Storage};

    fn schema() -> Schema {
        Schema::new()
            .with("Activity Type", PropertyType::Title)
            .with("Date", PropertyType::Date)
            .with("Total Steps", PropertyType::Number)
            .with("Step Goal", PropertyType::Number)
            .with("Total Distance (km)", PropertyType::Number)
    }

    fn on(day: &str) -> Filter {
        Filter::DateEquals {
            property: "Date".into(),
            date: day.into(),
        }
    }

    #[test]
    fn converts_meters_to_kilometers() {
        let r = record(json!({
            "date": "2024-05-01", "totalSteps": 8000, "stepGoal": 10000, "totalDistance": 6200
        }));

        let fields = Steps.fields(&r);
        assert_eq!(fields["Total Distance (km)"], json!(6.2));
        assert_eq!(fields["Total Steps"], json!(8000.0));
        assert_eq!(fields["Activity Type"], json!("Walking"));
    }

    #[test]
    fn prefers_calendar_date() {
        let r = record(json!({"calendarDate": "2024-05-02", "date": "2024-05-01"}));
        assert_eq!(Steps.day_of(&r), Some(date(2024, 5, 2)));
    }

    #[test]
    fn missing_counts_become_null() {
        let r = record(json!({"calendarDate": "2024-05-01"}));
        assert_eq!(Steps.fields(&r)["Total Steps"], Value::Null);
    }

    #[test]
    fn syncs_one_day_end_to_end() {
        let storage = Storage::open_in_memory().unwrap();
        storage.declare_schema("steps", &schema()).unwrap();
        let db = storage.database("steps");
        let reconciler = Reconciler::begin_run(&db, ReconcilerOptions::default()).unwrap();

        let first = record(json!({
            "date": "2024-05-01", "totalSteps": 8000, "stepGoal": 10000, "totalDistance": 6200
        }));
        let key = Steps.key(&first).unwrap();
        let outcome = Steps
            .reconcile(&reconciler, &key, &first, Steps.mode())
            .unwrap();

        let KindOutcome::Upserted(outcome) = outcome else {
            panic!("expected an upsert");
        };
        assert_eq!(outcome.action, UpsertAction::Created);
        let doc = db.get(outcome.document_id).unwrap();
        assert_eq!(
            doc.properties["Total Distance (km)"],
            PropertyValue::Number(Some(6.2))
        );
        assert_eq!(
            doc.properties["Activity Type"],
            PropertyValue::Title("Walking".into())
        );
        assert_eq!(db.query(&on("2024-05-01"), None).unwrap().documents.len(), 1);
        assert!(db.query(&on("2024-05-02"), None).unwrap().documents.is_empty());

        let next = record(json!({"date": "2024-05-02", "totalSteps": 500}));
        let key = Steps.key(&next).unwrap();
        Steps.reconcile(&reconciler, &key, &next, Steps.mode()).unwrap();
        assert_eq!(db.query(&on("2024-05-02"), None).unwrap().documents.len(), 1);
    }
}
