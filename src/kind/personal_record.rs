//! Personal records: one live row per record type.
//!
//! A record type is identified by `typeId` alone. When a new best arrives
//! the previous row is archived, not overwritten, so its value survives as
//! history.

use jiff::civil::Date;
use serde_json::Value;
use tracing::info;

use crate::model::{Fields, NaturalKey, PropertyValue, Record};
use crate::reconcile::{ReconcileError, Reconciler, WriteMode};
use crate::source::leading_date;
use crate::storage::SinkStore;

use super::{KindOutcome, RecordKind, number, text, title_case};

const DATE_FIELD: &str = "Date";

pub struct PersonalRecords;

fn record_date(record: &Record) -> Option<&str> {
    text(record, &["prStartTimeGmtFormatted"]).or_else(|| text(record, &["prStartTimeGMTFormatted"]))
}

/// Seconds as `M:SS.ss`, or `H:MM:SS.ss` from one hour up.
fn format_time(seconds: f64) -> String {
    #[allow(clippy::cast_possible_truncation)]
    let whole_minutes = (seconds / 60.0).floor() as i64;
    if whole_minutes < 60 {
        #[allow(clippy::cast_precision_loss)]
        let rest = seconds - (whole_minutes as f64) * 60.0;
        format!("{whole_minutes}:{rest:05.2}")
    } else {
        let hours = whole_minutes / 60;
        let minutes = whole_minutes % 60;
        let rest = seconds % 60.0;
        format!("{hours}:{minutes:02}:{rest:05.2}")
    }
}

impl RecordKind for PersonalRecords {
    fn name(&self) -> &'static str {
        "personal-records"
    }

    fn day_of(&self, record: &Record) -> Option<Date> {
        record_date(record).and_then(leading_date)
    }

    fn key(&self, record: &Record) -> Option<NaturalKey> {
        let type_id = record.get("typeId").filter(|v| v.is_number())?;
        Some(NaturalKey::terms(Vec::new()).with_term("typeId", type_id.clone()))
    }

    fn fields(&self, record: &Record) -> Fields {
        let activity_type = text(record, &["activityType"]).map_or_else(|| "Walking".to_string(), title_case);
        let activity_name = text(record, &["activityName"])
            .map_or_else(|| "Unnamed Activity".to_string(), |n| n.replace("ENTERTAINMENT", "Netflix"));

        Fields::from([
            (
                DATE_FIELD.to_string(),
                record_date(record).map_or(Value::Null, Value::from),
            ),
            ("Activity Type".to_string(), Value::from(activity_type)),
            ("Activity Name".to_string(), Value::from(activity_name)),
            (
                "Value".to_string(),
                Value::from(format_time(number(record, &["value"]).unwrap_or(0.0))),
            ),
        ])
    }

    /// Compares the parsed dates of the stored and incoming records: an
    /// older row is archived and replaced, the same day is patched in place,
    /// and a newer row wins over stale input.
    fn reconcile<S: SinkStore + ?Sized>(
        &self,
        reconciler: &Reconciler<'_, S>,
        key: &NaturalKey,
        record: &Record,
        mode: WriteMode,
    ) -> Result<KindOutcome, ReconcileError> {
        let fields = self.fields(record);
        let existing = reconciler.lookup(key)?;
        let Some(resolution) = reconciler.resolve_duplicates(key, existing) else {
            return reconciler
                .upsert(key, &fields, mode)
                .map(KindOutcome::Upserted);
        };

        let stored = resolution
            .canonical
            .properties
            .get(DATE_FIELD)
            .and_then(PropertyValue::as_text)
            .and_then(leading_date);
        let incoming = self.day_of(record);

        match (stored, incoming) {
            (Some(stored), Some(incoming)) if stored > incoming => {
                info!(%key, %stored, %incoming, "stored record is newer, skipping");
                Ok(KindOutcome::Skipped(format!(
                    "stored record from {stored} is newer than {incoming}"
                )))
            }
            (Some(stored), Some(incoming)) if stored == incoming => reconciler
                .upsert(key, &fields, WriteMode::Patch)
                .map(KindOutcome::Upserted),
            (stored, _) => {
                let archived = resolution.canonical.id;
                info!(%key, ?stored, "superseding previous record");
                reconciler.supersede(key, archived)?;
                let outcome = reconciler.upsert(key, &fields, mode)?;
                Ok(KindOutcome::Superseded { archived, outcome })
            }
        }
    }
}
