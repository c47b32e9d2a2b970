//! The sync driver: fetch a window of records and reconcile them key by key.
//!
//! ```text
//! SourceProvider::fetch(range)
//!   └─► accept / key each record (last record per key wins)
//!         └─► reconcile keys in day order, one at a time
//!               └─► SyncReport
//! ```
//!
//! A failing key is logged and counted; the run moves on to the next one.

use std::collections::HashMap;
use std::fmt;
use std::thread;
use std::time::Duration;

use jiff::civil::Date;
use tracing::{debug, error, info, warn};

use crate::kind::{KindOutcome, RecordKind};
use crate::model::{DayRange, NaturalKey, Record};
use crate::reconcile::{Reconciler, UpsertAction, UpsertOutcome, Verification, WriteMode};
use crate::source::SourceProvider;
use crate::storage::SinkStore;

/// Settings for one sync run.
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Overrides the kind's own write mode.
    pub mode: Option<WriteMode>,

    /// Pause between keys.
    pub key_delay: Duration,
}

/// Tally of one sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub fetched: usize,
    pub created: usize,
    pub updated: usize,

    /// Keys rewritten with no value changes.
    pub unchanged: usize,

    /// Older documents archived and replaced.
    pub superseded: usize,

    pub archived_duplicates: usize,
    pub archive_failures: usize,
    pub skipped: usize,
    pub failed: usize,
    pub mismatches: usize,
    pub unverified: usize,
}

impl SyncReport {
    fn record(&mut self, outcome: &UpsertOutcome) {
        match outcome.action {
            UpsertAction::Created => self.created += 1,
            UpsertAction::Updated if outcome.changes.is_empty() => self.unchanged += 1,
            UpsertAction::Updated => self.updated += 1,
        }
        self.record_effects(outcome);
    }

    /// Duplicate archival and verification, whatever the action was.
    fn record_effects(&mut self, outcome: &UpsertOutcome) {
        self.archived_duplicates += outcome.archived.len();
        self.archive_failures += outcome.archive_failures.len();
        match outcome.verification {
            Verification::Confirmed => {}
            Verification::Mismatch(_) => self.mismatches += 1,
            Verification::Unavailable(_) => self.unverified += 1,
        }
    }

    /// Whether any key failed outright.
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} fetched, {} created, {} updated, {} unchanged, {} superseded, {} skipped, {} failed",
            self.fetched,
            self.created,
            self.updated,
            self.unchanged,
            self.superseded,
            self.skipped,
            self.failed
        )?;
        if self.archived_duplicates > 0 || self.archive_failures > 0 {
            write!(
                f,
                "; {} duplicates archived, {} could not be archived",
                self.archived_duplicates, self.archive_failures
            )?;
        }
        if self.mismatches > 0 || self.unverified > 0 {
            write!(
                f,
                "; {} verification mismatches, {} unverified",
                self.mismatches, self.unverified
            )?;
        }
        Ok(())
    }
}

/// Keyed records in day order, one per key.
fn plan<K: RecordKind>(kind: &K, records: Vec<Record>, report: &mut SyncReport) -> Vec<(NaturalKey, Record)> {
    let mut dated: Vec<(Option<Date>, NaturalKey, Record)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for record in records {
        if !kind.accept(&record) {
            debug!(kind = kind.name(), "record not accepted, skipping");
            report.skipped += 1;
            continue;
        }
        let Some(key) = kind.key(&record) else {
            warn!(kind = kind.name(), "record has no natural key, skipping");
            report.skipped += 1;
            continue;
        };
        let day = kind.day_of(&record);
        match index.get(&key.to_string()) {
            Some(&i) => {
                debug!(kind = kind.name(), %key, "replacing earlier record for key");
                let earlier = &mut dated[i];
                // Later days win; within a day, later records win.
                if day >= earlier.0 {
                    *earlier = (day, key, record);
                }
            }
            None => {
                index.insert(key.to_string(), dated.len());
                dated.push((day, key, record));
            }
        }
    }

    dated.sort_by(|a, b| a.0.cmp(&b.0));
    dated.into_iter().map(|(_, key, record)| (key, record)).collect()
}

/// Syncs one kind over `range`.
///
/// A fetch failure is logged and treated as no data.
pub fn sync_kind<K, P, S>(
    kind: &K,
    source: &P,
    reconciler: &Reconciler<'_, S>,
    range: &DayRange,
    options: &SyncOptions,
) -> SyncReport
where
    K: RecordKind,
    P: SourceProvider + ?Sized,
    S: SinkStore + ?Sized,
{
    let mut report = SyncReport::default();
    let records = match source.fetch(range) {
        Ok(records) => records,
        Err(e) => {
            warn!(kind = kind.name(), %range, error = %e, "fetch failed, treating as no data");
            Vec::new()
        }
    };
    report.fetched = records.len();
    info!(kind = kind.name(), %range, records = report.fetched, "starting sync");

    let mode = options.mode.unwrap_or_else(|| kind.mode());
    let planned = plan(kind, records, &mut report);

    for (i, (key, record)) in planned.iter().enumerate() {
        if i > 0 && !options.key_delay.is_zero() {
            thread::sleep(options.key_delay);
        }
        match kind.reconcile(reconciler, key, record, mode) {
            Ok(KindOutcome::Upserted(outcome)) => {
                debug!(kind = kind.name(), %key, id = %outcome.document_id, "upserted");
                report.record(&outcome);
            }
            Ok(KindOutcome::Superseded { archived, outcome }) => {
                info!(
                    kind = kind.name(),
                    %key,
                    %archived,
                    id = %outcome.document_id,
                    "superseded earlier record"
                );
                report.superseded += 1;
                report.record_effects(&outcome);
            }
            Ok(KindOutcome::Skipped(reason)) => {
                debug!(kind = kind.name(), %key, %reason, "skipped");
                report.skipped += 1;
            }
            Err(e) => {
                error!(kind = kind.name(), %key, error = %e, "failed to sync key");
                report.failed += 1;
            }
        }
    }

    info!(kind = kind.name(), %report, "sync finished");
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    use jiff::civil::date;
    use serde_json::json;

    use crate::kind::{PersonalRecords, Steps};
    use crate::model::{Filter, PropertyType, PropertyValue, Schema};
    use crate::reconcile::ReconcilerOptions;
    use crate::source::SourceError;
    use crate::storage::{Database, Storage, StorageError};

    struct Fixed(Vec<serde_json::Value>);

    impl SourceProvider for Fixed {
        fn fetch(&self, _range: &DayRange) -> Result<Vec<Record>, SourceError> {
            Ok(self
                .0
                .iter()
                .filter_map(|v| v.as_object().cloned())
                .collect())
        }
    }

    struct Broken;

    impl SourceProvider for Broken {
        fn fetch(&self, _range: &DayRange) -> Result<Vec<Record>, SourceError> {
            Err(SourceError::Shape {
                path: "broken.json".into(),
                found: "null",
            })
        }
    }

    fn steps_storage() -> Storage {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .declare_schema(
                "steps",
                &Schema::new()
                    .with("Activity Type", PropertyType::Title)
                    .with("Date", PropertyType::Date)
                    .with("Total Steps", PropertyType::Number)
                    .with("Step Goal", PropertyType::Number)
                    .with("Total Distance (km)", PropertyType::Number),
            )
            .unwrap();
        storage
    }

    fn range() -> DayRange {
        DayRange::new(date(2024, 5, 1), date(2024, 5, 3)).unwrap()
    }

    fn run(db: &Database<'_>, source: &Fixed) -> SyncReport {
        let reconciler = Reconciler::begin_run(db, ReconcilerOptions::default()).unwrap();
        sync_kind(&Steps, source, &reconciler, &range(), &SyncOptions::default())
    }

    fn live(db: &Database<'_>) -> Vec<crate::model::RemoteDocument> {
        db.query(&Filter::And(Vec::new()), None).unwrap().documents
    }

    #[test]
    fn second_run_changes_nothing() {
        let storage = steps_storage();
        let db = storage.database("steps");
        let source = Fixed(vec![
            json!({"calendarDate": "2024-05-02", "totalSteps": 9000}),
            json!({"calendarDate": "2024-05-01", "totalSteps": 8000}),
        ]);

        let first = run(&db, &source);
        let second = run(&db, &source);

        assert_eq!(first.created, 2);
        assert_eq!(second.created, 0);
        assert_eq!(second.unchanged, 2);
        assert_eq!(live(&db).len(), 2);
    }

    #[test]
    fn later_record_for_a_key_wins() {
        let storage = steps_storage();
        let db = storage.database("steps");
        let source = Fixed(vec![
            json!({"calendarDate": "2024-05-01", "totalSteps": 100}),
            json!({"calendarDate": "2024-05-01", "totalSteps": 8000}),
        ]);

        let report = run(&db, &source);

        assert_eq!(report.created, 1);
        let docs = live(&db);
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].properties["Total Steps"], PropertyValue::Number(Some(8000.0)));
    }

    /// Refuses to create documents for one date.
    struct RefuseDate<'a> {
        inner: Database<'a>,
        date: &'static str,
    }

    impl SinkStore for RefuseDate<'_> {
        fn schema(&self) -> crate::storage::Result<Schema> {
            self.inner.schema()
        }

        fn query(
            &self,
            filter: &Filter,
            cursor: Option<&str>,
        ) -> crate::storage::Result<crate::model::Page> {
            self.inner.query(filter, cursor)
        }

        fn create(
            &self,
            properties: &crate::model::Properties,
        ) -> crate::storage::Result<crate::model::RemoteDocument> {
            if properties.get("Date") == Some(&PropertyValue::Date(Some(self.date.into()))) {
                return Err(StorageError::Corrupt("refused".into()));
            }
            self.inner.create(properties)
        }

        fn update(
            &self,
            id: uuid::Uuid,
            properties: &crate::model::Properties,
        ) -> crate::storage::Result<()> {
            self.inner.update(id, properties)
        }

        fn archive(&self, id: uuid::Uuid) -> crate::storage::Result<()> {
            self.inner.archive(id)
        }

        fn get(&self, id: uuid::Uuid) -> crate::storage::Result<crate::model::RemoteDocument> {
            self.inner.get(id)
        }
    }

    #[test]
    fn failing_key_does_not_stop_the_run() {
        let storage = steps_storage();
        let store = RefuseDate {
            inner: storage.database("steps"),
            date: "2024-05-01",
        };
        let reconciler = Reconciler::begin_run(&store, ReconcilerOptions::default()).unwrap();
        let source = Fixed(vec![
            json!({"calendarDate": "2024-05-01", "totalSteps": 8000}),
            json!({"calendarDate": "2024-05-02", "totalSteps": 9000}),
        ]);

        let report = sync_kind(&Steps, &source, &reconciler, &range(), &SyncOptions::default());

        assert_eq!(report.failed, 1);
        assert_eq!(report.created, 1);
        assert!(report.has_failures());
        assert_eq!(live(&storage.database("steps")).len(), 1);
    }

    #[test]
    fn records_without_keys_are_skipped() {
        let storage = steps_storage();
        let db = storage.database("steps");
        let source = Fixed(vec![json!({"totalSteps": 1})]);

        let report = run(&db, &source);
        assert_eq!(report.skipped, 1);
        assert!(live(&db).is_empty());
    }

    #[test]
    fn fetch_failure_is_an_empty_run() {
        let storage = steps_storage();
        let db = storage.database("steps");
        let reconciler = Reconciler::begin_run(&db, ReconcilerOptions::default()).unwrap();

        let report = sync_kind(&Steps, &Broken, &reconciler, &range(), &SyncOptions::default());
        assert_eq!(report, SyncReport::default());
    }

    #[test]
    fn personal_records_supersede_within_one_run() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .declare_schema(
                "records",
                &Schema::new()
                    .with("Activity Name", PropertyType::Title)
                    .with("Date", PropertyType::Date)
                    .with("typeId", PropertyType::Number)
                    .with("Value", PropertyType::Text),
            )
            .unwrap();
        let db = storage.database("records");
        let reconciler = Reconciler::begin_run(&db, ReconcilerOptions::default()).unwrap();
        let first = Fixed(vec![json!({
            "typeId": 1, "prStartTimeGmtFormatted": "2024-05-01T08:00:00.0", "value": 300.0
        })]);
        let second = Fixed(vec![json!({
            "typeId": 1, "prStartTimeGmtFormatted": "2024-05-03T08:00:00.0", "value": 290.0
        })]);

        let a = sync_kind(&PersonalRecords, &first, &reconciler, &range(), &SyncOptions::default());
        let b = sync_kind(&PersonalRecords, &second, &reconciler, &range(), &SyncOptions::default());

        assert_eq!(a.created, 1);
        assert_eq!(b.superseded, 1);
        assert_eq!(b.created, 0);
        assert_eq!(live(&db).len(), 1);
    }

    #[test]
    fn report_summarizes_counts() {
        let report = SyncReport {
            fetched: 3,
            created: 1,
            updated: 1,
            unchanged: 1,
            ..SyncReport::default()
        };
        assert_eq!(
            report.to_string(),
            "3 fetched, 1 created, 1 updated, 1 unchanged, 0 superseded, 0 skipped, 0 failed"
        );
    }
}
