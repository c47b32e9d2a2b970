//! The reconciler: idempotent upsert with duplicate resolution and diffing.
//!
//! One call to [`Reconciler::upsert`] makes the store's state for a single
//! natural key match a desired property set:
//!
//! 1. look up every live document matching the key,
//! 2. archive duplicates, keeping the earliest-created,
//! 3. create or update the canonical document,
//! 4. log the field-level diff,
//! 5. re-read and verify the write.
//!
//! Lookup and write failures abort the key. Archive and verification
//! problems are logged and the call still succeeds.

mod diff;
mod target;

use jiff::Timestamp;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::materialize::{MaterializeError, materialize};
use crate::model::{
    Fields, Filter, NaturalKey, Properties, PropertyType, PropertyValue, RemoteDocument, Schema,
};
use crate::storage::{SinkStore, StorageError};

pub use diff::{FieldChange, diff};

use target::TargetBuilder;

/// How a write treats fields the caller didn't supply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Clear every schema field not supplied, so the document mirrors the
    /// desired set exactly.
    #[default]
    Overwrite,

    /// Touch only supplied fields.
    Patch,
}

/// Per-run reconciler settings.
#[derive(Debug, Clone)]
pub struct ReconcilerOptions {
    /// Date properties that carry the key date, in lookup preference order.
    pub preferred_date_fields: Vec<String>,

    /// Date property stamped with the sync time on every write, if the
    /// schema declares it.
    pub synced_at_field: Option<String>,
}

impl Default for ReconcilerOptions {
    fn default() -> Self {
        Self {
            preferred_date_fields: vec!["date_key".into(), "Date".into()],
            synced_at_field: Some("Last Synced At".into()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("failed to read schema: {0}")]
    Schema(#[source] StorageError),

    #[error("lookup failed for {key}: {source}")]
    Lookup { key: String, source: StorageError },

    #[error("cannot materialize {field:?} for {key}: {source}")]
    Materialize {
        key: String,
        field: String,
        source: MaterializeError,
    },

    #[error("archive failed for {key}: {source}")]
    Archive { key: String, source: StorageError },

    #[error("write failed for {key}: {source}")]
    Write { key: String, source: StorageError },
}

/// Whether the canonical document was created or updated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertAction {
    Created,
    Updated,
}

/// What the post-write re-read found.
#[derive(Debug, Clone, PartialEq)]
pub enum Verification {
    Confirmed,

    /// Fields that still differ from the target after the write.
    Mismatch(Vec<FieldChange>),

    /// The document could not be re-read.
    Unavailable(String),
}

/// The result of one [`Reconciler::upsert`].
#[derive(Debug, Clone)]
pub struct UpsertOutcome {
    pub document_id: Uuid,
    pub action: UpsertAction,

    /// Fields whose values changed (all target fields on create).
    pub changes: Vec<FieldChange>,

    /// Duplicates archived by this call.
    pub archived: Vec<Uuid>,

    /// Duplicates that could not be archived.
    pub archive_failures: Vec<Uuid>,

    pub verification: Verification,
}

/// The canonical document for a key, after duplicates were archived.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub canonical: RemoteDocument,
    pub archived: Vec<Uuid>,
    pub archive_failures: Vec<Uuid>,
}

/// Keeps one database in sync with desired per-key state.
///
/// The schema is read when the reconciler is created and reused for every
/// key of the run.
pub struct Reconciler<'s, S: SinkStore + ?Sized> {
    store: &'s S,
    options: ReconcilerOptions,
    schema: Schema,
}

impl<'s, S: SinkStore + ?Sized> Reconciler<'s, S> {
    /// Starts a run against `store`, reading its schema.
    pub fn begin_run(store: &'s S, options: ReconcilerOptions) -> Result<Self, ReconcileError> {
        let schema = store.schema().map_err(ReconcileError::Schema)?;
        debug!(fields = schema.len(), "loaded schema");
        Ok(Self {
            store,
            options,
            schema,
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Makes the store's state for `key` match `desired`.
    pub fn upsert(
        &self,
        key: &NaturalKey,
        desired: &Fields,
        mode: WriteMode,
    ) -> Result<UpsertOutcome, ReconcileError> {
        let target = self.build_target(key, desired, mode)?;
        let matches = self.lookup(key)?;

        let Some(resolution) = self.resolve_duplicates(key, matches) else {
            return self.create(key, target);
        };
        let canonical = &resolution.canonical;

        let changes = diff(&canonical.properties, &target);
        if changes.is_empty() {
            info!(%key, id = %canonical.id, "no value changes, rewriting anyway");
        } else {
            info!(%key, id = %canonical.id, changes = changes.len(), "updating document");
            for change in &changes {
                debug!(%key, "  {change}");
            }
        }

        self.store.update(canonical.id, &target).map_err(|source| {
            let fields: Vec<&str> = target.keys().map(String::as_str).collect();
            error!(%key, id = %canonical.id, ?fields, error = %source, "update failed");
            ReconcileError::Write {
                key: key.to_string(),
                source,
            }
        })?;

        let verification = self.verify(key, canonical.id, &target);
        Ok(UpsertOutcome {
            document_id: canonical.id,
            action: UpsertAction::Updated,
            changes,
            archived: resolution.archived,
            archive_failures: resolution.archive_failures,
            verification,
        })
    }

    /// Every live document matching `key`.
    ///
    /// Dated keys try exact date equality on the canonical date field, then
    /// the half-open range `[date, date + 1 day)`, then title equality with
    /// the ISO date. Key terms narrow every attempt.
    pub fn lookup(&self, key: &NaturalKey) -> Result<Vec<RemoteDocument>, ReconcileError> {
        let terms = self.term_filters(key);

        let Some(date) = key.date else {
            if terms.is_empty() {
                return Ok(Vec::new());
            }
            return self.query_all(key, &Filter::And(terms));
        };
        let iso = date.to_string();

        if let Some(field) = self.date_field() {
            let exact = Filter::DateEquals {
                property: field.to_string(),
                date: iso.clone(),
            };
            let found = self.query_all(key, &exact.and(&terms))?;
            if !found.is_empty() {
                debug!(%key, field, count = found.len(), "matched on date");
                return Ok(found);
            }

            if let Ok(next) = date.tomorrow() {
                let range = Filter::DateRange {
                    property: field.to_string(),
                    on_or_after: date,
                    before: next,
                };
                let found = self.query_all(key, &range.and(&terms))?;
                if !found.is_empty() {
                    debug!(%key, field, count = found.len(), "matched on date range");
                    return Ok(found);
                }
            }
        }

        if let Some(title) = self.schema.title_field()
            && !key.terms.iter().any(|t| t.property == title)
        {
            let by_title = Filter::TextEquals {
                property: title.to_string(),
                value: iso,
            };
            let found = self.query_all(key, &by_title.and(&terms))?;
            if !found.is_empty() {
                debug!(%key, count = found.len(), "matched on title");
                return Ok(found);
            }
        }

        debug!(%key, "no existing document");
        Ok(Vec::new())
    }

    /// Keeps the earliest-created document and archives the rest. Returns
    /// `None` when there are no documents.
    ///
    /// Archive failures are logged and reported, never fatal.
    pub fn resolve_duplicates(
        &self,
        key: &NaturalKey,
        mut documents: Vec<RemoteDocument>,
    ) -> Option<Resolution> {
        documents.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        let mut rest = documents.into_iter();
        let canonical = rest.next()?;

        let mut archived = Vec::new();
        let mut archive_failures = Vec::new();
        for duplicate in rest {
            match self.store.archive(duplicate.id) {
                Ok(()) => {
                    info!(%key, id = %duplicate.id, keep = %canonical.id, "archived duplicate");
                    archived.push(duplicate.id);
                }
                Err(e) => {
                    warn!(%key, id = %duplicate.id, error = %e, "failed to archive duplicate");
                    archive_failures.push(duplicate.id);
                }
            }
        }

        Some(Resolution {
            canonical,
            archived,
            archive_failures,
        })
    }

    fn create(&self, key: &NaturalKey, target: Properties) -> Result<UpsertOutcome, ReconcileError> {
        let document = self.store.create(&target).map_err(|source| {
            let fields: Vec<&str> = target.keys().map(String::as_str).collect();
            error!(%key, ?fields, error = %source, "create failed");
            ReconcileError::Write {
                key: key.to_string(),
                source,
            }
        })?;
        info!(%key, id = %document.id, "created document");
        let verification = self.verify(key, document.id, &target);
        Ok(UpsertOutcome {
            document_id: document.id,
            action: UpsertAction::Created,
            changes: diff(&Properties::new(), &target),
            archived: Vec::new(),
            archive_failures: Vec::new(),
            verification,
        })
    }

    /// Archives a superseded document. Unlike duplicate archival, failure
    /// here is an error for the key.
    pub fn supersede(&self, key: &NaturalKey, id: Uuid) -> Result<(), ReconcileError> {
        self.store.archive(id).map_err(|source| {
            error!(%key, %id, error = %source, "failed to archive superseded document");
            ReconcileError::Archive {
                key: key.to_string(),
                source,
            }
        })?;
        info!(%key, %id, "archived superseded document");
        Ok(())
    }

    /// The date property lookups filter on: the first preferred date field
    /// the schema declares, else the first date field.
    fn date_field(&self) -> Option<&str> {
        self.options
            .preferred_date_fields
            .iter()
            .map(String::as_str)
            .find(|f| self.schema.get(f) == Some(PropertyType::Date))
            .or_else(|| self.schema.date_fields().next())
    }

    fn build_target(
        &self,
        key: &NaturalKey,
        desired: &Fields,
        mode: WriteMode,
    ) -> Result<Properties, ReconcileError> {
        TargetBuilder {
            schema: &self.schema,
            options: &self.options,
            date_field: self.date_field(),
            max_text: self.store.max_text_length(),
        }
        .build(key, desired, mode, Timestamp::now())
    }

    /// Equality filters for the key's terms. Terms on properties the schema
    /// lacks, or of types without an equality filter, are ignored.
    /// Key terms as filters on their stored form, so a term matches the
    /// value the store actually kept (trimmed selects, truncated titles).
    fn term_filters(&self, key: &NaturalKey) -> Vec<Filter> {
        let max_text = self.store.max_text_length();
        key.terms
            .iter()
            .filter_map(|term| {
                let ty = self.schema.get(&term.property)?;
                let property = term.property.clone();
                match materialize(ty, &term.value, max_text).ok()? {
                    PropertyValue::Title(value)
                    | PropertyValue::Text(value)
                    | PropertyValue::Select(Some(value)) => {
                        Some(Filter::TextEquals { property, value })
                    }
                    PropertyValue::Number(Some(value)) => {
                        Some(Filter::NumberEquals { property, value })
                    }
                    PropertyValue::Date(Some(date)) => Some(Filter::DateEquals { property, date }),
                    _ => None,
                }
            })
            .collect()
    }

    /// Runs `filter` and follows continuation cursors until exhausted.
    fn query_all(
        &self,
        key: &NaturalKey,
        filter: &Filter,
    ) -> Result<Vec<RemoteDocument>, ReconcileError> {
        let mut documents = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self
                .store
                .query(filter, cursor.as_deref())
                .map_err(|source| {
                    error!(%key, error = %source, "lookup failed");
                    ReconcileError::Lookup {
                        key: key.to_string(),
                        source,
                    }
                })?;
            documents.extend(page.documents);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => return Ok(documents),
            }
        }
    }

    /// Re-reads the document and diffs it against the target.
    fn verify(&self, key: &NaturalKey, id: Uuid, target: &Properties) -> Verification {
        match self.store.get(id) {
            Ok(document) => {
                let remaining = diff(&document.properties, target);
                if remaining.is_empty() {
                    debug!(%key, %id, "confirmed write");
                    Verification::Confirmed
                } else {
                    let fields: Vec<&str> = remaining.iter().map(|c| c.field.as_str()).collect();
                    warn!(%key, %id, ?fields, "differences remain after write");
                    Verification::Mismatch(remaining)
                }
            }
            Err(e) => {
                warn!(%key, %id, error = %e, "could not re-read document after write");
                Verification::Unavailable(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use jiff::civil::date;
    use serde_json::json;

    use crate::model::{Page, PropertyValue};
    use crate::storage::{Database, Storage};

    fn schema() -> Schema {
        Schema::new()
            .with("Name", PropertyType::Title)
            .with("Date", PropertyType::Date)
            .with("Steps", PropertyType::Number)
            .with("Notes", PropertyType::Text)
    }

    fn test_storage() -> Storage {
        let storage = Storage::open_in_memory().unwrap();
        storage.declare_schema("steps", &schema()).unwrap();
        storage
    }

    fn fields(entries: &[(&str, serde_json::Value)]) -> Fields {
        entries
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    fn live(db: &Database<'_>) -> Vec<RemoteDocument> {
        db.query(&Filter::And(Vec::new()), None).unwrap().documents
    }

    fn raw(created_at: i64, properties: Properties) -> RemoteDocument {
        RemoteDocument {
            id: Uuid::new_v4(),
            created_at: Timestamp::new(created_at, 0).unwrap(),
            archived: false,
            properties,
        }
    }

    fn dated(date: &str) -> Properties {
        Properties::from([("Date".to_string(), PropertyValue::Date(Some(date.to_string())))])
    }

    #[test]
    fn first_upsert_creates() {
        let storage = test_storage();
        let db = storage.database("steps");
        let reconciler = Reconciler::begin_run(&db, ReconcilerOptions::default()).unwrap();

        let key = NaturalKey::date(date(2024, 5, 1));
        let outcome = reconciler
            .upsert(&key, &fields(&[("Steps", json!(8000))]), WriteMode::Overwrite)
            .unwrap();

        assert_eq!(outcome.action, UpsertAction::Created);
        assert_eq!(outcome.verification, Verification::Confirmed);
        let doc = db.get(outcome.document_id).unwrap();
        assert_eq!(doc.properties["Steps"], PropertyValue::Number(Some(8000.0)));
        assert_eq!(doc.properties["Name"], PropertyValue::Title("2024-05-01".into()));
    }

    #[test]
    fn upsert_is_idempotent() {
        let storage = test_storage();
        let db = storage.database("steps");
        let reconciler = Reconciler::begin_run(&db, ReconcilerOptions::default()).unwrap();
        let key = NaturalKey::date(date(2024, 5, 1));
        let desired = fields(&[("Steps", json!(8000)), ("Notes", json!("easy day"))]);

        let first = reconciler.upsert(&key, &desired, WriteMode::Overwrite).unwrap();
        let before = db.get(first.document_id).unwrap();
        let second = reconciler.upsert(&key, &desired, WriteMode::Overwrite).unwrap();

        assert_eq!(second.action, UpsertAction::Updated);
        assert_eq!(second.document_id, first.document_id);
        assert!(second.changes.is_empty());
        assert_eq!(live(&db).len(), 1);
        assert_eq!(db.get(first.document_id).unwrap().properties, before.properties);
    }

    #[test]
    fn update_reports_changed_fields() {
        let storage = test_storage();
        let db = storage.database("steps");
        let reconciler = Reconciler::begin_run(&db, ReconcilerOptions::default()).unwrap();
        let key = NaturalKey::date(date(2024, 5, 1));

        reconciler
            .upsert(&key, &fields(&[("Steps", json!(7000))]), WriteMode::Overwrite)
            .unwrap();
        let outcome = reconciler
            .upsert(&key, &fields(&[("Steps", json!(8000))]), WriteMode::Overwrite)
            .unwrap();

        assert_eq!(outcome.changes.len(), 1);
        assert_eq!(outcome.changes[0].to_string(), "Steps: 7000 -> 8000");
    }

    #[test]
    fn overwrite_clears_unsupplied_fields() {
        let storage = test_storage();
        let db = storage.database("steps");
        let reconciler = Reconciler::begin_run(&db, ReconcilerOptions::default()).unwrap();
        let key = NaturalKey::date(date(2024, 5, 1));

        reconciler
            .upsert(
                &key,
                &fields(&[("Steps", json!(7000)), ("Notes", json!("sore legs"))]),
                WriteMode::Overwrite,
            )
            .unwrap();
        let outcome = reconciler
            .upsert(&key, &fields(&[("Steps", json!(8000))]), WriteMode::Overwrite)
            .unwrap();

        let doc = db.get(outcome.document_id).unwrap();
        assert_eq!(doc.properties["Notes"], PropertyValue::Text(String::new()));
    }

    #[test]
    fn patch_preserves_unsupplied_fields() {
        let storage = test_storage();
        let db = storage.database("steps");
        let reconciler = Reconciler::begin_run(&db, ReconcilerOptions::default()).unwrap();
        let key = NaturalKey::date(date(2024, 5, 1));

        reconciler
            .upsert(
                &key,
                &fields(&[("Steps", json!(7000)), ("Notes", json!("sore legs"))]),
                WriteMode::Overwrite,
            )
            .unwrap();
        let outcome = reconciler
            .upsert(&key, &fields(&[("Steps", json!(8000))]), WriteMode::Patch)
            .unwrap();

        let doc = db.get(outcome.document_id).unwrap();
        assert_eq!(doc.properties["Notes"], PropertyValue::Text("sore legs".into()));
        assert_eq!(doc.properties["Steps"], PropertyValue::Number(Some(8000.0)));
    }

    #[test]
    fn duplicates_keep_earliest_created() {
        let storage = test_storage();
        let db = storage.database("steps");
        let second = raw(2_000, dated("2024-05-01"));
        let first = raw(1_000, dated("2024-05-01"));
        let third = raw(3_000, dated("2024-05-01"));
        for doc in [&second, &third, &first] {
            db.insert_raw(doc).unwrap();
        }

        let reconciler = Reconciler::begin_run(&db, ReconcilerOptions::default()).unwrap();
        let outcome = reconciler
            .upsert(
                &NaturalKey::date(date(2024, 5, 1)),
                &fields(&[("Steps", json!(8000))]),
                WriteMode::Overwrite,
            )
            .unwrap();

        assert_eq!(outcome.document_id, first.id);
        assert_eq!(outcome.archived, [second.id, third.id]);
        assert!(db.get(second.id).unwrap().archived);
        assert!(db.get(third.id).unwrap().archived);
        assert_eq!(live(&db).len(), 1);
    }

    #[test]
    fn lookup_follows_cursors() {
        let storage = Storage::open_in_memory().unwrap().with_page_size(1);
        storage.declare_schema("steps", &schema()).unwrap();
        let db = storage.database("steps");
        for ts in [1_000, 2_000, 3_000] {
            db.insert_raw(&raw(ts, dated("2024-05-01"))).unwrap();
        }

        let reconciler = Reconciler::begin_run(&db, ReconcilerOptions::default()).unwrap();
        let found = reconciler.lookup(&NaturalKey::date(date(2024, 5, 1))).unwrap();
        assert_eq!(found.len(), 3);
    }

    #[test]
    fn lookup_falls_back_to_day_range() {
        let storage = test_storage();
        let db = storage.database("steps");
        let existing = raw(1_000, dated("2024-05-01T07:30:00"));
        db.insert_raw(&existing).unwrap();
        db.insert_raw(&raw(2_000, dated("2024-05-02T07:30:00"))).unwrap();

        let reconciler = Reconciler::begin_run(&db, ReconcilerOptions::default()).unwrap();
        let found = reconciler.lookup(&NaturalKey::date(date(2024, 5, 1))).unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, existing.id);
    }

    #[test]
    fn lookup_falls_back_to_title() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .declare_schema("journal", &Schema::new().with("Name", PropertyType::Title))
            .unwrap();
        let db = storage.database("journal");
        let existing = raw(
            1_000,
            Properties::from([("Name".to_string(), PropertyValue::Title("2024-05-01".into()))]),
        );
        db.insert_raw(&existing).unwrap();

        let reconciler = Reconciler::begin_run(&db, ReconcilerOptions::default()).unwrap();
        let found = reconciler.lookup(&NaturalKey::date(date(2024, 5, 1))).unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, existing.id);
    }

    #[test]
    fn key_terms_separate_same_day_documents() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .declare_schema(
                "activities",
                &Schema::new()
                    .with("Activity Type", PropertyType::Select)
                    .with("Activity Name", PropertyType::Title)
                    .with("Date", PropertyType::Date),
            )
            .unwrap();
        let db = storage.database("activities");
        let reconciler = Reconciler::begin_run(&db, ReconcilerOptions::default()).unwrap();

        let run = NaturalKey::date(date(2024, 5, 1))
            .with_term("Activity Type", "Running")
            .with_term("Activity Name", "Morning Run");
        let ride = NaturalKey::date(date(2024, 5, 1))
            .with_term("Activity Type", "Cycling")
            .with_term("Activity Name", "Commute");

        let a = reconciler.upsert(&run, &Fields::new(), WriteMode::Overwrite).unwrap();
        let b = reconciler.upsert(&ride, &Fields::new(), WriteMode::Overwrite).unwrap();
        let again = reconciler.upsert(&run, &Fields::new(), WriteMode::Overwrite).unwrap();

        assert_ne!(a.document_id, b.document_id);
        assert_eq!(again.document_id, a.document_id);
        assert_eq!(live(&db).len(), 2);
    }

    #[test]
    fn terms_match_their_stored_form() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .declare_schema(
                "activities",
                &Schema::new()
                    .with("Activity Type", PropertyType::Select)
                    .with("Activity Name", PropertyType::Title)
                    .with("Date", PropertyType::Date),
            )
            .unwrap();
        let key = NaturalKey::date(date(2024, 5, 1))
            .with_term("Activity Type", " Running ")
            .with_term("Activity Name", "x".repeat(2100));

        for _ in 0..3 {
            let db = storage.database("activities");
            let reconciler = Reconciler::begin_run(&db, ReconcilerOptions::default()).unwrap();
            reconciler.upsert(&key, &Fields::new(), WriteMode::Overwrite).unwrap();
        }

        let db = storage.database("activities");
        let docs = live(&db);
        assert_eq!(docs.len(), 1);
        assert_eq!(
            docs[0].properties["Activity Type"],
            PropertyValue::Select(Some("Running".into()))
        );
    }

    #[test]
    fn undated_keys_match_on_terms() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .declare_schema(
                "records",
                &Schema::new()
                    .with("Record", PropertyType::Title)
                    .with("typeId", PropertyType::Number)
                    .with("Date", PropertyType::Date),
            )
            .unwrap();
        let db = storage.database("records");
        let reconciler = Reconciler::begin_run(&db, ReconcilerOptions::default()).unwrap();
        let key = NaturalKey::terms(Vec::new()).with_term("typeId", 3);

        let first = reconciler
            .upsert(&key, &fields(&[("Date", json!("2024-05-01"))]), WriteMode::Overwrite)
            .unwrap();
        let second = reconciler
            .upsert(&key, &fields(&[("Date", json!("2024-05-02"))]), WriteMode::Overwrite)
            .unwrap();

        assert_eq!(first.document_id, second.document_id);
        let doc = db.get(first.document_id).unwrap();
        assert_eq!(doc.properties["typeId"], PropertyValue::Number(Some(3.0)));
        assert_eq!(doc.properties["Date"], PropertyValue::Date(Some("2024-05-02".into())));
    }

    #[test]
    fn materialize_error_fails_before_any_write() {
        let storage = test_storage();
        let db = storage.database("steps");
        let reconciler = Reconciler::begin_run(&db, ReconcilerOptions::default()).unwrap();

        let err = reconciler
            .upsert(
                &NaturalKey::date(date(2024, 5, 1)),
                &fields(&[("Steps", json!("many"))]),
                WriteMode::Overwrite,
            )
            .unwrap_err();

        assert!(matches!(err, ReconcileError::Materialize { .. }));
        assert!(live(&db).is_empty());
    }

    // ── Failing stores ──

    /// Delegates to a real database, failing the chosen operations.
    struct Flaky<'a> {
        inner: Database<'a>,
        fail_create: bool,
        fail_archive: bool,
        fail_query: bool,
        fail_get: bool,

        /// Field silently left out of every update.
        drop_on_update: Option<&'static str>,
    }

    impl<'a> Flaky<'a> {
        fn new(inner: Database<'a>) -> Self {
            Self {
                inner,
                fail_create: false,
                fail_archive: false,
                fail_query: false,
                fail_get: false,
                drop_on_update: None,
            }
        }
    }

    impl SinkStore for Flaky<'_> {
        fn schema(&self) -> crate::storage::Result<Schema> {
            self.inner.schema()
        }

        fn query(&self, filter: &Filter, cursor: Option<&str>) -> crate::storage::Result<Page> {
            if self.fail_query {
                return Err(StorageError::Corrupt("query refused".into()));
            }
            self.inner.query(filter, cursor)
        }

        fn create(&self, properties: &Properties) -> crate::storage::Result<RemoteDocument> {
            if self.fail_create {
                return Err(StorageError::Corrupt("create refused".into()));
            }
            self.inner.create(properties)
        }

        fn update(&self, id: Uuid, properties: &Properties) -> crate::storage::Result<()> {
            let mut properties = properties.clone();
            if let Some(field) = self.drop_on_update {
                properties.remove(field);
            }
            self.inner.update(id, &properties)
        }

        fn archive(&self, id: Uuid) -> crate::storage::Result<()> {
            if self.fail_archive {
                return Err(StorageError::Corrupt("archive refused".into()));
            }
            self.inner.archive(id)
        }

        fn get(&self, id: Uuid) -> crate::storage::Result<RemoteDocument> {
            if self.fail_get {
                return Err(StorageError::Corrupt("get refused".into()));
            }
            self.inner.get(id)
        }
    }

    #[test]
    fn create_failure_is_a_write_error() {
        let storage = test_storage();
        let store = Flaky {
            fail_create: true,
            ..Flaky::new(storage.database("steps"))
        };
        let reconciler = Reconciler::begin_run(&store, ReconcilerOptions::default()).unwrap();

        let err = reconciler
            .upsert(&NaturalKey::date(date(2024, 5, 1)), &Fields::new(), WriteMode::Overwrite)
            .unwrap_err();
        assert!(matches!(err, ReconcileError::Write { .. }));
    }

    #[test]
    fn lookup_failure_aborts_the_key() {
        let storage = test_storage();
        let store = Flaky {
            fail_query: true,
            ..Flaky::new(storage.database("steps"))
        };
        let reconciler = Reconciler::begin_run(&store, ReconcilerOptions::default()).unwrap();

        let err = reconciler
            .upsert(&NaturalKey::date(date(2024, 5, 1)), &Fields::new(), WriteMode::Overwrite)
            .unwrap_err();
        assert!(matches!(err, ReconcileError::Lookup { .. }));
        assert!(live(&storage.database("steps")).is_empty());
    }

    #[test]
    fn archive_failure_is_reported_not_fatal() {
        let storage = test_storage();
        let db = storage.database("steps");
        let first = raw(1_000, dated("2024-05-01"));
        let second = raw(2_000, dated("2024-05-01"));
        db.insert_raw(&first).unwrap();
        db.insert_raw(&second).unwrap();

        let store = Flaky {
            fail_archive: true,
            ..Flaky::new(storage.database("steps"))
        };
        let reconciler = Reconciler::begin_run(&store, ReconcilerOptions::default()).unwrap();
        let outcome = reconciler
            .upsert(
                &NaturalKey::date(date(2024, 5, 1)),
                &fields(&[("Steps", json!(1))]),
                WriteMode::Overwrite,
            )
            .unwrap();

        assert_eq!(outcome.document_id, first.id);
        assert!(outcome.archived.is_empty());
        assert_eq!(outcome.archive_failures, [second.id]);
    }

    #[test]
    fn dropped_field_is_a_mismatch() {
        let storage = test_storage();
        let db = storage.database("steps");
        let mut properties = dated("2024-05-01");
        properties.insert("Steps".into(), PropertyValue::Number(Some(7000.0)));
        let existing = raw(1_000, properties);
        db.insert_raw(&existing).unwrap();

        let store = Flaky {
            drop_on_update: Some("Steps"),
            ..Flaky::new(storage.database("steps"))
        };
        let reconciler = Reconciler::begin_run(&store, ReconcilerOptions::default()).unwrap();
        let outcome = reconciler
            .upsert(
                &NaturalKey::date(date(2024, 5, 1)),
                &fields(&[("Steps", json!(8000))]),
                WriteMode::Overwrite,
            )
            .unwrap();

        assert_eq!(outcome.action, UpsertAction::Updated);
        let Verification::Mismatch(remaining) = &outcome.verification else {
            panic!("expected a mismatch, got {:?}", outcome.verification);
        };
        let remaining: Vec<&str> = remaining.iter().map(|c| c.field.as_str()).collect();
        assert_eq!(remaining, ["Steps"]);
        assert_eq!(
            db.get(existing.id).unwrap().properties["Steps"],
            PropertyValue::Number(Some(7000.0))
        );
    }

    #[test]
    fn unreadable_write_is_unverified() {
        let storage = test_storage();
        let store = Flaky {
            fail_get: true,
            ..Flaky::new(storage.database("steps"))
        };
        let reconciler = Reconciler::begin_run(&store, ReconcilerOptions::default()).unwrap();
        let outcome = reconciler
            .upsert(
                &NaturalKey::date(date(2024, 5, 1)),
                &fields(&[("Steps", json!(8000))]),
                WriteMode::Overwrite,
            )
            .unwrap();

        assert_eq!(outcome.action, UpsertAction::Created);
        assert!(matches!(
            &outcome.verification,
            Verification::Unavailable(reason) if reason.contains("get refused")
        ));
        assert_eq!(live(&storage.database("steps")).len(), 1);
    }

    #[test]
    fn supersede_failure_is_an_error() {
        let storage = test_storage();
        let store = Flaky {
            fail_archive: true,
            ..Flaky::new(storage.database("steps"))
        };
        let reconciler = Reconciler::begin_run(&store, ReconcilerOptions::default()).unwrap();

        let err = reconciler
            .supersede(&NaturalKey::date(date(2024, 5, 1)), Uuid::new_v4())
            .unwrap_err();
        assert!(matches!(err, ReconcileError::Archive { .. }));
    }

    #[test]
    fn date_field_prefers_configured_names() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .declare_schema(
                "daily",
                &Schema::new()
                    .with("Created", PropertyType::Date)
                    .with("date_key", PropertyType::Date),
            )
            .unwrap();
        let db = storage.database("daily");
        let reconciler = Reconciler::begin_run(&db, ReconcilerOptions::default()).unwrap();
        assert_eq!(reconciler.date_field(), Some("date_key"));

        let plain = Storage::open_in_memory().unwrap();
        plain
            .declare_schema("daily", &Schema::new().with("Created", PropertyType::Date))
            .unwrap();
        let db = plain.database("daily");
        let reconciler = Reconciler::begin_run(&db, ReconcilerOptions::default()).unwrap();
        assert_eq!(reconciler.date_field(), Some("Created"));
    }
}
