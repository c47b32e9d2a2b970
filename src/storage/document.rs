//! Document storage: create, query, update, archive, and get documents
//! within one named database.

use jiff::Timestamp;
use rusqlite::OptionalExtension;
use uuid::Uuid;

use crate::model::{Filter, Page, Properties, RemoteDocument, Schema};

use super::{Result, SinkStore, Storage, StorageError};

/// A handle on one named database inside a [`Storage`].
pub struct Database<'a> {
    storage: &'a Storage,
    name: String,
}

impl<'a> Database<'a> {
    pub(super) fn new(storage: &'a Storage, name: String) -> Self {
        Self { storage, name }
    }

    /// Rejects properties that aren't declared, or don't carry their
    /// declared type.
    fn check_properties(&self, properties: &Properties) -> Result<()> {
        let schema = self.schema()?;
        for (name, value) in properties {
            let Some(expected) = schema.get(name) else {
                return Err(StorageError::UnknownProperty {
                    database: self.name.clone(),
                    property: name.clone(),
                });
            };
            let found = value.property_type();
            if found != expected {
                return Err(StorageError::TypeMismatch {
                    property: name.clone(),
                    expected,
                    found,
                });
            }
        }
        Ok(())
    }

    /// Loads every live document of this database, oldest first.
    fn load_live(&self) -> Result<Vec<RemoteDocument>> {
        let mut stmt = self.storage.conn.prepare(
            "SELECT id, created_at, archived, properties FROM document
             WHERE database = ?1 AND archived = 0",
        )?;
        let rows = stmt.query_map(rusqlite::params![&self.name], read_row)?;

        let schema = self.schema()?;
        let mut documents = Vec::new();
        for row in rows {
            let mut document = decode(row?)?;
            retain_declared(&schema, &mut document.properties);
            documents.push(document);
        }
        documents.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(documents)
    }

    fn insert(&self, document: &RemoteDocument) -> Result<()> {
        self.storage.conn.execute(
            "INSERT INTO document (id, database, created_at, archived, properties)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                document.id.to_string(),
                &self.name,
                document.created_at.to_string(),
                document.archived,
                serde_json::to_string(&document.properties)?,
            ],
        )?;
        Ok(())
    }

    /// Inserts a document as-is, bypassing schema checks.
    #[cfg(test)]
    pub(crate) fn insert_raw(&self, document: &RemoteDocument) -> Result<()> {
        self.insert(document)
    }
}

impl SinkStore for Database<'_> {
    fn schema(&self) -> Result<Schema> {
        self.storage.load_schema(&self.name)
    }

    fn query(&self, filter: &Filter, cursor: Option<&str>) -> Result<Page> {
        let offset = match cursor {
            Some(c) => c
                .parse::<usize>()
                .map_err(|_| StorageError::InvalidCursor(c.to_string()))?,
            None => 0,
        };
        let matching: Vec<RemoteDocument> = self
            .load_live()?
            .into_iter()
            .filter(|d| filter.matches(&d.properties))
            .collect();

        let page_size = self.storage.page_size;
        let end = offset.saturating_add(page_size);
        let next_cursor = (end < matching.len()).then(|| end.to_string());
        let documents = matching.into_iter().skip(offset).take(page_size).collect();

        Ok(Page {
            documents,
            next_cursor,
        })
    }

    fn create(&self, properties: &Properties) -> Result<RemoteDocument> {
        self.check_properties(properties)?;
        let document = RemoteDocument {
            id: Uuid::new_v4(),
            created_at: Timestamp::now(),
            archived: false,
            properties: properties.clone(),
        };
        self.insert(&document)?;
        Ok(document)
    }

    fn update(&self, id: Uuid, properties: &Properties) -> Result<()> {
        self.check_properties(properties)?;
        let mut document = self.get(id)?;
        if document.archived {
            return Err(StorageError::Archived(id));
        }
        document
            .properties
            .extend(properties.iter().map(|(k, v)| (k.clone(), v.clone())));

        self.storage.conn.execute(
            "UPDATE document SET properties = ?1 WHERE id = ?2 AND database = ?3",
            rusqlite::params![
                serde_json::to_string(&document.properties)?,
                id.to_string(),
                &self.name,
            ],
        )?;
        Ok(())
    }

    fn archive(&self, id: Uuid) -> Result<()> {
        let rows = self.storage.conn.execute(
            "UPDATE document SET archived = 1 WHERE id = ?1 AND database = ?2",
            rusqlite::params![id.to_string(), &self.name],
        )?;
        if rows == 0 {
            return Err(StorageError::DocumentNotFound(id));
        }
        Ok(())
    }

    fn get(&self, id: Uuid) -> Result<RemoteDocument> {
        let row = self
            .storage
            .conn
            .query_row(
                "SELECT id, created_at, archived, properties FROM document
                 WHERE id = ?1 AND database = ?2",
                rusqlite::params![id.to_string(), &self.name],
                read_row,
            )
            .optional()?;
        let Some(row) = row else {
            return Err(StorageError::DocumentNotFound(id));
        };
        let mut document = decode(row)?;
        retain_declared(&self.schema()?, &mut document.properties);
        Ok(document)
    }
}

/// Drops stored values the current schema no longer declares, or declares
/// with another type.
fn retain_declared(schema: &Schema, properties: &mut Properties) {
    properties.retain(|name, value| schema.get(name) == Some(value.property_type()));
}

type Row = (String, String, bool, String);

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Row> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn decode((id, created_at, archived, properties): Row) -> Result<RemoteDocument> {
    let id = id
        .parse::<Uuid>()
        .map_err(|e| StorageError::Corrupt(format!("invalid document id: {e}")))?;
    let created_at = created_at
        .parse::<Timestamp>()
        .map_err(|e| StorageError::Corrupt(format!("invalid created_at: {e}")))?;
    Ok(RemoteDocument {
        id,
        created_at,
        archived,
        properties: serde_json::from_str(&properties)?,
    })
}
