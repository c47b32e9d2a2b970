//! Sink storage: the schema-typed property-bag document store.
//!
//! [`SinkStore`] is the contract the reconciler writes through. [`Storage`]
//! is the local implementation, a single SQLite file holding any number of
//! named databases:
//!
//! ```text
//! <root>/store.sqlite
//!   schema_property   # database, name, type, position
//!   document          # id, database, created_at, archived, properties (JSON)
//! ```

mod document;
mod schema;

use std::path::{Path, PathBuf};
use std::{fs, io};

use rusqlite::Connection;
use uuid::Uuid;

use crate::materialize::DEFAULT_MAX_TEXT_LENGTH;
use crate::model::{Filter, Page, Properties, PropertyType, RemoteDocument, Schema};

pub use document::Database;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("document not found: {0}")]
    DocumentNotFound(Uuid),

    #[error("document is archived: {0}")]
    Archived(Uuid),

    #[error("database {database} has no property named {property:?}")]
    UnknownProperty { database: String, property: String },

    #[error("property {property:?} is declared as {expected} but got {found}")]
    TypeMismatch {
        property: String,
        expected: PropertyType,
        found: PropertyType,
    },

    #[error("invalid cursor: {0}")]
    InvalidCursor(String),

    #[error("corrupt store: {0}")]
    Corrupt(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = core::result::Result<T, StorageError>;

/// A queryable, schema-typed document store.
///
/// Retries, timeouts, and backoff are the implementation's business.
pub trait SinkStore {
    /// The declared schema of this database.
    fn schema(&self) -> Result<Schema>;

    /// One page of non-archived documents matching `filter`.
    fn query(&self, filter: &Filter, cursor: Option<&str>) -> Result<Page>;

    fn create(&self, properties: &Properties) -> Result<RemoteDocument>;

    /// Writes the given properties, leaving all others untouched.
    fn update(&self, id: Uuid, properties: &Properties) -> Result<()>;

    /// Soft-deletes a document.
    fn archive(&self, id: Uuid) -> Result<()>;

    fn get(&self, id: Uuid) -> Result<RemoteDocument>;

    /// Longest title or text value the store accepts.
    fn max_text_length(&self) -> usize {
        DEFAULT_MAX_TEXT_LENGTH
    }
}

const DEFAULT_PAGE_SIZE: usize = 100;

const INIT_SQL: &str = "
    CREATE TABLE IF NOT EXISTS schema_property (
        database TEXT NOT NULL,
        name     TEXT NOT NULL,
        type     TEXT NOT NULL,
        position INTEGER NOT NULL,
        PRIMARY KEY (database, name)
    );
    CREATE TABLE IF NOT EXISTS document (
        id         TEXT PRIMARY KEY,
        database   TEXT NOT NULL,
        created_at TEXT NOT NULL,
        archived   INTEGER NOT NULL DEFAULT 0,
        properties TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS document_database ON document (database, archived);
";

/// Local SQLite-backed document store.
pub struct Storage {
    conn: Connection,
    page_size: usize,
}

impl Storage {
    /// Opens (or creates) the store at `path`.
    ///
    /// The parent directory is created if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(path)?)
    }

    /// Opens a throwaway store that lives only as long as the value.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(INIT_SQL)?;
        Ok(Self {
            conn,
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    /// Sets how many documents a single query page returns.
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Returns the default store path: `~/.fitsync/store.sqlite`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".fitsync").join("store.sqlite"))
    }

    /// A handle on one named database inside the store.
    pub fn database(&self, name: impl Into<String>) -> Database<'_> {
        Database::new(self, name.into())
    }
}
