//! Remote documents: rows held by the sink store.

use std::collections::BTreeMap;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::PropertyValue;

/// A property bag keyed by property name.
pub type Properties = BTreeMap<String, PropertyValue>;

/// A stored document: created once, then located and mutated across runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteDocument {
    pub id: Uuid,
    pub created_at: Timestamp,

    /// Archived documents are soft-deleted and never returned by queries.
    pub archived: bool,

    pub properties: Properties,
}

/// One page of query results.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub documents: Vec<RemoteDocument>,

    /// Opaque continuation cursor; `None` once results are exhausted.
    pub next_cursor: Option<String>,
}
