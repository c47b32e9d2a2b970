//! Core data model for fitsync.
//!
//! These types describe both sides of a sync: raw source records as the
//! provider exports them, and the schema-typed documents held by the sink.

mod document;
mod filter;
mod key;
mod property;
mod range;
mod schema;

use std::collections::BTreeMap;

pub use document::{Page, Properties, RemoteDocument};
pub use filter::Filter;
pub use key::NaturalKey;
pub use property::PropertyValue;
pub use range::DayRange;
pub use schema::{PropertyType, Schema};

/// A raw record as produced by a source provider.
///
/// Immutable once fetched; never persisted locally.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Desired field values handed to the reconciler, still untyped.
pub type Fields = BTreeMap<String, serde_json::Value>;
