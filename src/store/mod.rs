//! Persistence adapter boundary.
//!
//! The core talks to its document store only through [`DocumentStore`]: point reads,
//! single-field queries and conditional writes. Every multi-document state change is
//! submitted as one [`DocumentWrite`] batch that either applies in full or not at all.

pub mod memory;
#[cfg(test)]
pub(crate) mod testing;

use std::fmt;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

pub use memory::MemoryStore;

/// A stored record: a flat JSON object keyed by camelCase field name.
pub type Document = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Drivers,
    Trips,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Drivers => "drivers",
            Collection::Trips => "trips",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Precondition {
    /// Write only if no document exists under the id. The fields become the document.
    DoesNotExist,
    /// Write only if the document exists.
    Exists,
    /// Write only if the document exists and every listed field equals the given value.
    /// A missing field compares equal to `null`.
    FieldsMatch(Document),
}

/// One document mutation inside a commit. For existing documents the fields are
/// merged over the stored ones; untouched fields keep their current value.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentWrite {
    pub collection: Collection,
    pub id: String,
    pub precondition: Precondition,
    pub fields: Document,
}

impl DocumentWrite {
    pub fn create(collection: Collection, id: impl Into<String>, fields: Document) -> Self {
        Self {
            collection,
            id: id.into(),
            precondition: Precondition::DoesNotExist,
            fields,
        }
    }

    pub fn update(collection: Collection, id: impl Into<String>, fields: Document) -> Self {
        Self {
            collection,
            id: id.into(),
            precondition: Precondition::Exists,
            fields,
        }
    }

    pub fn compare_and_set(
        collection: Collection,
        id: impl Into<String>,
        expected: Document,
        fields: Document,
    ) -> Self {
        Self {
            collection,
            id: id.into(),
            precondition: Precondition::FieldsMatch(expected),
            fields,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    Missing,
    AlreadyExists,
    FieldMismatch { field: String },
}

/// Identifies the first write of a batch whose precondition did not hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub collection: Collection,
    pub id: String,
    pub reason: RejectReason,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Committed,
    Rejected(Rejection),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document store unavailable: {0}")]
    Unavailable(String),

    #[error("invalid batch: {0}")]
    InvalidBatch(String),
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn read(&self, collection: Collection, id: &str) -> Result<Option<Document>, StoreError>;

    /// All documents whose `field` equals `value`, in store order.
    async fn query(
        &self,
        collection: Collection,
        field: &str,
        value: &Value,
    ) -> Result<Vec<Document>, StoreError>;

    /// Applies every write or none of them. Concurrent readers observe either the
    /// state before the batch or the state after it.
    async fn commit(&self, writes: Vec<DocumentWrite>) -> Result<WriteOutcome, StoreError>;

    async fn conditional_write(
        &self,
        collection: Collection,
        id: &str,
        expected: Document,
        fields: Document,
    ) -> Result<WriteOutcome, StoreError> {
        self.commit(vec![DocumentWrite::compare_and_set(
            collection, id, expected, fields,
        )])
        .await
    }
}

/// Builds a [`Document`] from a `json!({ .. })` object literal.
pub fn fields(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
