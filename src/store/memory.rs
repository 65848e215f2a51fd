use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::warn;

use crate::store::{
    Collection, Document, DocumentStore, DocumentWrite, Precondition, RejectReason, Rejection,
    StoreError, WriteOutcome,
};

type DocKey = (Collection, String);

/// In-process document store.
///
/// Point reads and queries share the gate; commits hold it exclusively while they
/// check preconditions and publish, so a batch is never observed half-applied.
pub struct MemoryStore {
    docs: DashMap<DocKey, Document>,
    gate: RwLock<()>,
    aborts_pending: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            docs: DashMap::new(),
            gate: RwLock::new(()),
            aborts_pending: AtomicUsize::new(0),
        }
    }

    /// Makes the next `count` commits fail after staging their writes but before
    /// publishing any of them, as a crashed transaction would.
    pub fn abort_next_commits(&self, count: usize) {
        self.aborts_pending.store(count, Ordering::SeqCst);
    }

    pub fn count(&self, collection: Collection) -> usize {
        self.docs
            .iter()
            .filter(|entry| entry.key().0 == collection)
            .count()
    }

    fn take_abort(&self) -> bool {
        self.aborts_pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn check_precondition(
    existing: Option<&Document>,
    precondition: &Precondition,
) -> Result<(), RejectReason> {
    match (precondition, existing) {
        (Precondition::DoesNotExist, None) => Ok(()),
        (Precondition::DoesNotExist, Some(_)) => Err(RejectReason::AlreadyExists),
        (Precondition::Exists | Precondition::FieldsMatch(_), None) => Err(RejectReason::Missing),
        (Precondition::Exists, Some(_)) => Ok(()),
        (Precondition::FieldsMatch(expected), Some(doc)) => {
            for (field, want) in expected {
                let have = doc.get(field).unwrap_or(&Value::Null);
                if have != want {
                    return Err(RejectReason::FieldMismatch {
                        field: field.clone(),
                    });
                }
            }
            Ok(())
        }
    }
}

fn ensure_distinct(writes: &[DocumentWrite]) -> Result<(), StoreError> {
    let mut seen = HashSet::new();
    for write in writes {
        if !seen.insert((write.collection, write.id.as_str())) {
            return Err(StoreError::InvalidBatch(format!(
                "{}/{} written twice in one batch",
                write.collection, write.id
            )));
        }
    }
    Ok(())
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn read(&self, collection: Collection, id: &str) -> Result<Option<Document>, StoreError> {
        let _guard = self.gate.read().await;
        Ok(self
            .docs
            .get(&(collection, id.to_string()))
            .map(|entry| entry.value().clone()))
    }

    async fn query(
        &self,
        collection: Collection,
        field: &str,
        value: &Value,
    ) -> Result<Vec<Document>, StoreError> {
        let _guard = self.gate.read().await;
        Ok(self
            .docs
            .iter()
            .filter(|entry| {
                entry.key().0 == collection
                    && entry.value().get(field).unwrap_or(&Value::Null) == value
            })
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn commit(&self, writes: Vec<DocumentWrite>) -> Result<WriteOutcome, StoreError> {
        if writes.is_empty() {
            return Err(StoreError::InvalidBatch("empty batch".to_string()));
        }

        ensure_distinct(&writes)?;

        let _guard = self.gate.write().await;

        let mut staged = Vec::with_capacity(writes.len());
        for write in writes {
            let key = (write.collection, write.id);
            let existing = self.docs.get(&key).map(|entry| entry.value().clone());

            if let Err(reason) = check_precondition(existing.as_ref(), &write.precondition) {
                return Ok(WriteOutcome::Rejected(Rejection {
                    collection: key.0,
                    id: key.1,
                    reason,
                }));
            }

            let mut doc = existing.unwrap_or_default();
            doc.extend(write.fields);
            staged.push((key, doc));
        }

        if self.take_abort() {
            warn!(writes = staged.len(), "commit aborted before publish");
            return Err(StoreError::Unavailable(
                "commit aborted before publish".to_string(),
            ));
        }

        for (key, doc) in staged {
            self.docs.insert(key, doc);
        }

        Ok(WriteOutcome::Committed)
    }
}
