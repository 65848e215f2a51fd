use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::store::{
    Collection, Document, DocumentStore, DocumentWrite, MemoryStore, StoreError, WriteOutcome,
};

/// Memory store that lets a test slip a rival batch in between an operation's
/// reads and its commit.
pub(crate) struct InterleavingStore {
    inner: MemoryStore,
    rival: Mutex<Vec<DocumentWrite>>,
}

impl InterleavingStore {
    pub(crate) fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            rival: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    /// Commits `writes` immediately before the next commit reaches the store.
    pub(crate) fn interleave(&self, writes: Vec<DocumentWrite>) {
        *self.rival.lock().unwrap() = writes;
    }
}

#[async_trait]
impl DocumentStore for InterleavingStore {
    async fn read(&self, collection: Collection, id: &str) -> Result<Option<Document>, StoreError> {
        self.inner.read(collection, id).await
    }

    async fn query(
        &self,
        collection: Collection,
        field: &str,
        value: &Value,
    ) -> Result<Vec<Document>, StoreError> {
        self.inner.query(collection, field, value).await
    }

    async fn commit(&self, writes: Vec<DocumentWrite>) -> Result<WriteOutcome, StoreError> {
        let rival = std::mem::take(&mut *self.rival.lock().unwrap());
        if !rival.is_empty() {
            let outcome = self.inner.commit(rival).await?;
            assert_eq!(outcome, WriteOutcome::Committed, "rival batch must apply");
        }
        self.inner.commit(writes).await
    }
}
