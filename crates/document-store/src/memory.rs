use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use futures_util::stream;
use tokio::sync::RwLock;

use crate::{
    BulkWrite, BulkWriteResult, Document, DocumentId, Filter, Result, StoreError,
    store::{DocumentStore, DocumentStream},
    write::validate_bulk,
};

type Collections = HashMap<String, Vec<Document>>;

/// In-memory document store implementation for testing.
///
/// Collections keep insertion order. Bulk writes are applied to a copy of
/// the collection and swapped in only when every statement succeeds, so a
/// failed batch leaves the data untouched. Call counters and a failure
/// switch let tests observe how the engine uses the store.
#[derive(Clone, Default)]
pub struct InMemoryDocumentStore {
    collections: Arc<RwLock<Collections>>,
    find_calls: Arc<AtomicUsize>,
    bulk_write_calls: Arc<AtomicUsize>,
    fail_on_bulk_write: Arc<AtomicBool>,
}

impl InMemoryDocumentStore {
    /// Creates a new empty in-memory document store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of documents in a collection.
    pub async fn count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map_or(0, Vec::len)
    }

    /// Returns a copy of every document in a collection, in insertion order.
    pub async fn all(&self, collection: &str) -> Vec<Document> {
        self.collections
            .read()
            .await
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Clears all collections.
    pub async fn clear(&self) {
        self.collections.write().await.clear();
    }

    /// Returns how many `find`/`find_ids` calls have been served.
    pub fn find_count(&self) -> usize {
        self.find_calls.load(Ordering::SeqCst)
    }

    /// Returns how many `bulk_write` calls have been received.
    pub fn bulk_write_count(&self) -> usize {
        self.bulk_write_calls.load(Ordering::SeqCst)
    }

    /// Resets the call counters.
    pub fn reset_counters(&self) {
        self.find_calls.store(0, Ordering::SeqCst);
        self.bulk_write_calls.store(0, Ordering::SeqCst);
    }

    /// Makes every subsequent bulk write fail until switched off.
    pub fn set_fail_on_bulk_write(&self, fail: bool) {
        self.fail_on_bulk_write.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>> {
        self.find_calls.fetch_add(1, Ordering::SeqCst);
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .map(|docs| docs.iter().filter(|d| filter.matches(d)).cloned().collect())
            .unwrap_or_default())
    }

    async fn find_ids(&self, collection: &str, filter: &Filter) -> Result<Vec<DocumentId>> {
        self.find_calls.fetch_add(1, Ordering::SeqCst);
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|d| filter.matches(d))
                    .map(|d| d.id.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn scan(&self, collection: &str) -> Result<DocumentStream> {
        // Reads one document per poll so the collection is never copied wholesale.
        let state = (self.collections.clone(), collection.to_string(), 0usize);
        let stream = stream::unfold(state, |(collections, name, index)| async move {
            let doc = collections
                .read()
                .await
                .get(&name)
                .and_then(|docs| docs.get(index))
                .cloned()?;
            Some((Ok(doc), (collections, name, index + 1)))
        });
        Ok(Box::pin(stream))
    }

    async fn bulk_write(&self, collection: &str, bulk: BulkWrite) -> Result<BulkWriteResult> {
        self.bulk_write_calls.fetch_add(1, Ordering::SeqCst);
        validate_bulk(&bulk)?;

        if self.fail_on_bulk_write.load(Ordering::SeqCst) {
            return Err(StoreError::BulkWrite {
                index: 0,
                message: "bulk write rejected by store".to_string(),
            });
        }

        let mut collections = self.collections.write().await;
        let mut docs = collections.get(collection).cloned().unwrap_or_default();
        let mut result = BulkWriteResult::default();

        for (index, statement) in bulk.statements().iter().enumerate() {
            for doc in docs.iter_mut().filter(|d| statement.filter.matches(d)) {
                result.matched += 1;
                let modified = statement
                    .apply(doc)
                    .map_err(|e| StoreError::BulkWrite {
                        index,
                        message: e.to_string(),
                    })?;
                if modified {
                    result.modified += 1;
                }
                if !statement.multi {
                    break;
                }
            }
        }

        collections.insert(collection.to_string(), docs);
        metrics::counter!("document_store_bulk_writes_total", "backend" => "memory").increment(1);

        Ok(result)
    }

    async fn insert_many(&self, collection: &str, documents: Vec<Document>) -> Result<()> {
        let mut collections = self.collections.write().await;
        let existing = collections.entry(collection.to_string()).or_default();

        let mut seen: HashSet<&DocumentId> = existing.iter().map(|d| &d.id).collect();
        for doc in &documents {
            if !seen.insert(&doc.id) {
                return Err(StoreError::DuplicateId {
                    collection: collection.to_string(),
                    id: doc.id.clone(),
                });
            }
        }

        existing.extend(documents);
        Ok(())
    }

    async fn delete_many(&self, collection: &str, filter: &Filter) -> Result<u64> {
        let mut collections = self.collections.write().await;
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let before = docs.len();
        docs.retain(|d| !filter.matches(d));
        Ok((before - docs.len()) as u64)
    }
}
