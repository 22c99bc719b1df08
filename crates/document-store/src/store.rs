use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;

use crate::{BulkWrite, BulkWriteResult, Document, DocumentId, Filter, Result, WriteStatement};

/// A lazy, forward-only sequence of documents.
pub type DocumentStream = Pin<Box<dyn Stream<Item = Result<Document>> + Send>>;

/// Core trait for document store implementations.
///
/// A store holds named collections of documents. Only the operations the
/// denormalization engine depends on are part of the contract, plus the
/// plain insert/delete primitives callers need to mutate data.
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Returns every document in the collection matching the filter.
    async fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>>;

    /// Returns only the IDs of documents matching the filter.
    async fn find_ids(&self, collection: &str, filter: &Filter) -> Result<Vec<DocumentId>>;

    /// Streams the full contents of a collection.
    ///
    /// Each call starts a fresh cursor. Implementations must not buffer
    /// the whole collection before yielding the first document.
    async fn scan(&self, collection: &str) -> Result<DocumentStream>;

    /// Applies a batch of statements in a single request.
    ///
    /// Either every statement is applied or, on the first failing one,
    /// none are and `StoreError::BulkWrite` names the failing index.
    async fn bulk_write(&self, collection: &str, bulk: BulkWrite) -> Result<BulkWriteResult>;

    /// Inserts documents. Fails on a duplicate ID without inserting any.
    async fn insert_many(&self, collection: &str, documents: Vec<Document>) -> Result<()>;

    /// Deletes the documents matching the filter, returning how many were removed.
    async fn delete_many(&self, collection: &str, filter: &Filter) -> Result<u64>;
}

/// Extension trait providing convenience methods for document stores.
#[async_trait]
pub trait DocumentStoreExt: DocumentStore {
    /// Returns every document whose ID is in the set.
    async fn find_by_ids(&self, collection: &str, ids: Vec<DocumentId>) -> Result<Vec<Document>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.find(collection, &Filter::IdIn(ids)).await
    }

    /// Returns a single document by ID.
    async fn find_one(&self, collection: &str, id: DocumentId) -> Result<Option<Document>> {
        Ok(self
            .find(collection, &Filter::Id(id))
            .await?
            .into_iter()
            .next())
    }

    /// Inserts a single document.
    async fn insert_one(&self, collection: &str, document: Document) -> Result<()> {
        self.insert_many(collection, vec![document]).await
    }

    /// Runs a single statement as a one-element bulk write.
    async fn update(
        &self,
        collection: &str,
        statement: WriteStatement,
    ) -> Result<BulkWriteResult> {
        self.bulk_write(collection, BulkWrite::from(vec![statement]))
            .await
    }
}

// Blanket implementation for all DocumentStore implementations
impl<T: DocumentStore + ?Sized> DocumentStoreExt for T {}
