//! Batched recomputation of cached fields.
//!
//! A sync pulls source documents in bounded batches (FETCH), resolves every
//! referenced ID with one lookup per reference property, and submits all the
//! resulting field writes as a single bulk write per batch (APPLY).

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;

use document_store::{
    BulkWrite, Document, DocumentId, DocumentStore, DocumentStoreExt, DocumentStream, Filter,
    WriteStatement,
};
use futures_util::TryStreamExt;
use futures_util::future::try_join_all;
use serde_json::{Map, Value};

use crate::Result;
use crate::reference::{Cardinality, ReferenceDefinition};
use crate::report::{SyncReport, WriteOutcome};

/// Source documents to recompute: an in-memory batch or a forward-only stream.
pub enum SyncInput {
    Documents(Vec<Document>),
    Stream(DocumentStream),
}

impl From<Vec<Document>> for SyncInput {
    fn from(documents: Vec<Document>) -> Self {
        Self::Documents(documents)
    }
}

impl From<Document> for SyncInput {
    fn from(document: Document) -> Self {
        Self::Documents(vec![document])
    }
}

impl From<DocumentStream> for SyncInput {
    fn from(stream: DocumentStream) -> Self {
        Self::Stream(stream)
    }
}

impl std::fmt::Debug for SyncInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Documents(docs) => f.debug_tuple("Documents").field(&docs.len()).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Projected destination values of one reference, keyed by destination ID.
type Lookup = HashMap<DocumentId, Value>;

/// Recomputes cached fields of source documents against a document store.
#[derive(Clone)]
pub struct SyncEngine<S: DocumentStore> {
    store: S,
    batch_size: usize,
}

impl<S: DocumentStore> SyncEngine<S> {
    /// Creates a sync engine. A batch size of zero is treated as one.
    pub fn new(store: S, batch_size: usize) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Recomputes the given references for every input document.
    ///
    /// Batches are processed one after another; the first store error
    /// aborts the sync and earlier batches stay written.
    ///
    /// A One reference whose destination is missing is skipped and keeps its
    /// old cache. A Many reference always rewrites its whole namespace object
    /// when the reference property is an array, even if nothing resolves, so
    /// an empty array yields `{}` and counts as a written document.
    #[tracing::instrument(skip(self, input, references), fields(references = references.len()))]
    pub async fn sync(
        &self,
        collection: &str,
        input: SyncInput,
        references: &[Arc<ReferenceDefinition>],
    ) -> Result<SyncReport> {
        let start = Instant::now();
        let mut report = SyncReport::new(collection);

        match input {
            SyncInput::Documents(documents) => {
                for batch in documents.chunks(self.batch_size) {
                    self.apply_batch(collection, batch, references, &mut report)
                        .await?;
                }
            }
            SyncInput::Stream(mut stream) => {
                let mut batch = Vec::with_capacity(self.batch_size);
                while let Some(document) = stream.try_next().await? {
                    batch.push(document);
                    if batch.len() == self.batch_size {
                        self.apply_batch(collection, &batch, references, &mut report)
                            .await?;
                        batch.clear();
                    }
                }
                if !batch.is_empty() {
                    self.apply_batch(collection, &batch, references, &mut report)
                        .await?;
                }
            }
        }

        metrics::histogram!("denorm_sync_duration_seconds").record(start.elapsed().as_secs_f64());
        tracing::info!(
            batches = report.batches,
            scanned = report.documents_scanned,
            written = report.documents_written,
            "sync complete"
        );

        Ok(report)
    }

    /// Recomputes one batch and submits at most one bulk write for it.
    pub async fn sync_documents(
        &self,
        collection: &str,
        documents: &[Document],
        references: &[Arc<ReferenceDefinition>],
    ) -> Result<WriteOutcome> {
        let bulk = self.build_bulk(documents, references).await?;
        self.submit(collection, bulk).await
    }

    async fn apply_batch(
        &self,
        collection: &str,
        batch: &[Document],
        references: &[Arc<ReferenceDefinition>],
        report: &mut SyncReport,
    ) -> Result<()> {
        report.batches += 1;
        report.documents_scanned += batch.len() as u64;

        let bulk = self.build_bulk(batch, references).await?;
        let written = bulk.len() as u64;
        if !self.submit(collection, bulk).await?.is_noop() {
            report.documents_written += written;
            report.writes_submitted += 1;
        }
        Ok(())
    }

    /// Resolves every reference of the batch and builds one statement per
    /// document with a non-empty payload.
    async fn build_bulk(
        &self,
        documents: &[Document],
        references: &[Arc<ReferenceDefinition>],
    ) -> Result<BulkWrite> {
        let lookups = try_join_all(
            references
                .iter()
                .map(|definition| self.lookup(definition, documents)),
        )
        .await?;

        Ok(documents
            .iter()
            .filter_map(|document| {
                let payload = references
                    .iter()
                    .zip(&lookups)
                    .fold(Map::new(), |mut payload, (definition, lookup)| {
                        if let Some((path, value)) = cached_value(definition, document, lookup) {
                            payload.insert(path, value);
                        }
                        payload
                    });
                if payload.is_empty() {
                    return None;
                }
                let mut statement = WriteStatement::update_one(Filter::Id(document.id.clone()));
                statement.set = payload;
                Some(statement)
            })
            .collect())
    }

    /// Fetches and projects every destination referenced by the batch in a
    /// single lookup.
    async fn lookup(
        &self,
        definition: &ReferenceDefinition,
        documents: &[Document],
    ) -> Result<Lookup> {
        let ids: BTreeSet<DocumentId> = documents
            .iter()
            .flat_map(|document| referenced_ids(definition, document))
            .collect();
        if ids.is_empty() {
            return Ok(Lookup::new());
        }

        let destinations = self
            .store
            .find_by_ids(definition.destination(), ids.into_iter().collect())
            .await?;

        Ok(destinations
            .iter()
            .map(|destination| (destination.id.clone(), definition.extract(destination)))
            .collect())
    }

    async fn submit(&self, collection: &str, bulk: BulkWrite) -> Result<WriteOutcome> {
        let statements = bulk.len() as u64;
        let outcome = submit(&self.store, collection, bulk).await?;
        if !outcome.is_noop() {
            metrics::counter!("denorm_documents_synced_total").increment(statements);
        }
        Ok(outcome)
    }
}

/// Submits a batch, or reports a no-op without touching the store when the
/// batch is empty.
pub(crate) async fn submit<S: DocumentStore + ?Sized>(
    store: &S,
    collection: &str,
    bulk: BulkWrite,
) -> Result<WriteOutcome> {
    if bulk.is_empty() {
        tracing::debug!(collection, "nothing to write");
        return Ok(WriteOutcome::NoOp);
    }

    let result = store.bulk_write(collection, bulk).await?;
    metrics::counter!("denorm_bulk_writes_total").increment(1);
    Ok(WriteOutcome::Applied(result))
}

/// IDs a source document references through one definition.
///
/// Values that cannot identify a document are ignored.
pub fn referenced_ids(definition: &ReferenceDefinition, document: &Document) -> Vec<DocumentId> {
    match (definition.cardinality(), document.get(definition.ref_property())) {
        (Cardinality::One, Some(value)) => DocumentId::from_value(value).into_iter().collect(),
        (Cardinality::Many, Some(Value::Array(values))) => {
            values.iter().filter_map(DocumentId::from_value).collect()
        }
        _ => Vec::new(),
    }
}

/// The field write one definition contributes for a source document.
///
/// One writes the bare namespace when the destination exists. Many always
/// writes the whole namespace object, keyed by stringified ID, so keys of
/// IDs that left the array disappear.
fn cached_value(
    definition: &ReferenceDefinition,
    document: &Document,
    lookup: &Lookup,
) -> Option<(String, Value)> {
    match definition.cardinality() {
        Cardinality::One => {
            let id = referenced_ids(definition, document).into_iter().next()?;
            let value = lookup.get(&id)?;
            Some((definition.namespace().to_string(), value.clone()))
        }
        Cardinality::Many => {
            let Some(Value::Array(_)) = document.get(definition.ref_property()) else {
                return None;
            };
            let cached: Map<String, Value> = referenced_ids(definition, document)
                .into_iter()
                .filter_map(|id| lookup.get(&id).map(|value| (id.as_key(), value.clone())))
                .collect();
            Some((definition.namespace().to_string(), Value::Object(cached)))
        }
    }
}
