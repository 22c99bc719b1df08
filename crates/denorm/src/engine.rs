//! The engine facade: one registry and one event bus per instance.

use std::sync::Arc;

use document_store::{Document, DocumentStore, Filter};

use crate::Result;
use crate::config::EngineConfig;
use crate::events::{EventBus, Payload};
use crate::propagation::ChangePropagator;
use crate::reference::{Operation, ReferenceConfig, ReferenceDefinition};
use crate::registry::ReferenceRegistry;
use crate::report::{SyncReport, WriteOutcome};
use crate::sync::{SyncEngine, SyncInput};

/// Keeps denormalized caches on source documents in step with the
/// destination documents they reference.
///
/// Callers mutate the store themselves and then report the change through
/// one of the `notify_*` methods. A removal must be reported before the
/// destination documents are deleted.
pub struct DenormEngine<S: DocumentStore> {
    config: EngineConfig,
    registry: ReferenceRegistry,
    bus: EventBus,
    propagator: ChangePropagator<S>,
    sync: SyncEngine<S>,
}

impl<S: DocumentStore + Clone + 'static> DenormEngine<S> {
    /// Creates an engine with default configuration.
    pub fn new(store: S) -> Self {
        Self::with_config(store, EngineConfig::default())
    }

    pub fn with_config(store: S, config: EngineConfig) -> Self {
        let sync = SyncEngine::new(store, config.batch_size());
        Self {
            config,
            registry: ReferenceRegistry::new(),
            bus: EventBus::new(),
            propagator: ChangePropagator::new(sync.clone()),
            sync,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        self.sync.store()
    }

    pub fn registry(&self) -> &ReferenceRegistry {
        &self.registry
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Registers a reference and wires its propagation handlers.
    ///
    /// Registering the same source and reference property again replaces
    /// the definition and unbinds the handlers of the one it replaced.
    #[tracing::instrument(skip(self, config))]
    pub fn register(&mut self, config: ReferenceConfig) -> Result<Arc<ReferenceDefinition>> {
        let (definition, replaced) = self.registry.register(config)?;

        if let Some(previous) = replaced {
            let removed = self.propagator.uninstall(&mut self.bus, &previous);
            tracing::debug!(removed, "replaced existing reference");
        }
        let installed = self.propagator.install(&mut self.bus, &definition);

        metrics::counter!("denorm_references_registered_total").increment(1);
        tracing::info!(
            source = definition.source(),
            destination = definition.destination(),
            ref_property = definition.ref_property(),
            cardinality = %definition.cardinality(),
            handlers = installed,
            "reference registered"
        );

        Ok(definition)
    }

    /// Dispatches a notification to every handler bound to the pair.
    pub async fn notify(
        &self,
        operation: Operation,
        collection: &str,
        payload: Payload,
    ) -> Result<Vec<WriteOutcome>> {
        self.bus.notify(operation, collection, payload).await
    }

    /// Reports documents newly inserted into a collection.
    pub async fn notify_insert(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<Vec<WriteOutcome>> {
        self.notify(Operation::Insert, collection, Payload::Documents(documents))
            .await
    }

    /// Reports that the documents matching the filter were updated.
    pub async fn notify_update(&self, collection: &str, filter: Filter) -> Result<Vec<WriteOutcome>> {
        self.notify(Operation::Update, collection, Payload::Query(filter))
            .await
    }

    /// Reports that the documents matching the filter are about to be removed.
    pub async fn notify_remove(&self, collection: &str, filter: Filter) -> Result<Vec<WriteOutcome>> {
        self.notify(Operation::Remove, collection, Payload::Query(filter))
            .await
    }

    /// Recomputes cached fields of the given source documents.
    ///
    /// `ref_properties` narrows the recomputation to a subset of the
    /// collection's references; naming one that is not configured is an error.
    pub async fn sync(
        &self,
        collection: &str,
        input: impl Into<SyncInput>,
        ref_properties: Option<&[&str]>,
    ) -> Result<SyncReport> {
        let references = self.registry.select(collection, ref_properties)?;
        self.sync.sync(collection, input.into(), &references).await
    }

    /// Streams a whole collection through [`sync`](Self::sync).
    pub async fn sync_collection(&self, collection: &str) -> Result<SyncReport> {
        let stream = self.store().scan(collection).await?;
        self.sync(collection, stream, None).await
    }

    /// Re-syncs every listed collection, or every collection with at least
    /// one registered reference. Collections are processed in order and the
    /// first failure stops the run.
    #[tracing::instrument(skip(self))]
    pub async fn sync_all(&self, collections: Option<&[&str]>) -> Result<Vec<SyncReport>> {
        let collections: Vec<String> = match collections {
            Some(names) => names.iter().map(|name| name.to_string()).collect(),
            None => self.registry.collections(),
        };

        let mut reports = Vec::with_capacity(collections.len());
        for collection in &collections {
            reports.push(self.sync_collection(collection).await?);
        }
        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use document_store::{DocumentStoreExt, InMemoryDocumentStore};
    use serde_json::json;

    #[test]
    fn register_installs_handlers() {
        let mut engine = DenormEngine::new(InMemoryDocumentStore::new());
        let definition = engine
            .register(ReferenceConfig::new("Product", "Category"))
            .unwrap();

        assert_eq!(definition.ref_property(), "categoryId");
        assert_eq!(engine.registry().len(), 1);
        assert_eq!(engine.bus().handler_count(Operation::Update, "Category"), 1);
        assert_eq!(engine.bus().handler_count(Operation::Remove, "Category"), 1);
        assert_eq!(engine.bus().handler_count(Operation::Insert, "Product"), 1);
    }

    #[test]
    fn reregistering_replaces_handlers() {
        let mut engine = DenormEngine::new(InMemoryDocumentStore::new());
        engine
            .register(ReferenceConfig::new("Product", "Category"))
            .unwrap();
        engine
            .register(ReferenceConfig::new("Product", "Category").sync_on([Operation::Update]))
            .unwrap();

        assert_eq!(engine.registry().len(), 1);
        assert_eq!(engine.bus().handler_count(Operation::Update, "Category"), 1);
        assert_eq!(engine.bus().handler_count(Operation::Remove, "Category"), 0);
        assert_eq!(engine.bus().handler_count(Operation::Insert, "Product"), 0);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut engine = DenormEngine::new(InMemoryDocumentStore::new());
        let result = engine.register(ReferenceConfig::new("", "Category"));

        assert!(matches!(result, Err(crate::DenormError::Config(_))));
        assert!(engine.registry().is_empty());
    }

    #[tokio::test]
    async fn sync_with_unknown_reference_fails() {
        let mut engine = DenormEngine::new(InMemoryDocumentStore::new());
        engine
            .register(ReferenceConfig::new("Product", "Category"))
            .unwrap();

        let result = engine
            .sync("Product", Vec::<Document>::new(), Some(&["brandId"][..]))
            .await;
        assert!(matches!(
            result,
            Err(crate::DenormError::UnknownReference { .. })
        ));
    }

    #[tokio::test]
    async fn zero_batch_size_uses_the_default() {
        let store = InMemoryDocumentStore::new();
        let products = (1..=3i64)
            .map(|id| Document::new(id).with_field("categoryId", 1))
            .collect();
        store.insert_many("Product", products).await.unwrap();

        let mut engine =
            DenormEngine::with_config(store.clone(), EngineConfig::default().with_batch_size(0));
        engine
            .register(ReferenceConfig::new("Product", "Category"))
            .unwrap();
        assert_eq!(engine.config().batch_size(), 500);

        let report = engine.sync_collection("Product").await.unwrap();
        assert_eq!(report.batches, 1);
        assert_eq!(report.documents_scanned, 3);
    }

    #[tokio::test]
    async fn sync_all_defaults_to_registered_collections() {
        let store = InMemoryDocumentStore::new();
        store
            .insert_one("Category", Document::new(1).with_field("name", "category1"))
            .await
            .unwrap();
        store
            .insert_one("Product", Document::new(1).with_field("categoryId", 1))
            .await
            .unwrap();

        let mut engine =
            DenormEngine::with_config(store.clone(), EngineConfig::default().with_batch_size(10));
        engine
            .register(ReferenceConfig::new("Product", "Category"))
            .unwrap();

        let reports = engine.sync_all(None).await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].collection, "Product");
        assert_eq!(reports[0].documents_written, 1);

        let product = store.find_one("Product", 1.into()).await.unwrap().unwrap();
        assert_eq!(
            product.get("_category"),
            Some(&json!({"_id": 1, "name": "category1"}))
        );
    }
}
