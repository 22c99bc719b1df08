//! Event handlers that keep cached fields current after destination changes.

use std::sync::Arc;

use async_trait::async_trait;
use document_store::{BulkWrite, Document, DocumentId, DocumentStore, Filter, WriteStatement};

use crate::Result;
use crate::events::{EventBus, EventHandler, Payload};
use crate::reference::{Cardinality, Operation, ReferenceDefinition};
use crate::report::WriteOutcome;
use crate::sync::{SyncEngine, submit};

/// Builds the statement that refreshes one destination document's cached
/// projection on every source document referencing it.
pub fn update_statement(definition: &ReferenceDefinition, destination: &Document) -> WriteStatement {
    let id = destination.id.to_value();
    let filter = match definition.cardinality() {
        Cardinality::One => Filter::eq(definition.ref_property(), id),
        Cardinality::Many => Filter::contains(definition.ref_property(), id),
    };
    WriteStatement::update_many(filter).set(
        definition.cache_path(&destination.id),
        definition.extract(destination),
    )
}

/// Builds the statement that drops removed destinations from every source
/// document referencing any of them.
///
/// One clears both the cache and the reference property; Many drops the
/// per-ID cache entries and pulls the IDs out of the reference array.
pub fn remove_statement(definition: &ReferenceDefinition, ids: &[DocumentId]) -> WriteStatement {
    let values: Vec<_> = ids.iter().map(DocumentId::to_value).collect();
    let statement =
        WriteStatement::update_many(Filter::any_of(definition.ref_property(), values.clone()));

    match definition.cardinality() {
        Cardinality::One => statement
            .unset(definition.namespace())
            .unset(definition.ref_property()),
        Cardinality::Many => ids
            .iter()
            .fold(statement, |statement, id| {
                statement.unset(definition.cache_path(id))
            })
            .pull(definition.ref_property(), values),
    }
}

fn handler_name(operation: Operation, definition: &ReferenceDefinition) -> String {
    format!(
        "{operation}:{}.{}",
        definition.source(),
        definition.ref_property()
    )
}

/// Re-projects updated destination documents onto their sources.
pub struct UpdateHandler<S> {
    name: String,
    definition: Arc<ReferenceDefinition>,
    store: S,
}

#[async_trait]
impl<S: DocumentStore> EventHandler for UpdateHandler<S> {
    fn name(&self) -> &str {
        &self.name
    }

    #[tracing::instrument(skip(self, payload), fields(handler = %self.name))]
    async fn handle(&self, payload: &Payload) -> Result<WriteOutcome> {
        let destinations = self
            .store
            .find(self.definition.destination(), &payload.filter())
            .await?;

        let bulk: BulkWrite = destinations
            .iter()
            .map(|destination| update_statement(&self.definition, destination))
            .collect();
        submit(&self.store, self.definition.source(), bulk).await
    }
}

/// Detaches destination documents that are about to be removed.
pub struct RemoveHandler<S> {
    name: String,
    definition: Arc<ReferenceDefinition>,
    store: S,
}

#[async_trait]
impl<S: DocumentStore> EventHandler for RemoveHandler<S> {
    fn name(&self) -> &str {
        &self.name
    }

    #[tracing::instrument(skip(self, payload), fields(handler = %self.name))]
    async fn handle(&self, payload: &Payload) -> Result<WriteOutcome> {
        let ids: Vec<DocumentId> = match payload {
            Payload::Documents(documents) => documents.iter().map(|d| d.id.clone()).collect(),
            Payload::Query(filter) => {
                self.store
                    .find_ids(self.definition.destination(), filter)
                    .await?
            }
        };
        if ids.is_empty() {
            tracing::debug!("no destination documents matched");
            return Ok(WriteOutcome::NoOp);
        }

        let bulk = BulkWrite::from(vec![remove_statement(&self.definition, &ids)]);
        submit(&self.store, self.definition.source(), bulk).await
    }
}

/// Fills the cache of newly inserted source documents.
pub struct InsertHandler<S: DocumentStore> {
    name: String,
    definition: Arc<ReferenceDefinition>,
    sync: SyncEngine<S>,
}

#[async_trait]
impl<S: DocumentStore> EventHandler for InsertHandler<S> {
    fn name(&self) -> &str {
        &self.name
    }

    #[tracing::instrument(skip(self, payload), fields(handler = %self.name))]
    async fn handle(&self, payload: &Payload) -> Result<WriteOutcome> {
        let inserted = match payload {
            Payload::Documents(documents) => documents.clone(),
            Payload::Query(filter) => {
                self.sync
                    .store()
                    .find(self.definition.source(), filter)
                    .await?
            }
        };

        self.sync
            .sync_documents(
                self.definition.source(),
                &inserted,
                std::slice::from_ref(&self.definition),
            )
            .await
    }
}

/// Binds reference definitions to event bus handlers.
///
/// Update and remove handlers listen on the destination collection, the
/// insert handler on the source collection. Each is installed only when the
/// definition's `sync_on` includes its operation.
pub struct ChangePropagator<S: DocumentStore> {
    sync: SyncEngine<S>,
}

impl<S: DocumentStore + Clone + 'static> ChangePropagator<S> {
    pub fn new(sync: SyncEngine<S>) -> Self {
        Self { sync }
    }

    /// Installs the handlers of a definition, returning how many were added.
    pub fn install(&self, bus: &mut EventBus, definition: &Arc<ReferenceDefinition>) -> usize {
        let mut installed = 0;

        if definition.syncs_on(Operation::Update) {
            let handler = UpdateHandler {
                name: handler_name(Operation::Update, definition),
                definition: Arc::clone(definition),
                store: self.sync.store().clone(),
            };
            bus.on(Operation::Update, definition.destination(), Arc::new(handler));
            installed += 1;
        }

        if definition.syncs_on(Operation::Remove) {
            let handler = RemoveHandler {
                name: handler_name(Operation::Remove, definition),
                definition: Arc::clone(definition),
                store: self.sync.store().clone(),
            };
            bus.on(Operation::Remove, definition.destination(), Arc::new(handler));
            installed += 1;
        }

        if definition.syncs_on(Operation::Insert) {
            let handler = InsertHandler {
                name: handler_name(Operation::Insert, definition),
                definition: Arc::clone(definition),
                sync: self.sync.clone(),
            };
            bus.on(Operation::Insert, definition.source(), Arc::new(handler));
            installed += 1;
        }

        installed
    }

    /// Removes every handler previously installed for a definition.
    pub fn uninstall(&self, bus: &mut EventBus, definition: &ReferenceDefinition) -> usize {
        bus.off(
            Operation::Update,
            definition.destination(),
            &handler_name(Operation::Update, definition),
        ) + bus.off(
            Operation::Remove,
            definition.destination(),
            &handler_name(Operation::Remove, definition),
        ) + bus.off(
            Operation::Insert,
            definition.source(),
            &handler_name(Operation::Insert, definition),
        )
    }
}
