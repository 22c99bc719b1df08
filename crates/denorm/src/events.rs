//! In-process publish/subscribe keyed by operation and collection.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use document_store::{Document, Filter};
use futures_util::future::try_join_all;

use crate::Result;
use crate::reference::Operation;
use crate::report::WriteOutcome;

/// What a notification carries: documents in hand, or a query selecting them.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// The affected documents themselves (inserts).
    Documents(Vec<Document>),

    /// A predicate selecting the affected documents (updates, removals).
    Query(Filter),
}

impl Payload {
    /// Returns a filter selecting the payload's documents.
    pub fn filter(&self) -> Filter {
        match self {
            Self::Documents(docs) => Filter::IdIn(docs.iter().map(|d| d.id.clone()).collect()),
            Self::Query(filter) => filter.clone(),
        }
    }
}

/// A reaction to notifications on one (operation, collection) pair.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Returns the name identifying this handler on the bus.
    fn name(&self) -> &str;

    /// Handles a single notification.
    async fn handle(&self, payload: &Payload) -> Result<WriteOutcome>;
}

type Handlers = HashMap<String, Vec<Arc<dyn EventHandler>>>;

/// Dispatches notifications to every handler registered for the
/// (operation, collection) pair, concurrently.
///
/// Each engine owns its own bus; there is no process-wide instance.
pub struct EventBus {
    handlers: HashMap<Operation, Handlers>,
}

impl EventBus {
    /// Creates a bus with an empty handler table for every operation.
    pub fn new() -> Self {
        Self {
            handlers: Operation::ALL
                .into_iter()
                .map(|op| (op, Handlers::new()))
                .collect(),
        }
    }

    /// Registers a handler. Handlers on the same pair are independent.
    pub fn on(&mut self, operation: Operation, collection: &str, handler: Arc<dyn EventHandler>) {
        tracing::debug!(%operation, collection, handler = handler.name(), "handler registered");
        self.handlers
            .entry(operation)
            .or_default()
            .entry(collection.to_string())
            .or_default()
            .push(handler);
    }

    /// Removes every handler with the given name from a pair.
    ///
    /// Returns how many were removed.
    pub fn off(&mut self, operation: Operation, collection: &str, name: &str) -> usize {
        let Some(handlers) = self
            .handlers
            .get_mut(&operation)
            .and_then(|by_collection| by_collection.get_mut(collection))
        else {
            return 0;
        };
        let before = handlers.len();
        handlers.retain(|h| h.name() != name);
        before - handlers.len()
    }

    /// Returns the number of handlers registered for a pair.
    pub fn handler_count(&self, operation: Operation, collection: &str) -> usize {
        self.handlers
            .get(&operation)
            .and_then(|by_collection| by_collection.get(collection))
            .map_or(0, Vec::len)
    }

    /// Runs every handler for the pair concurrently and waits for all of them.
    ///
    /// The first handler failure fails the whole notification. Outcomes are
    /// returned in registration order; a pair with no handlers yields none.
    #[tracing::instrument(skip(self, payload), fields(operation = %operation))]
    pub async fn notify(
        &self,
        operation: Operation,
        collection: &str,
        payload: Payload,
    ) -> Result<Vec<WriteOutcome>> {
        metrics::counter!("denorm_notifications_total", "operation" => operation.as_str())
            .increment(1);

        let handlers = self
            .handlers
            .get(&operation)
            .and_then(|by_collection| by_collection.get(collection))
            .filter(|handlers| !handlers.is_empty());
        let Some(handlers) = handlers else {
            tracing::debug!("no handlers registered");
            return Ok(Vec::new());
        };

        try_join_all(handlers.iter().map(|h| h.handle(&payload)))
            .await
            .inspect_err(|e| tracing::warn!(error = %e, "notification handler failed"))
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
