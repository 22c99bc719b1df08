//! Reference-driven denormalization for document stores.
//!
//! Source documents cache a projection of the destination documents they
//! reference. This crate keeps those caches current:
//!
//! - [`ReferenceRegistry`]: normalized reference definitions per source collection
//! - [`EventBus`]: concurrent fan-out of insert/update/remove notifications
//! - [`ChangePropagator`]: handlers that turn notifications into bulk writes
//! - [`SyncEngine`]: batched recomputation for bootstrap and re-sync
//! - [`DenormEngine`]: the facade owning one registry and one bus
//!
//! ```no_run
//! use denorm::{DenormEngine, ReferenceConfig};
//! use document_store::{Filter, InMemoryDocumentStore};
//!
//! # async fn run() -> denorm::Result<()> {
//! let mut engine = DenormEngine::new(InMemoryDocumentStore::new());
//! engine.register(ReferenceConfig::new("Product", "Category"))?;
//! engine.sync_all(None).await?;
//! engine.notify_update("Category", Filter::id(1)).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod propagation;
pub mod reference;
pub mod registry;
pub mod report;
pub mod sync;

pub use config::EngineConfig;
pub use engine::DenormEngine;
pub use error::{ConfigError, DenormError, Result};
pub use events::{EventBus, EventHandler, Payload};
pub use propagation::{ChangePropagator, remove_statement, update_statement};
pub use reference::{Cardinality, Extractor, Operation, ReferenceConfig, ReferenceDefinition};
pub use registry::{ReferenceRegistry, References};
pub use report::{SyncReport, WriteOutcome};
pub use sync::{SyncEngine, SyncInput};
