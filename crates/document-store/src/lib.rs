//! Document store contract consumed by the denormalization engine.
//!
//! - [`DocumentStore`] trait: id lookups, filtered finds, lazy scans and
//!   multi-statement bulk writes
//! - [`InMemoryDocumentStore`] for tests and embedding
//! - [`PostgresDocumentStore`] backed by a JSONB table

pub mod document;
pub mod error;
pub mod filter;
pub mod memory;
pub mod postgres;
pub mod store;
pub mod write;

pub use common::DocumentId;
pub use document::{Document, ID_FIELD};
pub use error::{Result, StoreError};
pub use filter::Filter;
pub use memory::InMemoryDocumentStore;
pub use postgres::PostgresDocumentStore;
pub use store::{DocumentStore, DocumentStoreExt, DocumentStream};
pub use write::{BulkWrite, BulkWriteResult, WriteStatement};
