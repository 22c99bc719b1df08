use thiserror::Error;

use crate::DocumentId;

/// Errors that can occur when interacting with the document store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A document with the same ID already exists in the collection.
    #[error("Duplicate document id {id} in collection {collection}")]
    DuplicateId { collection: String, id: DocumentId },

    /// A value could not be interpreted as a document.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    /// A write statement is malformed or cannot be applied.
    #[error("Invalid write: {0}")]
    InvalidWrite(String),

    /// A statement inside a bulk write failed. Nothing from the batch was applied.
    #[error("Bulk write failed at statement {index}: {message}")]
    BulkWrite { index: usize, message: String },

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for document store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
