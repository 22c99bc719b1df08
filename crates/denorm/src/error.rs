//! Engine error types.

use document_store::StoreError;
use thiserror::Error;

/// Errors raised while normalizing a reference configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A required option was absent or empty.
    #[error("Missing required reference option: {0}")]
    MissingField(&'static str),

    /// The cardinality was not one of `one` or `many`.
    #[error("Invalid cardinality '{0}', expected 'one' or 'many'")]
    InvalidCardinality(String),
}

/// Errors that can occur during registration, propagation or sync.
#[derive(Debug, Error)]
pub enum DenormError {
    /// A reference definition was rejected at registration.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The document store failed a lookup or a bulk write.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A sync asked for a reference property the collection does not define.
    #[error("No reference '{ref_property}' is configured for collection '{collection}'")]
    UnknownReference {
        collection: String,
        ref_property: String,
    },
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, DenormError>;
