//! Outcomes of propagation and sync writes.

use document_store::BulkWriteResult;

/// Result of one attempted batched write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Nothing needed writing, so nothing was submitted.
    NoOp,

    /// A bulk write was submitted and the store reported these counts.
    Applied(BulkWriteResult),
}

impl WriteOutcome {
    /// Returns true if no write was submitted.
    pub fn is_noop(&self) -> bool {
        matches!(self, Self::NoOp)
    }

    /// Returns the number of documents the store modified.
    pub fn modified(&self) -> u64 {
        match self {
            Self::NoOp => 0,
            Self::Applied(result) => result.modified,
        }
    }
}

/// Summary of a sync over one source collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Source collection that was recomputed.
    pub collection: String,

    /// Batches pulled from the input.
    pub batches: u64,

    /// Source documents examined.
    pub documents_scanned: u64,

    /// Source documents included in a submitted write.
    pub documents_written: u64,

    /// Bulk writes actually submitted.
    pub writes_submitted: u64,
}

impl SyncReport {
    /// Creates an empty report for a collection.
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            ..Default::default()
        }
    }
}

impl std::fmt::Display for SyncReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} scanned, {} written in {} batch(es)",
            self.collection, self.documents_scanned, self.documents_written, self.batches
        )
    }
}
