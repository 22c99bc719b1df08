//! Shared types for the denormalization engine.

mod types;

pub use types::DocumentId;
