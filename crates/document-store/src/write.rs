use serde_json::{Map, Value};

use crate::{Document, Filter, Result, StoreError};

/// A single update statement inside a bulk write.
///
/// Operations are applied to each matched document in a fixed order:
/// sets, then unsets, then array pulls.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteStatement {
    /// Selects the documents to update.
    pub filter: Filter,

    /// Dotted path to value assignments.
    pub set: Map<String, Value>,

    /// Dotted paths to remove.
    pub unset: Vec<String>,

    /// Dotted path of an array field, and the elements to remove from it.
    pub pull: Vec<(String, Vec<Value>)>,

    /// Apply to every matched document rather than only the first.
    pub multi: bool,
}

impl WriteStatement {
    /// Creates a statement that updates at most one matching document.
    pub fn update_one(filter: Filter) -> Self {
        Self {
            filter,
            set: Map::new(),
            unset: Vec::new(),
            pull: Vec::new(),
            multi: false,
        }
    }

    /// Creates a statement that updates every matching document.
    pub fn update_many(filter: Filter) -> Self {
        Self {
            multi: true,
            ..Self::update_one(filter)
        }
    }

    /// Assigns a value at a dotted path.
    pub fn set(mut self, path: impl Into<String>, value: Value) -> Self {
        self.set.insert(path.into(), value);
        self
    }

    /// Removes the value at a dotted path.
    pub fn unset(mut self, path: impl Into<String>) -> Self {
        self.unset.push(path.into());
        self
    }

    /// Removes the given elements from the array at a dotted path.
    pub fn pull(mut self, path: impl Into<String>, values: Vec<Value>) -> Self {
        self.pull.push((path.into(), values));
        self
    }

    /// Returns true if the statement carries no operations.
    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.unset.is_empty() && self.pull.is_empty()
    }

    /// Applies the statement's operations to one document.
    ///
    /// Returns true if the document changed.
    pub fn apply(&self, doc: &mut Document) -> Result<bool> {
        let mut modified = false;
        for (path, value) in &self.set {
            modified |= doc.set(path, value.clone())?;
        }
        for path in &self.unset {
            modified |= doc.unset(path)?;
        }
        for (path, values) in &self.pull {
            modified |= doc.pull(path, values)?;
        }
        Ok(modified)
    }
}

/// An ordered batch of statements submitted to the store in one request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkWrite {
    statements: Vec<WriteStatement>,
}

impl BulkWrite {
    /// Creates an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a statement to the batch.
    pub fn push(&mut self, statement: WriteStatement) {
        self.statements.push(statement);
    }

    /// Returns the statements in submission order.
    pub fn statements(&self) -> &[WriteStatement] {
        &self.statements
    }

    /// Returns the number of statements.
    pub fn len(&self) -> usize {
        self.statements.len()
    }

    /// Returns true if the batch holds no statements.
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}

impl From<Vec<WriteStatement>> for BulkWrite {
    fn from(statements: Vec<WriteStatement>) -> Self {
        Self { statements }
    }
}

impl FromIterator<WriteStatement> for BulkWrite {
    fn from_iter<T: IntoIterator<Item = WriteStatement>>(iter: T) -> Self {
        Self {
            statements: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for BulkWrite {
    type Item = WriteStatement;
    type IntoIter = std::vec::IntoIter<WriteStatement>;

    fn into_iter(self) -> Self::IntoIter {
        self.statements.into_iter()
    }
}

/// Counts reported by the store for a completed bulk write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkWriteResult {
    /// Documents selected by the statements' filters.
    pub matched: u64,

    /// Documents whose content actually changed.
    pub modified: u64,
}

impl BulkWriteResult {
    /// Adds another result's counts to this one.
    pub fn merge(&mut self, other: BulkWriteResult) {
        self.matched += other.matched;
        self.modified += other.modified;
    }
}

/// Validates a batch before submitting it.
pub fn validate_bulk(bulk: &BulkWrite) -> Result<()> {
    if bulk.is_empty() {
        return Err(StoreError::InvalidWrite(
            "Cannot submit an empty bulk write".to_string(),
        ));
    }

    for (index, statement) in bulk.statements().iter().enumerate() {
        if statement.is_empty() {
            return Err(StoreError::InvalidWrite(format!(
                "Statement {index} has no operations"
            )));
        }
    }

    Ok(())
}
