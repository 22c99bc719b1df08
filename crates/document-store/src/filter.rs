use serde_json::Value;

use crate::document::{Document, ID_FIELD};
use crate::DocumentId;

/// Predicate selecting documents within a collection.
///
/// Field names are dotted paths. Matching follows document-store
/// conventions: a condition on an array field is satisfied when any
/// element satisfies it.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Filter {
    /// Matches every document.
    #[default]
    All,

    /// Matches the document with this ID.
    Id(DocumentId),

    /// Matches documents whose ID is in the set.
    IdIn(Vec<DocumentId>),

    /// Matches when the field equals the value, or is an array containing it.
    Eq { field: String, value: Value },

    /// Matches when the field is an array containing the value.
    Contains { field: String, value: Value },

    /// Matches when the field equals one of the values, or is an array
    /// sharing at least one element with them.
    AnyOf { field: String, values: Vec<Value> },

    /// Matches when every inner filter matches.
    And(Vec<Filter>),
}

impl Filter {
    /// Creates a filter for a single document.
    pub fn id(id: impl Into<DocumentId>) -> Self {
        Self::Id(id.into())
    }

    /// Creates a filter for a set of documents.
    pub fn ids<I, T>(ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<DocumentId>,
    {
        Self::IdIn(ids.into_iter().map(Into::into).collect())
    }

    /// Creates an equality filter.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Creates an array-membership filter.
    pub fn contains(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Contains {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Creates a set-membership filter.
    pub fn any_of(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self::AnyOf {
            field: field.into(),
            values,
        }
    }

    /// Combines this filter with another.
    pub fn and(self, other: Filter) -> Self {
        match self {
            Self::And(mut filters) => {
                filters.push(other);
                Self::And(filters)
            }
            Self::All => other,
            filter => Self::And(vec![filter, other]),
        }
    }

    /// Evaluates the filter against a document.
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Self::All => true,
            Self::Id(id) => &doc.id == id,
            Self::IdIn(ids) => ids.contains(&doc.id),
            Self::Eq { field, value } => {
                field_values(doc, field).any(|candidate| &candidate == value)
            }
            Self::Contains { field, value } => match doc.get(field) {
                Some(Value::Array(items)) => items.contains(value),
                _ => false,
            },
            Self::AnyOf { field, values } => {
                field_values(doc, field).any(|candidate| values.contains(&candidate))
            }
            Self::And(filters) => filters.iter().all(|f| f.matches(doc)),
        }
    }
}

/// Yields the value at `field`, or each element when it is an array.
fn field_values<'a>(doc: &'a Document, field: &str) -> Box<dyn Iterator<Item = Value> + 'a> {
    if field == ID_FIELD {
        return Box::new(std::iter::once(doc.id.to_value()));
    }
    match doc.get(field) {
        Some(Value::Array(items)) => Box::new(items.iter().cloned()),
        Some(value) => Box::new(std::iter::once(value.clone())),
        None => Box::new(std::iter::empty()),
    }
}
