use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{DocumentId, Result, StoreError};

/// Name of the identifier field in a document's JSON form.
pub const ID_FIELD: &str = "_id";

/// A stored document: a unique identifier plus arbitrary JSON fields.
///
/// Field access goes through dotted paths (`"_products.3"`), where each
/// segment names a key of a nested object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Unique identifier within the collection.
    #[serde(rename = "_id")]
    pub id: DocumentId,

    /// Every field except the identifier.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Document {
    /// Creates an empty document with the given ID.
    pub fn new(id: impl Into<DocumentId>) -> Self {
        Self {
            id: id.into(),
            fields: Map::new(),
        }
    }

    /// Adds a top-level field.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Parses a document from its JSON form. The object must carry an `_id`.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(mut fields) = value else {
            return Err(StoreError::InvalidDocument(
                "document must be a JSON object".to_string(),
            ));
        };
        let id = fields
            .remove(ID_FIELD)
            .as_ref()
            .and_then(DocumentId::from_value)
            .ok_or_else(|| {
                StoreError::InvalidDocument(format!("document is missing a valid {ID_FIELD}"))
            })?;
        Ok(Self { id, fields })
    }

    /// Returns the JSON form of this document, `_id` included.
    pub fn to_value(&self) -> Value {
        let mut object = Map::with_capacity(self.fields.len() + 1);
        object.insert(ID_FIELD.to_string(), self.id.to_value());
        for (key, value) in &self.fields {
            object.insert(key.clone(), value.clone());
        }
        Value::Object(object)
    }

    /// Looks up a value by dotted path.
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let mut current = self.fields.get(segments.next()?)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    /// Sets a value by dotted path, creating intermediate objects as needed.
    ///
    /// Returns true if the stored value changed.
    pub fn set(&mut self, path: &str, value: Value) -> Result<bool> {
        let (parents, leaf) = split_path(path)?;
        let mut current = &mut self.fields;
        for segment in parents {
            let entry = current
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            current = match entry {
                Value::Object(map) => map,
                other => {
                    return Err(StoreError::InvalidWrite(format!(
                        "cannot set {path}: {segment} holds a non-object value {other}"
                    )));
                }
            };
        }
        if current.get(leaf) == Some(&value) {
            return Ok(false);
        }
        current.insert(leaf.to_string(), value);
        Ok(true)
    }

    /// Removes the value at a dotted path. Missing paths are ignored.
    ///
    /// Returns true if a value was removed.
    pub fn unset(&mut self, path: &str) -> Result<bool> {
        let (parents, leaf) = split_path(path)?;
        let mut current = &mut self.fields;
        for segment in parents {
            current = match current.get_mut(segment) {
                Some(Value::Object(map)) => map,
                _ => return Ok(false),
            };
        }
        Ok(current.remove(leaf).is_some())
    }

    /// Removes every element equal to one of `values` from the array at a dotted path.
    ///
    /// A missing field is left alone; a non-array field is an error.
    /// Returns true if at least one element was removed.
    pub fn pull(&mut self, path: &str, values: &[Value]) -> Result<bool> {
        let (parents, leaf) = split_path(path)?;
        let mut current = &mut self.fields;
        for segment in parents {
            current = match current.get_mut(segment) {
                Some(Value::Object(map)) => map,
                _ => return Ok(false),
            };
        }
        match current.get_mut(leaf) {
            None => Ok(false),
            Some(Value::Array(items)) => {
                let before = items.len();
                items.retain(|item| !values.contains(item));
                Ok(items.len() != before)
            }
            Some(other) => Err(StoreError::InvalidWrite(format!(
                "cannot pull from {path}: non-array value {other}"
            ))),
        }
    }
}

fn split_path(path: &str) -> Result<(Vec<&str>, &str)> {
    if path.is_empty() || path.split('.').any(str::is_empty) {
        return Err(StoreError::InvalidWrite(format!("invalid field path '{path}'")));
    }
    if path == ID_FIELD || path.starts_with("_id.") {
        return Err(StoreError::InvalidWrite(format!(
            "the {ID_FIELD} field is immutable"
        )));
    }
    let mut segments: Vec<&str> = path.split('.').collect();
    let leaf = segments.pop().unwrap_or(path);
    Ok((segments, leaf))
}
