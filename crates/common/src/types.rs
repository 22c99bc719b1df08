use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Unique identifier for a document.
///
/// Stores accept integer, UUID and free-form string identifiers. The
/// serialized form is the bare JSON value, so `3`, `"3f2a...-..."` and
/// `"sku-1"` all round-trip through documents unchanged.
///
/// A string becomes the `Uuid` variant only when it is already in the
/// canonical hyphenated lowercase form; any other spelling stays a `Str`
/// verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(untagged)]
pub enum DocumentId {
    Int(i64),
    Uuid(Uuid),
    Str(String),
}

impl DocumentId {
    /// Creates a new random UUID-backed document ID.
    pub fn new_uuid() -> Self {
        Self::Uuid(Uuid::new_v4())
    }

    /// Reads an identifier out of a JSON value.
    ///
    /// Returns None for values that cannot identify a document
    /// (null, booleans, floats, arrays, objects).
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(Self::Int),
            Value::String(s) => Some(Self::from(s.as_str())),
            _ => None,
        }
    }

    /// Returns the identifier as a JSON value.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Int(n) => Value::from(*n),
            Self::Uuid(u) => Value::String(u.to_string()),
            Self::Str(s) => Value::String(s.clone()),
        }
    }

    /// Returns the stringified form used as an object key.
    ///
    /// `.` separates field path segments, so it is replaced by U+FF0E
    /// (fullwidth full stop) to keep the key a single segment.
    pub fn as_key(&self) -> String {
        self.to_string().replace('.', KEY_DOT)
    }

    fn from_string(value: String) -> Self {
        match Uuid::parse_str(&value) {
            Ok(uuid) if uuid.to_string() == value => Self::Uuid(uuid),
            _ => Self::Str(value),
        }
    }
}

/// Stand-in for `.` inside object keys.
const KEY_DOT: &str = "\u{ff0e}";

impl<'de> Deserialize<'de> for DocumentId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(i64),
            Str(String),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Int(n) => Self::Int(n),
            Raw::Str(s) => Self::from_string(s),
        })
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{n}"),
            Self::Uuid(u) => write!(f, "{u}"),
            Self::Str(s) => f.write_str(s),
        }
    }
}

impl From<i64> for DocumentId {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for DocumentId {
    fn from(value: i32) -> Self {
        Self::Int(value.into())
    }
}

impl From<u32> for DocumentId {
    fn from(value: u32) -> Self {
        Self::Int(value.into())
    }
}

impl From<Uuid> for DocumentId {
    fn from(uuid: Uuid) -> Self {
        Self::Uuid(uuid)
    }
}

impl From<&str> for DocumentId {
    fn from(value: &str) -> Self {
        Self::from_string(value.to_string())
    }
}

impl From<String> for DocumentId {
    fn from(value: String) -> Self {
        Self::from_string(value)
    }
}

impl From<DocumentId> for Value {
    fn from(id: DocumentId) -> Self {
        id.to_value()
    }
}
