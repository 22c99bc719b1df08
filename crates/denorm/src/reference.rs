//! Reference definitions: configuration, defaults and normalization.

use std::collections::BTreeSet;
use std::sync::Arc;

use document_store::{Document, DocumentId};
use heck::ToLowerCamelCase;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ConfigError;

/// Whether a reference property holds one destination ID or an array of them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    #[default]
    One,
    Many,
}

impl std::str::FromStr for Cardinality {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "one" => Ok(Self::One),
            "many" => Ok(Self::Many),
            _ => Err(ConfigError::InvalidCardinality(s.to_string())),
        }
    }
}

impl std::fmt::Display for Cardinality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::One => f.write_str("one"),
            Self::Many => f.write_str("many"),
        }
    }
}

/// A mutation kind a reference can react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Insert,
    Update,
    Remove,
}

impl Operation {
    /// Every operation, in declaration order.
    pub const ALL: [Operation; 3] = [Operation::Insert, Operation::Update, Operation::Remove];

    /// Returns the lowercase name used in logs and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Remove => "remove",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Projection from a destination document to the value cached on sources.
///
/// The engine treats it as an opaque pure function.
#[derive(Clone)]
pub struct Extractor(Arc<dyn Fn(&Document) -> Value + Send + Sync>);

impl Extractor {
    /// Wraps a projection closure.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Document) -> Value + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Caches the whole destination document, `_id` included.
    pub fn identity() -> Self {
        Self::new(Document::to_value)
    }

    /// Caches an object holding the listed top-level fields that are present.
    pub fn pick<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fields: Vec<String> = fields.into_iter().map(Into::into).collect();
        Self::new(move |doc| {
            let mut picked = Map::new();
            for field in &fields {
                if let Some(value) = doc.fields.get(field) {
                    picked.insert(field.clone(), value.clone());
                }
            }
            Value::Object(picked)
        })
    }

    /// Runs the projection.
    pub fn extract(&self, doc: &Document) -> Value {
        (self.0)(doc)
    }
}

impl Default for Extractor {
    fn default() -> Self {
        Self::identity()
    }
}

impl std::fmt::Debug for Extractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Extractor(..)")
    }
}

/// User-facing reference options. Only `source` and `destination` are required.
///
/// Deserializes from camelCase JSON (`refProperty`, `syncOn`, ...); the
/// extractor can only be supplied in code.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReferenceConfig {
    pub source: Option<String>,
    pub destination: Option<String>,
    pub ref_property: Option<String>,
    #[serde(alias = "type")]
    pub cardinality: Option<String>,
    #[serde(alias = "ns")]
    pub namespace: Option<String>,
    #[serde(skip)]
    pub extractor: Option<Extractor>,
    pub sync_on: Option<Vec<Operation>>,
}

impl ReferenceConfig {
    /// Starts a configuration caching `destination` documents on `source` documents.
    pub fn new(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            source: Some(source.into()),
            destination: Some(destination.into()),
            ..Default::default()
        }
    }

    /// Marks the reference property as an array of IDs.
    pub fn many(mut self) -> Self {
        self.cardinality = Some(Cardinality::Many.to_string());
        self
    }

    /// Sets the cardinality by name (`one` or `many`).
    pub fn cardinality(mut self, cardinality: impl Into<String>) -> Self {
        self.cardinality = Some(cardinality.into());
        self
    }

    /// Overrides the derived reference property name.
    pub fn ref_property(mut self, ref_property: impl Into<String>) -> Self {
        self.ref_property = Some(ref_property.into());
        self
    }

    /// Overrides the derived namespace field name.
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Sets the projection closure.
    pub fn extractor<F>(mut self, f: F) -> Self
    where
        F: Fn(&Document) -> Value + Send + Sync + 'static,
    {
        self.extractor = Some(Extractor::new(f));
        self
    }

    /// Sets a prebuilt projection.
    pub fn with_extractor(mut self, extractor: Extractor) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// Restricts which notifications the reference reacts to.
    pub fn sync_on(mut self, operations: impl IntoIterator<Item = Operation>) -> Self {
        self.sync_on = Some(operations.into_iter().collect());
        self
    }

    /// Validates the options and fills in every default.
    pub fn normalize(self) -> Result<ReferenceDefinition, ConfigError> {
        let source = non_empty(self.source).ok_or(ConfigError::MissingField("source"))?;
        let destination =
            non_empty(self.destination).ok_or(ConfigError::MissingField("destination"))?;
        let cardinality = match self.cardinality {
            Some(raw) => raw.parse()?,
            None => Cardinality::One,
        };

        let ref_property = non_empty(self.ref_property)
            .unwrap_or_else(|| default_ref_property(&destination, cardinality));
        let namespace = non_empty(self.namespace)
            .unwrap_or_else(|| default_namespace(&destination, cardinality));
        let sync_on = match self.sync_on {
            Some(ops) => ops.into_iter().collect(),
            None => Operation::ALL.into_iter().collect(),
        };

        Ok(ReferenceDefinition {
            source,
            destination,
            ref_property,
            cardinality,
            namespace,
            extractor: self.extractor.unwrap_or_default(),
            sync_on,
        })
    }
}

/// A fully-populated reference definition. Immutable once built.
#[derive(Debug, Clone)]
pub struct ReferenceDefinition {
    source: String,
    destination: String,
    ref_property: String,
    cardinality: Cardinality,
    namespace: String,
    extractor: Extractor,
    sync_on: BTreeSet<Operation>,
}

impl ReferenceDefinition {
    /// Collection whose documents carry the cache.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Collection being cached from.
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Field on source documents holding the destination ID(s).
    pub fn ref_property(&self) -> &str {
        &self.ref_property
    }

    pub fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    /// Field on source documents holding the cached projection.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn extractor(&self) -> &Extractor {
        &self.extractor
    }

    /// Operations this reference reacts to.
    pub fn sync_on(&self) -> &BTreeSet<Operation> {
        &self.sync_on
    }

    /// Returns true if notifications of this kind are propagated.
    pub fn syncs_on(&self, operation: Operation) -> bool {
        self.sync_on.contains(&operation)
    }

    /// Field path written for one destination document: the bare namespace
    /// for One, `namespace.<id>` for Many, with the id in its
    /// [`DocumentId::as_key`] form.
    pub fn cache_path(&self, id: &DocumentId) -> String {
        match self.cardinality {
            Cardinality::One => self.namespace.clone(),
            Cardinality::Many => format!("{}.{}", self.namespace, id.as_key()),
        }
    }

    /// Projects a destination document.
    pub fn extract(&self, doc: &Document) -> Value {
        self.extractor.extract(doc)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

/// `Category` → `categoryId`, or `categoryIds` for Many.
pub fn default_ref_property(destination: &str, cardinality: Cardinality) -> String {
    let base = destination.to_lower_camel_case();
    match cardinality {
        Cardinality::One => format!("{base}Id"),
        Cardinality::Many => format!("{base}Ids"),
    }
}

/// `Category` → `_category`, or `_categories` for Many.
pub fn default_namespace(destination: &str, cardinality: Cardinality) -> String {
    let base = destination.to_lower_camel_case();
    match cardinality {
        Cardinality::One => format!("_{base}"),
        Cardinality::Many => format!("_{}", pluralize(&base)),
    }
}

/// English plural of a lower-camel identifier's last word.
pub fn pluralize(word: &str) -> String {
    let lower = word.to_ascii_lowercase();
    if let Some(stem) = word.strip_suffix('y')
        && !stem.is_empty()
        && !stem.ends_with(['a', 'e', 'i', 'o', 'u'])
    {
        return format!("{stem}ies");
    }
    if ["s", "x", "z", "ch", "sh"]
        .iter()
        .any(|suffix| lower.ends_with(suffix))
    {
        return format!("{word}es");
    }
    format!("{word}s")
}
