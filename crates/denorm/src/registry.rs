//! Registry of normalized reference definitions.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::error::ConfigError;
use crate::reference::{ReferenceConfig, ReferenceDefinition};
use crate::{DenormError, Result};

/// Definitions of one source collection, keyed by reference property.
pub type References = BTreeMap<String, Arc<ReferenceDefinition>>;

/// A stored definition and the one it replaced, if any.
pub type Registration = (Arc<ReferenceDefinition>, Option<Arc<ReferenceDefinition>>);

static NO_REFERENCES: References = BTreeMap::new();

/// Stores reference definitions keyed by source collection and reference property.
#[derive(Debug, Default)]
pub struct ReferenceRegistry {
    by_source: HashMap<String, References>,
}

impl ReferenceRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalizes and stores a definition.
    ///
    /// A definition with the same source and reference property replaces the
    /// earlier one, which is returned alongside the new definition.
    pub fn register(
        &mut self,
        config: ReferenceConfig,
    ) -> std::result::Result<Registration, ConfigError> {
        let definition = Arc::new(config.normalize()?);
        let replaced = self
            .by_source
            .entry(definition.source().to_string())
            .or_default()
            .insert(definition.ref_property().to_string(), Arc::clone(&definition));
        Ok((definition, replaced))
    }

    /// Returns the definitions of a source collection, or an empty mapping.
    pub fn get(&self, collection: &str) -> &References {
        self.by_source.get(collection).unwrap_or(&NO_REFERENCES)
    }

    /// Returns one definition.
    pub fn definition(
        &self,
        collection: &str,
        ref_property: &str,
    ) -> Option<&Arc<ReferenceDefinition>> {
        self.get(collection).get(ref_property)
    }

    /// Returns the source collections owning at least one definition, sorted.
    pub fn collections(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .by_source
            .iter()
            .filter(|(_, refs)| !refs.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Resolves the definitions a sync should recompute: the named subset,
    /// or every definition of the collection.
    pub fn select(
        &self,
        collection: &str,
        ref_properties: Option<&[&str]>,
    ) -> Result<Vec<Arc<ReferenceDefinition>>> {
        let references = self.get(collection);
        match ref_properties {
            None => Ok(references.values().cloned().collect()),
            Some(props) => props
                .iter()
                .map(|prop| {
                    references
                        .get(*prop)
                        .cloned()
                        .ok_or_else(|| DenormError::UnknownReference {
                            collection: collection.to_string(),
                            ref_property: prop.to_string(),
                        })
                })
                .collect(),
        }
    }

    /// Iterates over every stored definition.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<ReferenceDefinition>> {
        self.by_source.values().flat_map(BTreeMap::values)
    }

    /// Returns the number of stored definitions.
    pub fn len(&self) -> usize {
        self.by_source.values().map(BTreeMap::len).sum()
    }

    /// Returns true if nothing has been registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
