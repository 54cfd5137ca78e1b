//! Fieldset registry: named, reusable field subsets per collection.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Name that always selects a collection's default fieldset.
pub const DEFAULT_FIELDSET: &str = "default";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldsetTable {
    #[serde(default)]
    pub default: Vec<String>,
    #[serde(default, flatten)]
    pub named: BTreeMap<String, Vec<String>>,
}

impl FieldsetTable {
    pub fn new(default: Vec<String>) -> Self {
        Self {
            default,
            named: BTreeMap::new(),
        }
    }

    pub fn with(mut self, name: &str, fields: &[&str]) -> Self {
        self.named
            .insert(name.to_string(), fields.iter().map(|f| f.to_string()).collect());
        self
    }

    /// Fields of a named set; `None` or `"default"` selects the default set.
    pub fn resolve(&self, name: Option<&str>) -> Option<&[String]> {
        match name {
            None | Some(DEFAULT_FIELDSET) => Some(&self.default),
            Some(name) => self.named.get(name).map(Vec::as_slice),
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(DEFAULT_FIELDSET).chain(self.named.keys().map(String::as_str))
    }
}

/// Fieldset tables of every registered collection
#[derive(Debug, Clone, Default)]
pub struct FieldsetRegistry {
    tables: HashMap<String, FieldsetTable>,
}

impl FieldsetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, collection: &str, table: FieldsetTable) {
        self.tables.insert(collection.to_string(), table);
    }

    pub fn get(&self, collection: &str) -> Option<&FieldsetTable> {
        self.tables.get(collection)
    }

    pub fn contains(&self, collection: &str) -> bool {
        self.tables.contains_key(collection)
    }
}
