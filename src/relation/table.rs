//! Relation Table
//!
//! Compiles relation declarations into a per-collection index keyed by the
//! owning field name. Built once at startup and immutable afterwards.

use super::{IdField, RelationDeclaration, RelationDescriptor};
use crate::error::DeclarationError;
use crate::key;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

/// Result of a relation lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationMatch {
    pub descriptor: Arc<RelationDescriptor>,
    /// Parameter carried by an effective structured field name (`group_$3_ids` -> `3`).
    pub parameter: Option<String>,
}

#[derive(Debug, Default)]
struct CollectionRelations {
    by_field: BTreeMap<String, Arc<RelationDescriptor>>,
    /// id field (or template) -> owning field
    by_id_field: HashMap<String, String>,
}

/// Per-collection relation index
#[derive(Debug, Default)]
pub struct RelationTable {
    collections: HashMap<String, CollectionRelations>,
}

impl RelationTable {
    /// Compile declarations into the index. Fails on malformed structured
    /// fields and on two relations claiming the same owning field.
    pub fn build(declarations: &[RelationDeclaration]) -> Result<Self, DeclarationError> {
        let mut table = RelationTable::default();
        for declaration in declarations {
            for descriptor in declaration.descriptors()? {
                table.insert(descriptor)?;
            }
        }
        debug!(
            collections = table.collections.len(),
            relations = table.len(),
            "Compiled relation table"
        );
        Ok(table)
    }

    fn insert(&mut self, descriptor: RelationDescriptor) -> Result<(), DeclarationError> {
        let relations = self
            .collections
            .entry(descriptor.owner.clone())
            .or_default();
        if relations.by_field.contains_key(&descriptor.field) {
            return Err(DeclarationError::Invalid(format!(
                "relation field {}.{} declared twice",
                descriptor.owner, descriptor.field
            )));
        }
        relations
            .by_id_field
            .insert(descriptor.id_field.name().to_string(), descriptor.field.clone());
        relations
            .by_field
            .insert(descriptor.field.clone(), Arc::new(descriptor));
        Ok(())
    }

    /// Find a relation by owning field name.
    pub fn find_relation(&self, collection: &str, field: &str) -> Option<Arc<RelationDescriptor>> {
        self.collections
            .get(collection)?
            .by_field
            .get(&field.to_lowercase())
            .cloned()
    }

    /// Find a relation by owning field name, id field name, structured
    /// template or effective structured field name.
    pub fn find(&self, collection: &str, name: &str) -> Option<RelationMatch> {
        let relations = self.collections.get(collection)?;
        let name = name.to_lowercase();

        let by_name = relations.by_field.get(&name).or_else(|| {
            relations
                .by_id_field
                .get(&name)
                .and_then(|field| relations.by_field.get(field))
        });
        if let Some(descriptor) = by_name {
            return Some(RelationMatch {
                descriptor: Arc::clone(descriptor),
                parameter: None,
            });
        }

        if !key::is_structured_field(&name) {
            return None;
        }
        relations.by_field.values().find_map(|descriptor| {
            let IdField::Structured { prefix, suffix, .. } = &descriptor.id_field else {
                return None;
            };
            key::extract_parameter(prefix, suffix, &name).map(|parameter| RelationMatch {
                descriptor: Arc::clone(descriptor),
                parameter: Some(parameter.to_string()),
            })
        })
    }

    /// All relations owned by a collection, ordered by field name.
    pub fn relations_of(&self, collection: &str) -> Vec<Arc<RelationDescriptor>> {
        self.collections
            .get(collection)
            .map(|relations| relations.by_field.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.collections.values().map(|r| r.by_field.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
