//! Schema files
//!
//! A TOML document declaring the collections the cache knows about and the
//! relation pairs between them. Compiling a schema yields the relation
//! table and one [`CollectionModel`] per declared collection.

use crate::error::SchemaError;
use crate::relation::{RelationDeclaration, RelationTable};
use crate::repository::{compare_by_field, default_title, CollectionModel, FullListSource, ViewModel};
use crate::request::{FieldsetTable, SimplifiedModelRequest};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Parsed schema file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaDefinition {
    #[serde(default)]
    pub collections: BTreeMap<String, CollectionDefinition>,
    #[serde(default)]
    pub relations: Vec<RelationDeclaration>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionDefinition {
    #[serde(default)]
    pub fieldsets: FieldsetTable,
    /// Field the sorted list orders by; ascending id when unset.
    #[serde(default)]
    pub sort_by: Option<String>,
    #[serde(default)]
    pub title_field: Option<String>,
    /// Request loading every model of this collection.
    #[serde(default)]
    pub full_list: Option<SimplifiedModelRequest>,
}

/// Compiled schema, ready to wire into an engine
pub struct CompiledSchema {
    pub table: RelationTable,
    pub models: Vec<Arc<dyn CollectionModel>>,
}

impl std::fmt::Debug for CompiledSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledSchema")
            .field("relations", &self.table.len())
            .field(
                "collections",
                &self.models.iter().map(|m| m.collection()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

pub fn parse_schema(path: &Path) -> Result<SchemaDefinition, SchemaError> {
    let content = std::fs::read_to_string(path)?;
    let schema = parse_schema_str(&content)?;
    info!(
        path = %path.display(),
        collections = schema.collections.len(),
        relations = schema.relations.len(),
        "Loaded schema"
    );
    Ok(schema)
}

pub fn parse_schema_str(content: &str) -> Result<SchemaDefinition, SchemaError> {
    Ok(toml::from_str(content)?)
}

impl SchemaDefinition {
    /// Check cross references, then compile relations and models.
    pub fn compile(&self) -> Result<CompiledSchema, SchemaError> {
        for declaration in &self.relations {
            for collection in std::iter::once(&declaration.collection).chain(&declaration.targets) {
                if !self.collections.contains_key(collection) {
                    return Err(SchemaError::Invalid(format!(
                        "relation {}.{} references undeclared collection {}",
                        declaration.collection, declaration.own.id_field, collection
                    )));
                }
            }
        }
        for (name, definition) in &self.collections {
            if let Some(request) = &definition.full_list {
                if !self.collections.contains_key(&request.collection) {
                    return Err(SchemaError::Invalid(format!(
                        "full list of {} requests undeclared collection {}",
                        name, request.collection
                    )));
                }
            }
        }

        let table = RelationTable::build(&self.relations)?;
        let models: Vec<Arc<dyn CollectionModel>> = self
            .collections
            .iter()
            .map(|(name, definition)| {
                Arc::new(DynamicModel::new(name, definition.clone())) as Arc<dyn CollectionModel>
            })
            .collect();
        debug!(
            collections = models.len(),
            relations = table.len(),
            "Compiled schema"
        );
        Ok(CompiledSchema { table, models })
    }
}

/// Collection model described entirely by a schema entry
#[derive(Debug, Clone)]
pub struct DynamicModel {
    collection: String,
    definition: CollectionDefinition,
}

impl DynamicModel {
    pub fn new(collection: &str, definition: CollectionDefinition) -> Self {
        Self {
            collection: collection.to_string(),
            definition,
        }
    }
}

impl CollectionModel for DynamicModel {
    fn collection(&self) -> &str {
        &self.collection
    }

    fn fieldsets(&self) -> FieldsetTable {
        self.definition.fieldsets.clone()
    }

    fn compare(&self, a: &ViewModel, b: &ViewModel) -> Ordering {
        match &self.definition.sort_by {
            Some(field) => compare_by_field(a, b, field),
            None => a.id().cmp(&b.id()),
        }
    }

    fn title(&self, model: &ViewModel) -> String {
        self.definition
            .title_field
            .as_deref()
            .and_then(|field| model.get_str(field))
            .map(str::to_string)
            .unwrap_or_else(|| default_title(model))
    }

    fn full_list_source(&self) -> Option<&dyn FullListSource> {
        self.definition.full_list.as_ref().map(|_| self as &dyn FullListSource)
    }
}

impl FullListSource for DynamicModel {
    fn full_list_request(&self) -> SimplifiedModelRequest {
        self.definition
            .full_list
            .clone()
            .unwrap_or_else(|| SimplifiedModelRequest::new(&self.collection, []))
    }
}
