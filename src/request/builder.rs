//! Builds wire request trees from simplified requests.

use super::fieldset::FieldsetRegistry;
use super::tree::{merge_field, merge_fields, FieldDescriptor, Fields, ModelRequest};
use super::{AdditionalField, FieldSelection, Follow, SimplifiedModelRequest};
use crate::error::RequestError;
use crate::key;
use crate::relation::{RelationDescriptor, RelationTable, RelationTarget};
use crate::types::ID_FIELD;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Full-list relations of a request: `(owner, id field)` to the foreign
/// collection whose membership the owning id list fully describes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FullListMap {
    by_owner: BTreeMap<(String, String), String>,
}

impl FullListMap {
    /// Register a full-list relation. A foreign collection can be the full
    /// list of only one owning `(collection, id field)` pair.
    pub fn insert(&mut self, owner: &str, id_field: &str, foreign: &str) -> Result<(), RequestError> {
        let key = (owner.to_string(), id_field.to_string());
        if let Some(((existing_owner, existing_field), _)) = self
            .by_owner
            .iter()
            .find(|(other, target)| target.as_str() == foreign && **other != key)
        {
            return Err(RequestError::ConflictingFullList {
                foreign: foreign.to_string(),
                existing: format!("{}/{}", existing_owner, existing_field),
                requested: format!("{}/{}", owner, id_field),
            });
        }
        self.by_owner.insert(key, foreign.to_string());
        Ok(())
    }

    pub fn merge(&mut self, other: &FullListMap) -> Result<(), RequestError> {
        for ((owner, id_field), foreign) in &other.by_owner {
            self.insert(owner, id_field, foreign)?;
        }
        Ok(())
    }

    /// Drop the entries registered by another map.
    pub fn forget(&mut self, other: &FullListMap) {
        for key in other.by_owner.keys() {
            self.by_owner.remove(key);
        }
    }

    /// `(owner, id field, foreign collection)` triples.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &str)> {
        self.by_owner
            .iter()
            .map(|((owner, id_field), foreign)| (owner.as_str(), id_field.as_str(), foreign.as_str()))
    }

    pub fn len(&self) -> usize {
        self.by_owner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_owner.is_empty()
    }
}

/// A built request plus its full-list bookkeeping
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltRequest {
    pub request: ModelRequest,
    pub full_lists: FullListMap,
}

pub struct RequestBuilder {
    table: Arc<RelationTable>,
    fieldsets: Arc<FieldsetRegistry>,
}

impl RequestBuilder {
    pub fn new(table: Arc<RelationTable>, fieldsets: Arc<FieldsetRegistry>) -> Self {
        Self { table, fieldsets }
    }

    pub fn build(&self, request: &SimplifiedModelRequest) -> Result<BuiltRequest, RequestError> {
        let mut full_lists = FullListMap::default();
        let fields = self.build_fields(
            &request.collection,
            request.fieldset.as_ref(),
            &request.additional_fields,
            &request.follow,
            &mut full_lists,
        )?;
        debug!(
            collection = %request.collection,
            ids = request.ids.len(),
            fields = fields.len(),
            full_lists = full_lists.len(),
            "Built model request"
        );
        Ok(BuiltRequest {
            request: ModelRequest {
                collection: request.collection.clone(),
                ids: request.ids.clone(),
                fields,
            },
            full_lists,
        })
    }

    fn build_fields(
        &self,
        collection: &str,
        selection: Option<&FieldSelection>,
        additional: &[AdditionalField],
        follow: &[Follow],
        full_lists: &mut FullListMap,
    ) -> Result<Fields, RequestError> {
        let table = self
            .fieldsets
            .get(collection)
            .ok_or_else(|| RequestError::UnknownCollection(collection.to_string()))?;
        let selected: &[String] = match selection {
            None => table.resolve(None).unwrap_or(&[]),
            Some(FieldSelection::Named(name)) => {
                table
                    .resolve(Some(name))
                    .ok_or_else(|| RequestError::UnknownFieldset {
                        collection: collection.to_string(),
                        fieldset: name.clone(),
                    })?
            }
            Some(FieldSelection::Fields(fields)) => fields.as_slice(),
        };

        let mut fields = Fields::new();
        fields.insert(ID_FIELD.to_string(), None);
        for field in selected {
            insert_plain(&mut fields, field);
        }
        for field in additional {
            match field {
                AdditionalField::Field(name) => insert_plain(&mut fields, name),
                AdditionalField::Template { template_field } => merge_field(
                    &mut fields,
                    template_field.to_lowercase(),
                    Some(FieldDescriptor::Template { values: None }),
                ),
            }
        }
        for entry in follow {
            self.follow(collection, entry, &mut fields, full_lists)?;
        }
        Ok(fields)
    }

    fn follow(
        &self,
        collection: &str,
        entry: &Follow,
        fields: &mut Fields,
        full_lists: &mut FullListMap,
    ) -> Result<(), RequestError> {
        let name = entry.id_field.name();
        let found = self.table.find(collection, name).ok_or_else(|| {
            let effective_field = match entry.id_field.parameter() {
                Some(parameter) => key::fill_placeholder(name, parameter),
                None => name.to_string(),
            };
            RequestError::UnknownRelation {
                collection: collection.to_string(),
                field: name.to_string(),
                effective_field: effective_field.to_lowercase(),
            }
        })?;
        let descriptor = &found.descriptor;
        let parameter = found.parameter.as_deref().or(entry.id_field.parameter());

        let nested = match &descriptor.target {
            RelationTarget::Collection(target) => {
                let nested = self.build_fields(
                    target,
                    entry.fieldset.as_ref(),
                    &entry.additional_fields,
                    &entry.follow,
                    full_lists,
                )?;
                if descriptor.is_many() {
                    FieldDescriptor::RelationList {
                        collection: target.clone(),
                        fields: nested,
                    }
                } else {
                    FieldDescriptor::Relation {
                        collection: target.clone(),
                        fields: nested,
                    }
                }
            }
            RelationTarget::Generic(candidates) => {
                let nested = self.build_generic(descriptor, candidates, entry, full_lists)?;
                if descriptor.is_many() {
                    FieldDescriptor::GenericRelationList { fields: nested }
                } else {
                    FieldDescriptor::GenericRelation { fields: nested }
                }
            }
        };

        let id_field = descriptor.effective_id_field(parameter);
        if entry.is_full_list {
            self.register_full_list(descriptor, &id_field, full_lists)?;
        }

        let wire = match (descriptor.is_structured(), parameter) {
            (true, None) => FieldDescriptor::Template {
                values: Some(Box::new(nested)),
            },
            _ => nested,
        };
        merge_field(fields, id_field.to_lowercase(), Some(wire));
        Ok(())
    }

    /// Expand a generic relation against every candidate collection. A
    /// candidate the nested follow path does not apply to is skipped; the
    /// build fails only when no candidate accepts it.
    fn build_generic(
        &self,
        descriptor: &RelationDescriptor,
        candidates: &[String],
        entry: &Follow,
        full_lists: &mut FullListMap,
    ) -> Result<Fields, RequestError> {
        let mut merged = Fields::new();
        let mut accepted = false;
        let mut last_error = None;

        for candidate in candidates {
            let mut candidate_lists = full_lists.clone();
            match self.build_fields(
                candidate,
                entry.fieldset.as_ref(),
                &entry.additional_fields,
                &entry.follow,
                &mut candidate_lists,
            ) {
                Ok(fields) => {
                    merge_fields(&mut merged, fields);
                    *full_lists = candidate_lists;
                    accepted = true;
                }
                Err(err @ RequestError::UnknownRelation { .. }) => {
                    warn!(
                        relation = %format!("{}.{}", descriptor.owner, descriptor.field),
                        candidate = %candidate,
                        error = %err,
                        "Follow path does not apply to generic candidate, skipping"
                    );
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        match (accepted, last_error) {
            (false, Some(err)) => Err(err),
            _ => Ok(merged),
        }
    }

    fn register_full_list(
        &self,
        descriptor: &RelationDescriptor,
        id_field: &str,
        full_lists: &mut FullListMap,
    ) -> Result<(), RequestError> {
        match (&descriptor.target, descriptor.is_many()) {
            (RelationTarget::Collection(foreign), true) => {
                full_lists.insert(&descriptor.owner, id_field, foreign)
            }
            _ => {
                warn!(
                    relation = %format!("{}.{}", descriptor.owner, descriptor.field),
                    "Full-list flag only applies to many-relations with a fixed target, ignoring"
                );
                Ok(())
            }
        }
    }
}

/// Insert a plain field. A bare structured template (`amendment_$_ids`)
/// requests every parameter and becomes a template descriptor.
fn insert_plain(fields: &mut Fields, name: &str) {
    let name = name.to_lowercase();
    let descriptor = key::is_template_field(&name).then_some(FieldDescriptor::Template { values: None });
    merge_field(fields, name, descriptor);
}
