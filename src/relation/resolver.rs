//! Relation Resolver
//!
//! Resolves a record's relation fields against the live normalized store.
//! Nothing is cached here: every read goes to the store, so relation reads
//! reflect the latest committed (or in-flight) state.

use super::{DefaultParameter, RelationDescriptor, RelationTable, RelationTarget};
use crate::error::RelationError;
use crate::key;
use crate::repository::ViewModel;
use crate::store::NormalizedStore;
use crate::types::{id_list, record_id, Record};
use parking_lot::RwLock;
use serde_json::Value;
use std::cmp::Ordering;
use std::sync::Arc;

/// Supplies the default parameter for structured relations declared with
/// [`DefaultParameter::ActiveContext`].
pub trait ActiveContext: Send + Sync {
    fn active_parameter(&self) -> Option<String>;
}

/// Settable active context (e.g. the active meeting id)
#[derive(Debug, Default)]
pub struct SharedActiveContext {
    parameter: RwLock<Option<String>>,
}

impl SharedActiveContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, parameter: impl ToString) {
        *self.parameter.write() = Some(parameter.to_string());
    }

    pub fn clear(&self) {
        *self.parameter.write() = None;
    }
}

impl ActiveContext for SharedActiveContext {
    fn active_parameter(&self) -> Option<String> {
        self.parameter.read().clone()
    }
}

/// A resolved relation
#[derive(Debug, Clone)]
pub enum Related {
    One(Option<ViewModel>),
    Many(Vec<ViewModel>),
}

impl Related {
    pub fn into_one(self) -> Option<ViewModel> {
        match self {
            Related::One(model) => model,
            Related::Many(models) => models.into_iter().next(),
        }
    }

    pub fn into_many(self) -> Vec<ViewModel> {
        match self {
            Related::One(model) => model.into_iter().collect(),
            Related::Many(models) => models,
        }
    }
}

pub struct RelationResolver {
    store: Arc<NormalizedStore>,
    table: Arc<RelationTable>,
    context: Arc<dyn ActiveContext>,
}

impl RelationResolver {
    pub fn new(
        store: Arc<NormalizedStore>,
        table: Arc<RelationTable>,
        context: Arc<dyn ActiveContext>,
    ) -> Self {
        Self {
            store,
            table,
            context,
        }
    }

    pub fn store(&self) -> &Arc<NormalizedStore> {
        &self.store
    }

    pub fn table(&self) -> &Arc<RelationTable> {
        &self.table
    }

    /// Wrap a stored record of `collection` into a view-model.
    pub fn view_model(self: &Arc<Self>, collection: &str, record: Arc<Record>) -> Option<ViewModel> {
        let id = record_id(&record)?;
        Some(ViewModel::new(collection, id, record, Arc::clone(self)))
    }

    /// Resolve the relation `name` of a record owned by `owner`. The name may
    /// be the owning field, the id field or an effective structured field; a
    /// parameter carried by the name wins over `parameter`.
    pub fn resolve(
        self: &Arc<Self>,
        owner: &str,
        record: &Record,
        name: &str,
        parameter: Option<&str>,
    ) -> Result<Related, RelationError> {
        let found = self
            .table
            .find(owner, name)
            .ok_or_else(|| RelationError::UnknownRelation {
                collection: owner.to_string(),
                field: name.to_string(),
            })?;
        let parameter = found.parameter.as_deref().or(parameter);
        self.resolve_descriptor(&found.descriptor, record, parameter)
    }

    pub fn resolve_descriptor(
        self: &Arc<Self>,
        descriptor: &RelationDescriptor,
        record: &Record,
        parameter: Option<&str>,
    ) -> Result<Related, RelationError> {
        let id_field = self.effective_id_field(descriptor, parameter)?;
        let value = record.get(&id_field).unwrap_or(&Value::Null);

        match &descriptor.target {
            RelationTarget::Collection(target) => {
                if descriptor.is_many() {
                    let ids = id_list(value);
                    let records = self.store.get_many(target, &ids);
                    let mut models = self.wrap_all(target, records);
                    sort_related(&mut models, descriptor.order_by.as_deref());
                    Ok(Related::Many(models))
                } else {
                    let model = value
                        .as_u64()
                        .and_then(|id| self.store.get(target, id))
                        .and_then(|record| self.view_model(target, record));
                    Ok(Related::One(model))
                }
            }
            RelationTarget::Generic(_) => {
                if descriptor.is_many() {
                    let mut models = Vec::new();
                    for fqid in value.as_array().into_iter().flatten() {
                        if let Some(model) = self.read_fqid(fqid)? {
                            models.push(model);
                        }
                    }
                    sort_related(&mut models, descriptor.order_by.as_deref());
                    Ok(Related::Many(models))
                } else {
                    Ok(Related::One(self.read_fqid(value)?))
                }
            }
        }
    }

    fn effective_id_field(
        &self,
        descriptor: &RelationDescriptor,
        parameter: Option<&str>,
    ) -> Result<String, RelationError> {
        if !descriptor.is_structured() {
            return Ok(descriptor.effective_id_field(None));
        }
        let parameter = match parameter {
            Some(parameter) => Some(parameter.to_string()),
            None => match descriptor.default_parameter {
                DefaultParameter::ActiveContext => self.context.active_parameter(),
                DefaultParameter::None => None,
            },
        };
        parameter
            .map(|parameter| descriptor.effective_id_field(Some(&parameter)))
            .ok_or_else(|| RelationError::MissingStructuredParameter {
                collection: descriptor.owner.clone(),
                field: descriptor.field.clone(),
            })
    }

    fn read_fqid(self: &Arc<Self>, value: &Value) -> Result<Option<ViewModel>, RelationError> {
        let Some(fqid) = value.as_str() else {
            return Ok(None);
        };
        let (collection, id) = key::split_fqid(fqid)?;
        Ok(self
            .store
            .get(collection, id)
            .and_then(|record| self.view_model(collection, record)))
    }

    fn wrap_all(self: &Arc<Self>, collection: &str, records: Vec<Arc<Record>>) -> Vec<ViewModel> {
        records
            .into_iter()
            .filter_map(|record| self.view_model(collection, record))
            .collect()
    }
}

/// Order by `order_by` when given, ties and the default broken by id.
fn sort_related(models: &mut [ViewModel], order_by: Option<&str>) {
    models.sort_by(|a, b| {
        let by_key = match order_by {
            Some(field) => compare_values(a.get(field), b.get(field)),
            None => Ordering::Equal,
        };
        by_key.then_with(|| a.id().cmp(&b.id()))
    });
}

/// Total order over JSON values used for relation and list sorting:
/// numbers, then strings, then booleans; missing and null sort last.
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(value: Option<&Value>) -> u8 {
        match value {
            Some(Value::Number(_)) => 0,
            Some(Value::String(_)) => 1,
            Some(Value::Bool(_)) => 2,
            Some(Value::Array(_)) | Some(Value::Object(_)) => 3,
            Some(Value::Null) | None => 4,
        }
    }

    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}
