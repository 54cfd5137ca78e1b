//! View-Model
//!
//! Read-only wrapper around a stored record. Plain fields are read from the
//! record snapshot; relations re-read the owning record and resolve against
//! the live store on every call, so they stay current even when the wrapper
//! itself is stale.

use crate::error::RelationError;
use crate::key;
use crate::relation::{Related, RelationResolver};
use crate::types::{Id, Record};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

#[derive(Clone)]
pub struct ViewModel {
    collection: Arc<str>,
    id: Id,
    record: Arc<Record>,
    resolver: Arc<RelationResolver>,
}

impl ViewModel {
    pub fn new(collection: &str, id: Id, record: Arc<Record>, resolver: Arc<RelationResolver>) -> Self {
        Self {
            collection: Arc::from(collection),
            id,
            record,
            resolver,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn id(&self) -> Id {
        self.id
    }

    pub fn fqid(&self) -> String {
        key::fqid(&self.collection, self.id)
    }

    /// The record snapshot this view-model was built from.
    pub fn record(&self) -> &Arc<Record> {
        &self.record
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.record.get(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }

    pub fn get_u64(&self, field: &str) -> Option<u64> {
        self.get(field).and_then(Value::as_u64)
    }

    /// Resolve a relation by owning field, id field or effective structured
    /// field name.
    pub fn relation(&self, name: &str) -> Result<Related, RelationError> {
        let owner = self.live_record();
        self.resolver.resolve(&self.collection, &owner, name, None)
    }

    /// Resolve a structured relation for one parameter (e.g. a meeting id).
    pub fn structured_relation(&self, name: &str, parameter: &str) -> Result<Related, RelationError> {
        let owner = self.live_record();
        self.resolver
            .resolve(&self.collection, &owner, name, Some(parameter))
    }

    /// Current stored record of this model, or the snapshot once it is gone.
    fn live_record(&self) -> Arc<Record> {
        self.resolver
            .store()
            .get(&self.collection, self.id)
            .unwrap_or_else(|| Arc::clone(&self.record))
    }

    pub fn related_one(&self, name: &str) -> Result<Option<ViewModel>, RelationError> {
        self.relation(name).map(Related::into_one)
    }

    pub fn related_many(&self, name: &str) -> Result<Vec<ViewModel>, RelationError> {
        self.relation(name).map(Related::into_many)
    }

    pub fn to_json(&self) -> Value {
        Value::Object(Record::clone(&self.record))
    }
}

impl PartialEq for ViewModel {
    /// Same collection, id and record snapshot.
    fn eq(&self, other: &Self) -> bool {
        self.collection == other.collection
            && self.id == other.id
            && Arc::ptr_eq(&self.record, &other.record)
    }
}

impl fmt::Debug for ViewModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewModel")
            .field("fqid", &self.fqid())
            .field("record", &self.record)
            .finish()
    }
}
