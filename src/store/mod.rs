//! Normalized Store
//!
//! Holds raw model records per collection, keyed by numeric id. It is the
//! single source of truth for the cache; every mutation is reported to the
//! [`SlotCoordinator`], which either folds it into the open update slot or
//! publishes it right away.

pub mod slot;

pub use slot::{ChangeSummary, SlotCoordinator, SlotObserver, UpdateSlot};

use crate::error::StoreError;
use crate::types::{record_id, Id, Record};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

type Collection = BTreeMap<Id, Arc<Record>>;

/// Per-collection map from id to raw record
pub struct NormalizedStore {
    collections: RwLock<HashMap<String, Collection>>,
    coordinator: Arc<SlotCoordinator>,
}

impl NormalizedStore {
    pub fn new(coordinator: Arc<SlotCoordinator>) -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            coordinator,
        }
    }

    pub fn coordinator(&self) -> &Arc<SlotCoordinator> {
        &self.coordinator
    }

    pub fn get(&self, collection: &str, id: Id) -> Option<Arc<Record>> {
        self.collections.read().get(collection)?.get(&id).cloned()
    }

    /// Records for the given ids, in the order asked; missing ids are skipped.
    pub fn get_many(&self, collection: &str, ids: &[Id]) -> Vec<Arc<Record>> {
        let collections = self.collections.read();
        let Some(records) = collections.get(collection) else {
            return Vec::new();
        };
        ids.iter().filter_map(|id| records.get(id).cloned()).collect()
    }

    /// All records of a collection, ascending by id.
    pub fn get_all(&self, collection: &str) -> Vec<Arc<Record>> {
        self.collections
            .read()
            .get(collection)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn ids(&self, collection: &str) -> BTreeSet<Id> {
        self.collections
            .read()
            .get(collection)
            .map(|records| records.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, collection: &str, id: Id) -> bool {
        self.collections
            .read()
            .get(collection)
            .is_some_and(|records| records.contains_key(&id))
    }

    pub fn filter<F>(&self, collection: &str, predicate: F) -> Vec<Arc<Record>>
    where
        F: Fn(&Record) -> bool,
    {
        self.collections
            .read()
            .get(collection)
            .map(|records| {
                records
                    .values()
                    .filter(|record| predicate(record))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn find<F>(&self, collection: &str, predicate: F) -> Option<Arc<Record>>
    where
        F: Fn(&Record) -> bool,
    {
        self.collections
            .read()
            .get(collection)?
            .values()
            .find(|record| predicate(record))
            .cloned()
    }

    /// Names of collections currently holding records.
    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .collections
            .read()
            .iter()
            .filter(|(_, records)| !records.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Insert or overwrite whole records.
    pub fn add(&self, collection: &str, records: Vec<Record>) -> Result<(), StoreError> {
        let keyed = keyed_records(collection, records)?;
        let ids: Vec<Id> = keyed.iter().map(|(id, _)| *id).collect();
        {
            let mut collections = self.collections.write();
            let target = collections.entry(collection.to_string()).or_default();
            for (id, record) in keyed {
                target.insert(id, Arc::new(record));
            }
        }
        let mut changes = ChangeSummary::default();
        changes.record_changed(collection, ids);
        self.coordinator.record(changes);
        Ok(())
    }

    /// Insert records, merging field by field into existing ones: incoming
    /// fields overwrite, fields absent from the incoming record are kept.
    pub fn add_or_update(&self, collection: &str, records: Vec<Record>) -> Result<(), StoreError> {
        let keyed = keyed_records(collection, records)?;
        let ids: Vec<Id> = keyed.iter().map(|(id, _)| *id).collect();
        {
            let mut collections = self.collections.write();
            let target = collections.entry(collection.to_string()).or_default();
            for (id, record) in keyed {
                let merged = match target.get(&id) {
                    Some(existing) => {
                        let mut merged = Record::clone(existing);
                        merged.extend(record);
                        merged
                    }
                    None => record,
                };
                target.insert(id, Arc::new(merged));
            }
        }
        let mut changes = ChangeSummary::default();
        changes.record_changed(collection, ids);
        self.coordinator.record(changes);
        Ok(())
    }

    /// Delete records; ids not present are ignored.
    pub fn remove(&self, collection: &str, ids: &[Id]) {
        let mut removed = Vec::new();
        {
            let mut collections = self.collections.write();
            if let Some(target) = collections.get_mut(collection) {
                for id in ids {
                    if target.remove(id).is_some() {
                        removed.push(*id);
                    }
                }
            }
        }
        let mut changes = ChangeSummary::default();
        changes.record_deleted(collection, removed);
        self.coordinator.record(changes);
    }

    /// Replace the whole store: every prior record is reported deleted, then
    /// the new models are inserted. Used for full resynchronization only.
    pub fn set(&self, models: HashMap<String, Vec<Record>>) -> Result<(), StoreError> {
        let mut replacement: HashMap<String, Collection> = HashMap::new();
        for (collection, records) in models {
            let keyed = keyed_records(&collection, records)?;
            replacement.insert(
                collection,
                keyed
                    .into_iter()
                    .map(|(id, record)| (id, Arc::new(record)))
                    .collect(),
            );
        }

        let mut changes = ChangeSummary::default();
        {
            let mut collections = self.collections.write();
            for (collection, records) in collections.drain() {
                changes.record_deleted(&collection, records.into_keys());
            }
            for (collection, records) in &replacement {
                changes.record_changed(collection, records.keys().copied());
            }
            *collections = replacement;
        }
        self.coordinator.record(changes);
        Ok(())
    }

    /// Drop everything; cached view-models are evicted through the usual
    /// notification path.
    pub fn clear(&self) {
        let mut changes = ChangeSummary::default();
        {
            let mut collections = self.collections.write();
            for (collection, records) in collections.drain() {
                changes.record_deleted(&collection, records.into_keys());
            }
        }
        self.coordinator.record(changes);
    }
}

/// Pair each record with its id, failing before any mutation happens.
fn keyed_records(collection: &str, records: Vec<Record>) -> Result<Vec<(Id, Record)>, StoreError> {
    records
        .into_iter()
        .map(|record| {
            record_id(&record)
                .map(|id| (id, record))
                .ok_or_else(|| StoreError::MissingId {
                    collection: collection.to_string(),
                })
        })
        .collect()
}
