//! Decoding of flat autoupdate deliveries into per-collection change sets.

use crate::error::KeyError;
use crate::key;
use crate::types::{Id, Record, ID_FIELD};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// One streamed delivery: fqfield to value
pub type Delivery = Map<String, Value>;

/// Changed records (partial, always carrying `id`) and deleted ids per collection
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedDelivery {
    pub changed: BTreeMap<String, BTreeMap<Id, Record>>,
    pub deleted: BTreeMap<String, BTreeSet<Id>>,
}

impl DecodedDelivery {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.deleted.is_empty()
    }

    /// Collections named anywhere in the delivery.
    pub fn collections(&self) -> BTreeSet<&str> {
        self.changed
            .keys()
            .chain(self.deleted.keys())
            .map(String::as_str)
            .collect()
    }

    pub fn changed_count(&self) -> usize {
        self.changed.values().map(BTreeMap::len).sum()
    }

    pub fn deleted_count(&self) -> usize {
        self.deleted.values().map(BTreeSet::len).sum()
    }
}

/// Group a flat delivery by collection and id. `<collection>/<id>/id: null`
/// marks a deletion; that id then never appears among the changed records.
/// Any malformed key fails the whole delivery.
pub fn decode_delivery(delivery: &Delivery) -> Result<DecodedDelivery, KeyError> {
    let mut grouped: BTreeMap<String, BTreeMap<Id, Record>> = BTreeMap::new();
    let mut deleted: BTreeMap<String, BTreeSet<Id>> = BTreeMap::new();

    for (fqfield, value) in delivery {
        let (collection, id, field) = key::split_fqfield(fqfield)?;
        if field == ID_FIELD && value.is_null() {
            deleted.entry(collection.to_string()).or_default().insert(id);
            continue;
        }
        grouped
            .entry(collection.to_string())
            .or_default()
            .entry(id)
            .or_default()
            .insert(field.to_string(), value.clone());
    }

    let mut changed: BTreeMap<String, BTreeMap<Id, Record>> = BTreeMap::new();
    for (collection, records) in grouped {
        let tombstones = deleted.get(&collection);
        let records: BTreeMap<Id, Record> = records
            .into_iter()
            .filter(|(id, _)| !tombstones.is_some_and(|ids| ids.contains(id)))
            .map(|(id, mut record)| {
                record.insert(ID_FIELD.to_string(), Value::from(id));
                (id, record)
            })
            .collect();
        if !records.is_empty() {
            changed.insert(collection, records);
        }
    }

    Ok(DecodedDelivery { changed, deleted })
}
