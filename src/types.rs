//! Core types shared by the cache engine.

use serde_json::{Map, Value};

/// Numeric id of a model inside its collection.
pub type Id = u64;

/// Raw model record: field name to wire value. Always carries its `id`.
pub type Record = Map<String, Value>;

/// Name of the field every record carries.
pub const ID_FIELD: &str = "id";

/// Read the numeric id a record carries, if any.
pub fn record_id(record: &Record) -> Option<Id> {
    record.get(ID_FIELD).and_then(Value::as_u64)
}

/// Read a list of numeric ids from a field; non-numeric entries are skipped.
pub fn id_list(value: &Value) -> Vec<Id> {
    match value {
        Value::Array(items) => items.iter().filter_map(Value::as_u64).collect(),
        Value::Number(n) => n.as_u64().into_iter().collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_id_reads_numeric_id() {
        let record = json!({"id": 4, "title": "x"});
        assert_eq!(record_id(record.as_object().unwrap()), Some(4));

        let tombstone = json!({"id": null});
        assert_eq!(record_id(tombstone.as_object().unwrap()), None);
    }

    #[test]
    fn id_list_skips_foreign_entries() {
        assert_eq!(id_list(&json!([1, "2", 3])), vec![1, 3]);
        assert_eq!(id_list(&json!(7)), vec![7]);
        assert!(id_list(&json!(null)).is_empty());
    }
}
