//! Request Builder
//!
//! Callers describe *what* they need as a [`SimplifiedModelRequest`]: a
//! collection, ids, a fieldset and a recursive list of relations to follow.
//! The [`RequestBuilder`] turns that into the wire-level [`ModelRequest`]
//! field tree and records full-list bookkeeping for implicit deletions.

pub mod builder;
pub mod fieldset;
pub mod tree;

pub use builder::{BuiltRequest, FullListMap, RequestBuilder};
pub use fieldset::{FieldsetRegistry, FieldsetTable, DEFAULT_FIELDSET};
pub use tree::{merge_fields, FieldDescriptor, Fields, ModelRequest};

use crate::types::Id;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Declarative request for a set of models and their relations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimplifiedModelRequest {
    pub collection: String,
    #[serde(default)]
    pub ids: Vec<Id>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fieldset: Option<FieldSelection>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_fields: Vec<AdditionalField>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub follow: Vec<Follow>,
}

impl SimplifiedModelRequest {
    pub fn new(collection: &str, ids: impl IntoIterator<Item = Id>) -> Self {
        Self {
            collection: collection.to_string(),
            ids: ids.into_iter().collect(),
            fieldset: None,
            additional_fields: Vec::new(),
            follow: Vec::new(),
        }
    }

    pub fn fieldset(mut self, name: &str) -> Self {
        self.fieldset = Some(FieldSelection::Named(name.to_string()));
        self
    }

    pub fn fields(mut self, fields: &[&str]) -> Self {
        self.fieldset = Some(FieldSelection::Fields(
            fields.iter().map(|f| f.to_string()).collect(),
        ));
        self
    }

    pub fn additional_field(mut self, field: &str) -> Self {
        self.additional_fields.push(AdditionalField::Field(field.to_string()));
        self
    }

    pub fn follow(mut self, follow: Follow) -> Self {
        self.follow.push(follow);
        self
    }
}

/// A named fieldset or a literal list of fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldSelection {
    Named(String),
    Fields(Vec<String>),
}

/// An extra single field; a template field requests every parameter of a
/// structured field without following it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AdditionalField {
    Template {
        #[serde(rename = "templateField")]
        template_field: String,
    },
    Field(String),
}

/// Owning field of a follow entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FollowField {
    /// Structured field with an explicit parameter.
    Structured {
        #[serde(rename = "templateIdField")]
        template_id_field: String,
        #[serde(rename = "templateValue", deserialize_with = "string_or_number")]
        template_value: String,
    },
    Field(String),
}

impl FollowField {
    pub fn name(&self) -> &str {
        match self {
            FollowField::Field(name) => name,
            FollowField::Structured {
                template_id_field, ..
            } => template_id_field,
        }
    }

    pub fn parameter(&self) -> Option<&str> {
        match self {
            FollowField::Field(_) => None,
            FollowField::Structured { template_value, .. } => Some(template_value),
        }
    }
}

/// Relation to follow from the enclosing collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Follow {
    pub id_field: FollowField,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fieldset: Option<FieldSelection>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_fields: Vec<AdditionalField>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub follow: Vec<Follow>,
    /// The requester holds the complete membership of the target collection.
    #[serde(default)]
    pub is_full_list: bool,
}

impl Follow {
    pub fn new(id_field: &str) -> Self {
        Self {
            id_field: FollowField::Field(id_field.to_string()),
            fieldset: None,
            additional_fields: Vec::new(),
            follow: Vec::new(),
            is_full_list: false,
        }
    }

    pub fn structured(template: &str, value: impl ToString) -> Self {
        Self {
            id_field: FollowField::Structured {
                template_id_field: template.to_string(),
                template_value: value.to_string(),
            },
            ..Self::new(template)
        }
    }

    pub fn fieldset(mut self, name: &str) -> Self {
        self.fieldset = Some(FieldSelection::Named(name.to_string()));
        self
    }

    pub fn fields(mut self, fields: &[&str]) -> Self {
        self.fieldset = Some(FieldSelection::Fields(
            fields.iter().map(|f| f.to_string()).collect(),
        ));
        self
    }

    pub fn additional_field(mut self, field: &str) -> Self {
        self.additional_fields.push(AdditionalField::Field(field.to_string()));
        self
    }

    pub fn follow(mut self, follow: Follow) -> Self {
        self.follow.push(follow);
        self
    }

    pub fn full_list(mut self) -> Self {
        self.is_full_list = true;
        self
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected a string or number, found {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_wire_shape() {
        let request: SimplifiedModelRequest = serde_json::from_value(json!({
            "collection": "motion",
            "ids": [1],
            "fieldset": "list",
            "additionalFields": ["state_id", {"templateField": "amendment_$_ids"}],
            "follow": [
                {"idField": "submitter_ids", "fieldset": ["title"], "isFullList": true},
                {"idField": {"templateIdField": "group_$_ids", "templateValue": 3}}
            ]
        }))
        .unwrap();

        assert_eq!(request.fieldset, Some(FieldSelection::Named("list".to_string())));
        assert_eq!(
            request.additional_fields[1],
            AdditionalField::Template {
                template_field: "amendment_$_ids".to_string()
            }
        );
        assert!(request.follow[0].is_full_list);
        assert_eq!(
            request.follow[0].fieldset,
            Some(FieldSelection::Fields(vec!["title".to_string()]))
        );
        assert_eq!(request.follow[1].id_field.name(), "group_$_ids");
        assert_eq!(request.follow[1].id_field.parameter(), Some("3"));
    }

    #[test]
    fn test_builder_methods() {
        let request = SimplifiedModelRequest::new("motion", [1, 2])
            .fieldset("list")
            .follow(Follow::structured("group_$_ids", 4).fields(&["name"]));
        assert_eq!(request.ids, vec![1, 2]);
        assert_eq!(request.follow[0].id_field.parameter(), Some("4"));
        assert!(!request.follow[0].is_full_list);
    }
}
