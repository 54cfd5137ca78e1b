//! Wire request tree sent to the autoupdate endpoint.

use crate::types::Id;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Field name to descriptor; `None` is a plain scalar field.
pub type Fields = BTreeMap<String, Option<FieldDescriptor>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum FieldDescriptor {
    Relation {
        collection: String,
        fields: Fields,
    },
    RelationList {
        collection: String,
        fields: Fields,
    },
    GenericRelation {
        fields: Fields,
    },
    GenericRelationList {
        fields: Fields,
    },
    /// Structured field, expanded server-side to every concrete parameter.
    Template {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        values: Option<Box<FieldDescriptor>>,
    },
}

impl FieldDescriptor {
    fn nested_mut(&mut self) -> Option<&mut Fields> {
        match self {
            FieldDescriptor::Relation { fields, .. }
            | FieldDescriptor::RelationList { fields, .. }
            | FieldDescriptor::GenericRelation { fields }
            | FieldDescriptor::GenericRelationList { fields } => Some(fields),
            FieldDescriptor::Template { values } => values.as_deref_mut().and_then(Self::nested_mut),
        }
    }

    fn into_nested(self) -> Option<Fields> {
        match self {
            FieldDescriptor::Relation { fields, .. }
            | FieldDescriptor::RelationList { fields, .. }
            | FieldDescriptor::GenericRelation { fields }
            | FieldDescriptor::GenericRelationList { fields } => Some(fields),
            FieldDescriptor::Template { values } => values.and_then(|v| v.into_nested()),
        }
    }
}

/// Subscription request body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRequest {
    pub collection: String,
    pub ids: Vec<Id>,
    pub fields: Fields,
}

/// Merge `from` into `into`. Descriptors win over plain fields; two
/// descriptors for the same field have their nested trees merged.
pub fn merge_fields(into: &mut Fields, from: Fields) {
    for (name, incoming) in from {
        merge_field(into, name, incoming);
    }
}

pub(crate) fn merge_field(into: &mut Fields, name: String, incoming: Option<FieldDescriptor>) {
    let Some(incoming) = incoming else {
        into.entry(name).or_insert(None);
        return;
    };
    match into.get_mut(&name) {
        Some(Some(existing)) => {
            if std::mem::discriminant(existing) != std::mem::discriminant(&incoming) {
                *existing = incoming;
                return;
            }
            // Bare template vs. template wrapping a relation
            if let FieldDescriptor::Template { values: None } = existing {
                if matches!(incoming, FieldDescriptor::Template { values: Some(_) }) {
                    *existing = incoming;
                }
                return;
            }
            if let (Some(nested), Some(incoming_nested)) =
                (existing.nested_mut(), incoming.into_nested())
            {
                merge_fields(nested, incoming_nested);
            }
        }
        _ => {
            into.insert(name, Some(incoming));
        }
    }
}
