//! Relations
//!
//! Declarative relation pairs between collections, compiled once into a
//! per-collection index ([`RelationTable`]) and resolved against the live
//! store by the [`RelationResolver`].

pub mod resolver;
pub mod table;

pub use resolver::{compare_values, ActiveContext, Related, RelationResolver, SharedActiveContext};
pub use table::{RelationMatch, RelationTable};

use crate::error::{DeclarationError, KeyError};
use crate::key;
use serde::{Deserialize, Serialize};

/// Cardinality of one side of a relation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    One,
    Many,
}

/// Where the related models live
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationTarget {
    /// Fixed target collection; the id field stores plain ids.
    Collection(String),
    /// Polymorphic target; the id field stores fqids, one of these collections each.
    Generic(Vec<String>),
}

/// Name of the owning id field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdField {
    Plain(String),
    /// Templated id field (`group_$_ids`), split once around its placeholder.
    Structured {
        template: String,
        prefix: String,
        suffix: String,
    },
}

impl IdField {
    /// Parse an id field name, splitting structured names around the placeholder.
    pub fn parse(name: &str) -> Result<Self, KeyError> {
        if key::is_structured_field(name) {
            let (prefix, suffix) = key::split_template(name)?;
            Ok(IdField::Structured {
                template: name.to_string(),
                prefix: prefix.to_string(),
                suffix: suffix.to_string(),
            })
        } else {
            Ok(IdField::Plain(name.to_string()))
        }
    }

    /// The declared name: the plain field or the template.
    pub fn name(&self) -> &str {
        match self {
            IdField::Plain(name) => name,
            IdField::Structured { template, .. } => template,
        }
    }
}

/// Default parameter policy for structured relations read without a parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultParameter {
    #[default]
    None,
    /// Use the parameter of the active context (e.g. the active meeting id).
    ActiveContext,
}

/// One directed edge, owned by `owner` and stored in its `id_field`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationDescriptor {
    pub owner: String,
    pub field: String,
    pub id_field: IdField,
    pub cardinality: Cardinality,
    pub target: RelationTarget,
    pub order_by: Option<String>,
    pub default_parameter: DefaultParameter,
}

impl RelationDescriptor {
    pub fn is_many(&self) -> bool {
        self.cardinality == Cardinality::Many
    }

    pub fn is_generic(&self) -> bool {
        matches!(self.target, RelationTarget::Generic(_))
    }

    pub fn is_structured(&self) -> bool {
        matches!(self.id_field, IdField::Structured { .. })
    }

    /// Id field to read for a given structured parameter.
    pub fn effective_id_field(&self, parameter: Option<&str>) -> String {
        match (&self.id_field, parameter) {
            (IdField::Structured { template, .. }, Some(value)) => {
                key::fill_placeholder(template, value)
            }
            (id_field, _) => id_field.name().to_string(),
        }
    }
}

/// One end of a declared relation pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationEnd {
    pub id_field: String,
    /// Owning field name; derived from `id_field` when omitted.
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub many: bool,
    #[serde(default)]
    pub order_by: Option<String>,
    #[serde(default)]
    pub default_parameter: DefaultParameter,
}

impl RelationEnd {
    pub fn one(id_field: &str) -> Self {
        Self {
            id_field: id_field.to_string(),
            field: None,
            many: false,
            order_by: None,
            default_parameter: DefaultParameter::None,
        }
    }

    pub fn many(id_field: &str) -> Self {
        Self {
            many: true,
            ..Self::one(id_field)
        }
    }

    pub fn named(mut self, field: &str) -> Self {
        self.field = Some(field.to_string());
        self
    }

    pub fn ordered_by(mut self, field: &str) -> Self {
        self.order_by = Some(field.to_string());
        self
    }

    pub fn with_default_parameter(mut self, policy: DefaultParameter) -> Self {
        self.default_parameter = policy;
        self
    }

    fn cardinality(&self) -> Cardinality {
        if self.many {
            Cardinality::Many
        } else {
            Cardinality::One
        }
    }

    /// Resolve the owning field name, enforcing the id field naming convention
    /// unless the name was given explicitly.
    fn field_name(&self) -> Result<String, String> {
        if let Some(field) = &self.field {
            return Ok(field.to_lowercase());
        }
        derive_field_name(&self.id_field, self.many).ok_or_else(|| {
            format!(
                "id field '{}' does not follow the '<field>{}' convention; name the field explicitly",
                self.id_field,
                if self.many { "_ids" } else { "_id" }
            )
        })
    }
}

/// Derive the owning field name from an id field name:
/// `<base>_id` becomes `<base>`, `<base>_ids` becomes `<base>s`.
/// A placeholder is dropped first, so `group_$_ids` becomes `groups`.
pub fn derive_field_name(id_field: &str, many: bool) -> Option<String> {
    let id_field = id_field
        .to_lowercase()
        .replace("_$", "")
        .replace(key::PLACEHOLDER, "");
    if many {
        id_field
            .strip_suffix("_ids")
            .filter(|base| !base.is_empty())
            .map(|base| format!("{}s", base))
    } else {
        id_field
            .strip_suffix("_id")
            .filter(|base| !base.is_empty())
            .map(str::to_string)
    }
}

/// A relation pair: the forward end on `collection`, the inverse end on
/// every collection in `targets`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationDeclaration {
    pub collection: String,
    pub own: RelationEnd,
    pub targets: Vec<String>,
    /// Forward end stores fqids; implied when more than one target is listed.
    #[serde(default)]
    pub generic: bool,
    pub inverse: RelationEnd,
}

impl RelationDeclaration {
    pub fn new(collection: &str, own: RelationEnd, target: &str, inverse: RelationEnd) -> Self {
        Self {
            collection: collection.to_string(),
            own,
            targets: vec![target.to_string()],
            generic: false,
            inverse,
        }
    }

    pub fn generic(collection: &str, own: RelationEnd, targets: &[&str], inverse: RelationEnd) -> Self {
        Self {
            collection: collection.to_string(),
            own,
            targets: targets.iter().map(|t| t.to_string()).collect(),
            generic: true,
            inverse,
        }
    }

    fn is_generic(&self) -> bool {
        self.generic || self.targets.len() > 1
    }

    /// Expand the pair into its forward and inverse descriptors.
    pub(crate) fn descriptors(&self) -> Result<Vec<RelationDescriptor>, DeclarationError> {
        if self.targets.is_empty() {
            return Err(DeclarationError::Invalid(format!(
                "relation {}.{} declares no target collection",
                self.collection, self.own.id_field
            )));
        }

        let forward_target = if self.is_generic() {
            RelationTarget::Generic(self.targets.clone())
        } else {
            RelationTarget::Collection(self.targets[0].clone())
        };

        let mut descriptors = vec![describe(&self.collection, &self.own, forward_target)?];
        for target in &self.targets {
            descriptors.push(describe(
                target,
                &self.inverse,
                RelationTarget::Collection(self.collection.clone()),
            )?);
        }
        Ok(descriptors)
    }
}

fn describe(
    owner: &str,
    end: &RelationEnd,
    target: RelationTarget,
) -> Result<RelationDescriptor, DeclarationError> {
    let field = end
        .field_name()
        .map_err(|msg| DeclarationError::Invalid(format!("{}: {}", owner, msg)))?;
    Ok(RelationDescriptor {
        owner: owner.to_string(),
        field,
        id_field: IdField::parse(&end.id_field.to_lowercase())?,
        cardinality: end.cardinality(),
        target,
        order_by: end.order_by.clone(),
        default_parameter: end.default_parameter,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_field_name() {
        assert_eq!(derive_field_name("submitter_ids", true).as_deref(), Some("submitters"));
        assert_eq!(derive_field_name("motion_id", false).as_deref(), Some("motion"));
        assert_eq!(derive_field_name("group_$_ids", true).as_deref(), Some("groups"));
        assert_eq!(derive_field_name("_id", false), None);
        assert_eq!(derive_field_name("owner", false), None);
    }

    #[test]
    fn test_pair_expands_to_both_directions() {
        let declaration = RelationDeclaration::new(
            "motion",
            RelationEnd::many("submitter_ids").ordered_by("weight"),
            "motion_submitter",
            RelationEnd::one("motion_id"),
        );
        let descriptors = declaration.descriptors().unwrap();
        assert_eq!(descriptors.len(), 2);

        assert_eq!(descriptors[0].owner, "motion");
        assert_eq!(descriptors[0].field, "submitters");
        assert!(descriptors[0].is_many());
        assert_eq!(
            descriptors[0].target,
            RelationTarget::Collection("motion_submitter".to_string())
        );
        assert_eq!(descriptors[0].order_by.as_deref(), Some("weight"));

        assert_eq!(descriptors[1].owner, "motion_submitter");
        assert_eq!(descriptors[1].field, "motion");
        assert!(!descriptors[1].is_many());
    }

    #[test]
    fn test_generic_pair_adds_inverse_per_target() {
        let declaration = RelationDeclaration::generic(
            "agenda_item",
            RelationEnd::one("content_object_id"),
            &["motion", "topic"],
            RelationEnd::one("agenda_item_id"),
        );
        let descriptors = declaration.descriptors().unwrap();
        assert_eq!(descriptors.len(), 3);
        assert!(descriptors[0].is_generic());
        assert_eq!(descriptors[1].owner, "motion");
        assert_eq!(descriptors[2].owner, "topic");
    }

    #[test]
    fn test_structured_id_field_split_once() {
        let declaration = RelationDeclaration::new(
            "user",
            RelationEnd::many("group_$_ids").named("groups"),
            "group",
            RelationEnd::many("user_ids"),
        );
        let descriptors = declaration.descriptors().unwrap();
        assert_eq!(
            descriptors[0].id_field,
            IdField::Structured {
                template: "group_$_ids".to_string(),
                prefix: "group_".to_string(),
                suffix: "_ids".to_string(),
            }
        );
        assert_eq!(descriptors[0].effective_id_field(Some("3")), "group_$3_ids");
        assert_eq!(descriptors[0].effective_id_field(None), "group_$_ids");
    }

    #[test]
    fn test_malformed_structured_field_fails() {
        let declaration = RelationDeclaration::new(
            "user",
            RelationEnd::many("group_$_$_ids").named("groups"),
            "group",
            RelationEnd::many("user_ids"),
        );
        assert!(matches!(
            declaration.descriptors(),
            Err(DeclarationError::Key(KeyError::MalformedStructuredField { placeholders: 2, .. }))
        ));
    }

    #[test]
    fn test_naming_convention_enforced_without_override() {
        let declaration = RelationDeclaration::new(
            "motion",
            RelationEnd::one("lead"),
            "user",
            RelationEnd::many("led_motion_ids"),
        );
        assert!(matches!(declaration.descriptors(), Err(DeclarationError::Invalid(_))));
    }
}
