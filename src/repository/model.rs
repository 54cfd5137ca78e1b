//! Collection model capabilities
//!
//! Each collection plugs into the cache through [`CollectionModel`]: its
//! fieldsets, sort order, access filter and title accessor. Optional
//! capabilities are separate traits queried explicitly.

use super::ViewModel;
use crate::relation::compare_values;
use crate::request::{FieldsetTable, SimplifiedModelRequest};
use std::cmp::Ordering;

/// Per-collection behavior of the cache
pub trait CollectionModel: Send + Sync {
    fn collection(&self) -> &str;

    /// Named fieldsets used when building requests for this collection.
    fn fieldsets(&self) -> FieldsetTable;

    /// Order of the sorted list; ascending id unless overridden.
    fn compare(&self, a: &ViewModel, b: &ViewModel) -> Ordering {
        a.id().cmp(&b.id())
    }

    /// Whether the current viewer may see this model in the sorted list.
    fn is_accessible(&self, _model: &ViewModel) -> bool {
        true
    }

    fn title(&self, model: &ViewModel) -> String {
        default_title(model)
    }

    /// Capability query for [`FullListSource`].
    fn full_list_source(&self) -> Option<&dyn FullListSource> {
        None
    }
}

/// Collections that can describe a request for all of their models
pub trait FullListSource {
    fn full_list_request(&self) -> SimplifiedModelRequest;
}

/// `title`, then `name`, then the fqid.
pub fn default_title(model: &ViewModel) -> String {
    model
        .get_str("title")
        .or_else(|| model.get_str("name"))
        .map(str::to_string)
        .unwrap_or_else(|| model.fqid())
}

/// Compare two view-models by one field, ties broken by id.
pub fn compare_by_field(a: &ViewModel, b: &ViewModel, field: &str) -> Ordering {
    compare_values(a.get(field), b.get(field)).then_with(|| a.id().cmp(&b.id()))
}
