//! Wire Key Codec
//!
//! Encodes and decodes the three key shapes spoken on the wire:
//! `collection/id`, `collection/id/field`, and structured field names that
//! carry a single `$` placeholder (`group_$_ids` filled with `3` becomes
//! `group_$3_ids`).

use crate::error::KeyError;
use crate::types::Id;

/// Separator between key segments.
pub const KEY_SEPARATOR: char = '/';

/// Placeholder token inside structured field names.
pub const PLACEHOLDER: char = '$';

/// Build a fully-qualified id: `collection/id`.
pub fn fqid(collection: &str, id: Id) -> String {
    format!("{}{}{}", collection, KEY_SEPARATOR, id)
}

/// Build a fully-qualified field: `collection/id/field`.
pub fn fqfield(collection: &str, id: Id, field: &str) -> String {
    format!(
        "{}{}{}{}{}",
        collection, KEY_SEPARATOR, id, KEY_SEPARATOR, field
    )
}

/// Split a fqid into `(collection, id)`.
pub fn split_fqid(key: &str) -> Result<(&str, Id), KeyError> {
    let parts: Vec<&str> = key.split(KEY_SEPARATOR).collect();
    if parts.len() != 2 || parts[0].is_empty() {
        return Err(KeyError::MalformedKey {
            key: key.to_string(),
            expected_parts: 2,
        });
    }
    Ok((parts[0], parse_id(key, parts[1])?))
}

/// Split a fqfield into `(collection, id, field)`.
pub fn split_fqfield(key: &str) -> Result<(&str, Id, &str), KeyError> {
    let parts: Vec<&str> = key.split(KEY_SEPARATOR).collect();
    if parts.len() != 3 || parts[0].is_empty() || parts[2].is_empty() {
        return Err(KeyError::MalformedKey {
            key: key.to_string(),
            expected_parts: 3,
        });
    }
    Ok((parts[0], parse_id(key, parts[1])?, parts[2]))
}

fn parse_id(key: &str, raw: &str) -> Result<Id, KeyError> {
    raw.parse::<Id>().map_err(|_| KeyError::InvalidId {
        key: key.to_string(),
    })
}

/// True if the field name contains the placeholder token.
pub fn is_structured_field(field: &str) -> bool {
    field.contains(PLACEHOLDER)
}

/// True for a bare template (`group_$_ids`), false for an effective
/// structured field (`group_$3_ids`) or a plain field.
pub fn is_template_field(field: &str) -> bool {
    match field.split_once(PLACEHOLDER) {
        Some((_, rest)) => !rest.starts_with(|c: char| c.is_ascii_digit()),
        None => false,
    }
}

/// Substitute the placeholder with a concrete parameter, producing the
/// effective field name. Fields without a placeholder are returned as is.
pub fn fill_placeholder(template: &str, value: &str) -> String {
    match template.find(PLACEHOLDER) {
        Some(pos) => {
            let (head, tail) = template.split_at(pos + PLACEHOLDER.len_utf8());
            format!("{}{}{}", head, value, tail)
        }
        None => template.to_string(),
    }
}

/// Split a structured field template into the parts before and after its
/// placeholder. Fails unless the template holds exactly one placeholder.
pub fn split_template(template: &str) -> Result<(&str, &str), KeyError> {
    let placeholders = template.matches(PLACEHOLDER).count();
    if placeholders != 1 {
        return Err(KeyError::MalformedStructuredField {
            field: template.to_string(),
            placeholders,
        });
    }
    let pos = template.find(PLACEHOLDER).unwrap_or_default();
    Ok((&template[..pos], &template[pos + PLACEHOLDER.len_utf8()..]))
}

/// Recover the parameter from an effective field built from `prefix` and `suffix`.
///
/// Returns `None` when the field was not built from this template, or when
/// it is the bare template itself.
pub fn extract_parameter<'a>(prefix: &str, suffix: &str, effective: &'a str) -> Option<&'a str> {
    let rest = effective.strip_prefix(prefix)?.strip_prefix(PLACEHOLDER)?;
    let value = rest.strip_suffix(suffix)?;
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}
