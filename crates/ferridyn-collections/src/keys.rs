//! Key assembly: derives partition, sort, index and TTL key values from a
//! document and the key paths a collection declares.
//!
//! Every function here is pure. Key strings have the shape
//! `<collection><sep><v1><sep><v2>...`, which lets a single table serve many
//! collections and access patterns without key collisions.

use chrono::DateTime;
use serde_json::Value;

use crate::collection::{KeyKind, NormalizerOptions};
use crate::error::{Error, ValidationError};
use crate::types::{ID_FIELD, KeyPath};

/// Join a collection name and extracted values into one key string.
///
/// - No declared paths: the bare collection name.
/// - All values absent: `None` for sort (and TTL) keys, which are optional;
///   the bare collection name for partition keys, which must always exist.
/// - Otherwise the collection name and every value joined by `separator` in
///   declared order. Absent values render as empty segments and keep their
///   position.
///
/// `value_paths` is only consulted for its arity.
pub fn assemble_indexed_value(
    kind: KeyKind,
    collection_name: &str,
    value_paths: &[KeyPath],
    values: &[Option<String>],
    separator: &str,
) -> Option<String> {
    if kind != KeyKind::Partition
        && !value_paths.is_empty()
        && values.iter().all(Option::is_none)
    {
        return None;
    }
    Some(assemble_partition_value(
        collection_name,
        value_paths,
        values,
        separator,
    ))
}

/// Partition-key form of [`assemble_indexed_value`], which is always present.
pub fn assemble_partition_value(
    collection_name: &str,
    value_paths: &[KeyPath],
    values: &[Option<String>],
    separator: &str,
) -> String {
    if value_paths.is_empty() || values.iter().all(Option::is_none) {
        return collection_name.to_string();
    }
    let mut key = String::from(collection_name);
    for value in values {
        key.push_str(separator);
        if let Some(v) = value {
            key.push_str(v);
        }
    }
    key
}

/// The primary key string for an identifier: `<collection><sep><id>`.
pub fn id_key_value(collection_name: &str, separator: &str, id: &str) -> String {
    assemble_partition_value(
        collection_name,
        &[KeyPath::parse(ID_FIELD)],
        &[Some(id.to_string())],
        separator,
    )
}

/// Compute one key attribute value for `document`.
///
/// Partition and sort keys are returned as strings via
/// [`assemble_indexed_value`]; TTL keys as whole epoch seconds. `Ok(None)`
/// means the attribute is absent and should not be stored.
///
/// Fails with [`ValidationError::InvalidIndexedFieldValue`] when a required
/// path is absent, `null` or an empty string, or when a declared path holds
/// an object or array.
pub fn construct_key_value(
    kind: KeyKind,
    collection_name: &str,
    separator: &str,
    value_paths: &[KeyPath],
    options: &NormalizerOptions,
    document: &Value,
    required_paths: Option<&[KeyPath]>,
) -> Result<Option<Value>, Error> {
    if let Some(required) = required_paths {
        for path in required {
            if !is_present(path.resolve(document)) {
                return Err(ValidationError::InvalidIndexedFieldValue {
                    collection: collection_name.to_string(),
                    path: path.clone(),
                    reason: "required field is missing or empty".to_string(),
                }
                .into());
            }
        }
    }

    if kind == KeyKind::Ttl {
        let ttl = value_paths
            .first()
            .and_then(|path| path.resolve(document))
            .and_then(to_ttl_seconds);
        return Ok(ttl.map(Value::from));
    }

    let values = value_paths
        .iter()
        .map(|path| extract_key_segment(collection_name, path, document, options))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(
        assemble_indexed_value(kind, collection_name, value_paths, &values, separator)
            .map(Value::String),
    )
}

/// Render the value at `path` as a key segment.
///
/// Strings pass through the string normalizer; numbers and booleans use
/// their JSON text; `null` and missing values are absent.
fn extract_key_segment(
    collection_name: &str,
    path: &KeyPath,
    document: &Value,
    options: &NormalizerOptions,
) -> Result<Option<String>, Error> {
    match path.resolve(document) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(options.normalize(path, s.clone()))),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(Value::Bool(b)) => Ok(Some(b.to_string())),
        Some(other) => Err(ValidationError::InvalidIndexedFieldValue {
            collection: collection_name.to_string(),
            path: path.clone(),
            reason: format!("expected a scalar value, got {}", value_kind(other)),
        }
        .into()),
    }
}

fn is_present(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    }
}

/// Short name of a JSON value's type (for error messages).
pub(crate) fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Convert a point in time to whole seconds since the Unix epoch, rounded up.
///
/// Strings are parsed as RFC 3339 timestamps; numbers are epoch milliseconds.
/// Anything else, or an unparsable string, yields `None`.
pub fn to_ttl_seconds(value: &Value) -> Option<i64> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| (dt.timestamp_millis() + 999).div_euclid(1000)),
        Value::Number(n) => n
            .as_f64()
            .filter(|ms| ms.is_finite())
            .map(|ms| (ms / 1000.0).ceil() as i64),
        _ => None,
    }
}

/// True if `candidate_prefix` is a structural prefix of `longer`.
///
/// The empty path is a prefix of every path.
pub fn is_subset_of_key_path(longer: &KeyPath, candidate_prefix: &KeyPath) -> bool {
    candidate_prefix.len() <= longer.len()
        && candidate_prefix
            .segments()
            .iter()
            .zip(longer.segments())
            .all(|(a, b)| a == b)
}

/// First entry of `candidates` that is a prefix of `target`.
pub fn find_matching_path<'a>(candidates: &'a [KeyPath], target: &KeyPath) -> Option<&'a KeyPath> {
    candidates
        .iter()
        .find(|candidate| is_subset_of_key_path(target, candidate))
}
