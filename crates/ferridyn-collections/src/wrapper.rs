//! The storage envelope around user documents.
//!
//! A stored item looks like
//! `{ <pk>: "coll|-|id", <sk>: "coll|-|id", <index keys...>, value: {...}, type: "coll" }`.
//! `type` disambiguates collections sharing a table.

use serde_json::{Map, Value};

use crate::collection::{CollectionDefinition, CollectionLayout, CollectionVariant};
use crate::error::{Error, ValidationError};
use crate::keys::{construct_key_value, id_key_value, value_kind};
use crate::types::{Document, ID_FIELD, Item, TYPE_ATTRIBUTE, VALUE_ATTRIBUTE};

/// A document together with every key derived from it.
#[derive(Debug, Clone, PartialEq)]
pub struct WrappedDocument {
    /// Partition key value.
    pub id: String,
    /// Sort key value.
    pub sid: String,
    /// Secondary index and TTL attributes. Absent keys are omitted.
    pub index_keys: Map<String, Value>,
    /// The user document, with `_id` always populated.
    pub value: Document,
    pub type_: String,
}

impl WrappedDocument {
    /// The `_id` stored in the wrapped document.
    pub fn document_id(&self) -> Option<&str> {
        self.value.get(ID_FIELD).and_then(Value::as_str)
    }

    /// The primary key of this envelope as a backend key map.
    pub fn key(&self, layout: &CollectionLayout) -> Item {
        let mut key = Item::new();
        key.insert(
            layout.primary_key.partition_key.clone(),
            Value::String(self.id.clone()),
        );
        key.insert(
            layout.primary_key.sort_key.clone(),
            Value::String(self.sid.clone()),
        );
        key
    }

    /// Flatten into the attribute map written to the backend.
    pub fn into_item(self, layout: &CollectionLayout) -> Item {
        let mut item = self.key(layout);
        item.extend(self.index_keys);
        item.insert(VALUE_ATTRIBUTE.to_string(), self.value);
        item.insert(TYPE_ATTRIBUTE.to_string(), Value::String(self.type_));
        item
    }
}

/// Wrap `document` for storage in `definition`'s collection.
///
/// The input is never mutated: when `_id` is missing a generated identifier
/// is added to a copy.
pub fn to_wrapped(
    definition: &CollectionDefinition,
    document: &Document,
) -> Result<WrappedDocument, Error> {
    let Value::Object(fields) = document else {
        return Err(ValidationError::InvalidArgument(format!(
            "documents must be objects, got {}",
            value_kind(document)
        ))
        .into());
    };

    let (id, value) = match fields.get(ID_FIELD) {
        Some(Value::String(id)) => (id.clone(), document.clone()),
        Some(other) => {
            return Err(ValidationError::InvalidId {
                collection: definition.name().to_string(),
                actual: value_kind(other).to_string(),
            }
            .into());
        }
        None => {
            let id = definition.generate_id();
            let mut copy = fields.clone();
            copy.insert(ID_FIELD.to_string(), Value::String(id.clone()));
            (id, Value::Object(copy))
        }
    };

    let separator = definition.separator();
    let name = definition.name();

    match definition.variant() {
        CollectionVariant::Root {
            wrapper_extract_keys,
            ..
        } => {
            let key_value = id_key_value(name, separator, &id);
            let mut index_keys = Map::new();
            for extract in wrapper_extract_keys {
                let computed = construct_key_value(
                    extract.kind,
                    name,
                    separator,
                    &extract.value_paths,
                    &extract.options,
                    &value,
                    extract.required_paths.as_deref(),
                )?;
                if let Some(v) = computed {
                    index_keys.insert(extract.key.clone(), v);
                }
            }
            Ok(WrappedDocument {
                id: key_value.clone(),
                sid: key_value,
                index_keys,
                value,
                type_: name.to_string(),
            })
        }
        CollectionVariant::Child {
            foreign_key_path,
            parent_collection_name,
        } => {
            // Scalar foreign keys render the way key segments do.
            let parent_id = match foreign_key_path.resolve(&value) {
                Some(Value::String(s)) if !s.is_empty() => s.clone(),
                Some(Value::Number(n)) => n.to_string(),
                Some(Value::Bool(b)) => b.to_string(),
                _ => {
                    return Err(ValidationError::InvalidParentId {
                        collection: name.to_string(),
                        parent_collection: parent_collection_name.clone(),
                    }
                    .into());
                }
            };
            Ok(WrappedDocument {
                id: id_key_value(parent_collection_name, separator, &parent_id),
                sid: id_key_value(name, separator, &id),
                index_keys: Map::new(),
                value,
                type_: name.to_string(),
            })
        }
    }
}

/// The user document inside an envelope.
pub fn unwrap(wrapped: &WrappedDocument) -> &Document {
    &wrapped.value
}

/// Extract the user document from a stored item.
pub fn unwrap_item(mut item: Item) -> Result<Document, Error> {
    item.remove(VALUE_ATTRIBUTE).ok_or_else(|| {
        ValidationError::InvalidArgument(format!(
            "stored item has no '{VALUE_ATTRIBUTE}' attribute"
        ))
        .into()
    })
}

/// The backend key addressing `id` in `definition`'s collection.
///
/// Child collections are addressed under their parent and require
/// `parent_id`.
pub fn key_for_id(
    definition: &CollectionDefinition,
    id: &str,
    parent_id: Option<&str>,
) -> Result<Item, Error> {
    let separator = definition.separator();
    let name = definition.name();
    let (pk, sk) = match definition.variant() {
        CollectionVariant::Root { .. } => {
            let key = id_key_value(name, separator, id);
            (key.clone(), key)
        }
        CollectionVariant::Child {
            parent_collection_name,
            ..
        } => {
            let parent_id = parent_id.filter(|p| !p.is_empty()).ok_or_else(|| {
                ValidationError::InvalidParentId {
                    collection: name.to_string(),
                    parent_collection: parent_collection_name.clone(),
                }
            })?;
            (
                id_key_value(parent_collection_name, separator, parent_id),
                id_key_value(name, separator, id),
            )
        }
    };

    let layout = definition.layout();
    let mut key = Item::new();
    key.insert(layout.primary_key.partition_key.clone(), Value::String(pk));
    key.insert(layout.primary_key.sort_key.clone(), Value::String(sk));
    Ok(key)
}
