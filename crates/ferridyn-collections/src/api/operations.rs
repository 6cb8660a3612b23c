//! Single-item request builders.
//!
//! Each builder turns a collection definition and operation arguments into
//! exactly one backend request without touching the backend. [`Context`]
//! executes them; the transaction coordinator composes them.
//!
//! [`Context`]: super::Context

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backend::{DeleteRequest, GetRequest, PutRequest, ReturnValues};
use crate::collection::CollectionDefinition;
use crate::condition::{CompiledCondition, CompositeCondition, compile_condition};
use crate::error::{Error, ValidationError};
use crate::types::{Document, ID_FIELD, KeyPath, PathSegment, VALUE_ATTRIBUTE};
use crate::wrapper::{key_for_id, to_wrapped};

/// Addresses one document for a transactional read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindDescriptor {
    pub collection: String,
    pub id: String,
    /// Required for child collections.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

impl FindDescriptor {
    pub fn new(collection: &str, id: &str) -> Self {
        Self {
            collection: collection.to_string(),
            id: id.to_string(),
            parent_id: None,
        }
    }

    pub fn child(collection: &str, id: &str, parent_id: &str) -> Self {
        Self {
            collection: collection.to_string(),
            id: id.to_string(),
            parent_id: Some(parent_id.to_string()),
        }
    }
}

/// Compile a condition on the user document into one on the stored envelope.
pub fn compile_value_condition(condition: &CompositeCondition) -> Result<CompiledCondition, Error> {
    let prefix = KeyPath::new(vec![PathSegment::Field(VALUE_ATTRIBUTE.to_string())]);
    compile_condition(condition, &prefix)
}

/// Build an unconditional-unless-told-otherwise upsert of `value`.
///
/// Returns the request and the document as it will be stored (with `_id`).
pub fn build_replace_request(
    definition: &CollectionDefinition,
    value: &Document,
    condition: Option<&CompositeCondition>,
) -> Result<(PutRequest, Document), Error> {
    let wrapped = to_wrapped(definition, value)?;
    let stored = wrapped.value.clone();
    let condition = condition.map(compile_value_condition).transpose()?;

    debug!(
        collection = definition.name(),
        id = %wrapped.id,
        sid = %wrapped.sid,
        conditional = condition.is_some(),
        "built replace request"
    );

    let request = PutRequest {
        table_name: definition.layout().table_name.clone(),
        item: wrapped.into_item(definition.layout()),
        condition,
        return_values: ReturnValues::None,
    };
    Ok((request, stored))
}

/// Build a put that fails if an item with the same key already exists.
pub fn build_insert_request(
    definition: &CollectionDefinition,
    value: &Document,
) -> Result<(PutRequest, Document), Error> {
    let (mut request, stored) = build_replace_request(definition, value, None)?;
    let partition_key = &definition.layout().primary_key.partition_key;
    request.condition = Some(compile_condition(
        &CompositeCondition::not_exists(KeyPath::new(vec![PathSegment::Field(
            partition_key.clone(),
        )])),
        &KeyPath::default(),
    )?);
    Ok((request, stored))
}

/// Build a delete of a root collection document, returning the old item.
pub fn build_delete_request(
    definition: &CollectionDefinition,
    id: &str,
    condition: Option<&CompositeCondition>,
) -> Result<DeleteRequest, Error> {
    build_delete(definition, id, None, condition)
}

/// Build a delete of a child collection document under `parent_id`.
pub fn build_delete_child_request(
    definition: &CollectionDefinition,
    id: &str,
    parent_id: &str,
    condition: Option<&CompositeCondition>,
) -> Result<DeleteRequest, Error> {
    require_child(definition)?;
    build_delete(definition, id, Some(parent_id), condition)
}

fn build_delete(
    definition: &CollectionDefinition,
    id: &str,
    parent_id: Option<&str>,
    condition: Option<&CompositeCondition>,
) -> Result<DeleteRequest, Error> {
    let key = key_for_id(definition, id, parent_id)?;
    let condition = condition.map(compile_value_condition).transpose()?;

    debug!(collection = definition.name(), id, parent_id, "built delete request");

    Ok(DeleteRequest {
        table_name: definition.layout().table_name.clone(),
        key,
        condition,
        return_values: ReturnValues::AllOld,
    })
}

/// Build a read of one document. `parent_id` is required for child collections.
pub fn build_get_request(
    definition: &CollectionDefinition,
    id: &str,
    parent_id: Option<&str>,
) -> Result<GetRequest, Error> {
    Ok(GetRequest {
        table_name: definition.layout().table_name.clone(),
        key: key_for_id(definition, id, parent_id)?,
    })
}

pub(crate) fn require_child(definition: &CollectionDefinition) -> Result<(), Error> {
    if definition.is_child() {
        Ok(())
    } else {
        Err(ValidationError::InvalidArgument(format!(
            "collection '{}' is not a child collection",
            definition.name()
        ))
        .into())
    }
}

/// The `_id` of a stored document, for error reporting.
pub(crate) fn document_id(document: &Document) -> String {
    document
        .get(ID_FIELD)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}
