//! The collection context: a backend handle plus the registered collection
//! definitions, and the single-item operations executed through it.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::backend::{Backend, BackendError, TransactWriteOutput};
use crate::collection::{CollectionDefinition, CollectionVariant};
use crate::condition::CompositeCondition;
use crate::error::{ConfigError, Error, ValidationError, WriteError};
use crate::types::{Document, MAX_TRANSACT_GET_ITEMS};
use crate::wrapper::unwrap_item;

use super::operations::{
    FindDescriptor, build_delete_child_request, build_delete_request, build_get_request,
    build_insert_request, build_replace_request, document_id, require_child,
};
use super::transaction::{TransactWriteOptions, TransactionWrite, TransactionWriteRequest};

/// Entry point for every collection operation.
///
/// Pairs a caller-owned backend handle with the set of collection
/// definitions it serves. Cheap to clone when `B` is.
#[derive(Clone)]
pub struct Context<B> {
    backend: B,
    collections: HashMap<String, Arc<CollectionDefinition>>,
}

impl<B> Context<B> {
    /// Register `collections` against `backend`.
    ///
    /// Names must be unique and every child must name a root collection
    /// registered in the same call, sharing its table, primary key, and
    /// separator.
    pub fn new(backend: B, collections: Vec<CollectionDefinition>) -> Result<Self, Error> {
        let mut registry = HashMap::with_capacity(collections.len());
        for definition in collections {
            let name = definition.name().to_string();
            if registry.contains_key(&name) {
                return Err(ConfigError::DuplicateCollection(name).into());
            }
            registry.insert(name, Arc::new(definition));
        }

        for definition in registry.values() {
            if let CollectionVariant::Child {
                parent_collection_name,
                ..
            } = definition.variant()
            {
                match registry.get(parent_collection_name) {
                    None => {
                        return Err(ConfigError::ParentCollectionNotFound {
                            collection: definition.name().to_string(),
                            parent: parent_collection_name.clone(),
                        }
                        .into());
                    }
                    Some(parent) if parent.is_child() => {
                        return Err(ConfigError::InvalidDefinition {
                            collection: definition.name().to_string(),
                            reason: format!(
                                "parent '{parent_collection_name}' is itself a child collection"
                            ),
                        }
                        .into());
                    }
                    Some(parent) => shares_partition(definition, parent)?,
                }
            }
        }

        info!(collections = registry.len(), "collection context ready");
        Ok(Self {
            backend,
            collections: registry,
        })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Look up a registered collection.
    pub fn collection(&self, name: &str) -> Result<&CollectionDefinition, Error> {
        self.collections
            .get(name)
            .map(Arc::as_ref)
            .ok_or_else(|| ConfigError::CollectionNotFound(name.to_string()).into())
    }

    /// Names of all registered collections, in no particular order.
    pub fn collection_names(&self) -> impl Iterator<Item = &str> {
        self.collections.keys().map(String::as_str)
    }
}

/// A child's items live in its parent's partition, so both must address the
/// same table with the same key attributes and separator.
fn shares_partition(
    child: &CollectionDefinition,
    parent: &CollectionDefinition,
) -> Result<(), ConfigError> {
    let (child_layout, parent_layout) = (child.layout(), parent.layout());
    let mismatch = if child_layout.table_name != parent_layout.table_name {
        Some("table")
    } else if child_layout.primary_key != parent_layout.primary_key {
        Some("primary key attributes")
    } else if child_layout.key_separator() != parent_layout.key_separator() {
        Some("key separator")
    } else {
        None
    };

    match mismatch {
        Some(what) => Err(ConfigError::InvalidDefinition {
            collection: child.name().to_string(),
            reason: format!(
                "{what} differs from parent collection '{}'",
                parent.name()
            ),
        }),
        None => Ok(()),
    }
}

impl<B: Backend> Context<B> {
    /// Store `value`, creating or fully replacing the document with its `_id`.
    ///
    /// A missing `_id` is generated. Returns the document as stored. When
    /// `condition` is given it is evaluated against the currently stored
    /// document and a failure surfaces as
    /// [`BackendError::ConditionalCheckFailed`].
    pub async fn replace(
        &self,
        collection: &str,
        value: &Document,
        condition: Option<&CompositeCondition>,
    ) -> Result<Document, Error> {
        let definition = self.collection(collection)?;
        let (request, stored) = build_replace_request(definition, value, condition)?;
        self.backend.put_item(request).await?;
        Ok(stored)
    }

    /// Store `value` only if no document with its `_id` exists yet.
    pub async fn insert(&self, collection: &str, value: &Document) -> Result<Document, Error> {
        let definition = self.collection(collection)?;
        let (request, stored) = build_insert_request(definition, value)?;
        match self.backend.put_item(request).await {
            Ok(_) => Ok(stored),
            Err(BackendError::ConditionalCheckFailed { .. }) => {
                let id = document_id(&stored);
                debug!(collection, id = %id, "insert found existing document");
                Err(WriteError::AlreadyExists {
                    collection: collection.to_string(),
                    id,
                }
                .into())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Delete a root collection document, returning it if it existed.
    pub async fn delete_by_id(
        &self,
        collection: &str,
        id: &str,
        condition: Option<&CompositeCondition>,
    ) -> Result<Option<Document>, Error> {
        let definition = self.collection(collection)?;
        let request = build_delete_request(definition, id, condition)?;
        let old = self.backend.delete_item(request).await?;
        old.map(unwrap_item).transpose()
    }

    /// Delete a child collection document, returning it if it existed.
    pub async fn delete_child_by_id(
        &self,
        collection: &str,
        id: &str,
        parent_id: &str,
        condition: Option<&CompositeCondition>,
    ) -> Result<Option<Document>, Error> {
        let definition = self.collection(collection)?;
        let request = build_delete_child_request(definition, id, parent_id, condition)?;
        let old = self.backend.delete_item(request).await?;
        old.map(unwrap_item).transpose()
    }

    pub async fn find_by_id(&self, collection: &str, id: &str) -> Result<Option<Document>, Error> {
        let definition = self.collection(collection)?;
        let request = build_get_request(definition, id, None)?;
        let item = self.backend.get_item(request).await?;
        item.map(unwrap_item).transpose()
    }

    pub async fn find_child_by_id(
        &self,
        collection: &str,
        id: &str,
        parent_id: &str,
    ) -> Result<Option<Document>, Error> {
        let definition = self.collection(collection)?;
        require_child(definition)?;
        let request = build_get_request(definition, id, Some(parent_id))?;
        let item = self.backend.get_item(request).await?;
        item.map(unwrap_item).transpose()
    }

    /// Read up to 25 documents from one consistent snapshot.
    ///
    /// The result is positional: entry `i` answers `descriptors[i]` and is
    /// `None` when that document does not exist.
    pub async fn transact_find_by_ids(
        &self,
        descriptors: &[FindDescriptor],
    ) -> Result<Vec<Option<Document>>, Error> {
        if descriptors.is_empty() || descriptors.len() > MAX_TRANSACT_GET_ITEMS {
            return Err(ValidationError::InvalidFindDescriptor(format!(
                "expected between 1 and {MAX_TRANSACT_GET_ITEMS} descriptors, got {}",
                descriptors.len()
            ))
            .into());
        }

        let requests = descriptors
            .iter()
            .map(|descriptor| {
                let definition = self.collection(&descriptor.collection)?;
                build_get_request(definition, &descriptor.id, descriptor.parent_id.as_deref())
            })
            .collect::<Result<Vec<_>, Error>>()?;

        debug!(items = requests.len(), "transactional find");
        let items = self.backend.transact_get(requests).await?;
        items
            .into_iter()
            .map(|item| item.map(unwrap_item).transpose())
            .collect()
    }

    /// Start an empty transactional write.
    pub fn transaction(&self) -> TransactionWrite<'_, B> {
        TransactionWrite::new(self)
    }

    /// Submit `requests` as one atomic write.
    pub async fn transaction_write(
        &self,
        requests: Vec<TransactionWriteRequest>,
        options: TransactWriteOptions,
    ) -> Result<TransactWriteOutput, Error> {
        let mut txn = self.transaction();
        for request in requests {
            txn.push(request);
        }
        txn.options(options).execute().await
    }
}
