//! The key-value backend seam: request/response types, the closed set of
//! backend failures, and the [`Backend`] trait.
//!
//! Adapters decode their native error identifiers into [`BackendError`]
//! exactly once (see [`BackendError::from_service_error`]); nothing above
//! this module matches on error strings.

pub mod expression;
pub mod memory;

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::condition::CompiledCondition;
use crate::types::Item;

pub use memory::MemoryBackend;

/// Which item image a write returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReturnValues {
    #[default]
    None,
    AllOld,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReturnConsumedCapacity {
    #[default]
    None,
    Total,
    Indexes,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReturnItemCollectionMetrics {
    #[default]
    None,
    Size,
}

/// Write a whole item, replacing any existing item with the same key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PutRequest {
    pub table_name: String,
    pub item: Item,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<CompiledCondition>,
    #[serde(default)]
    pub return_values: ReturnValues,
}

/// Delete the item with the given key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub table_name: String,
    pub key: Item,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<CompiledCondition>,
    #[serde(default)]
    pub return_values: ReturnValues,
}

/// Read the item with the given key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetRequest {
    pub table_name: String,
    pub key: Item,
}

/// One element of an atomic write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TransactWriteItem {
    Put(PutRequest),
    Delete(DeleteRequest),
}

impl TransactWriteItem {
    pub fn table_name(&self) -> &str {
        match self {
            TransactWriteItem::Put(put) => &put.table_name,
            TransactWriteItem::Delete(delete) => &delete.table_name,
        }
    }

    pub fn condition(&self) -> Option<&CompiledCondition> {
        match self {
            TransactWriteItem::Put(put) => put.condition.as_ref(),
            TransactWriteItem::Delete(delete) => delete.condition.as_ref(),
        }
    }
}

/// A complete atomic write submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactWriteInput {
    pub items: Vec<TransactWriteItem>,
    /// Idempotency token; resubmitting identical items with it is a no-op.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_request_token: Option<String>,
    #[serde(default)]
    pub return_consumed_capacity: ReturnConsumedCapacity,
    #[serde(default)]
    pub return_item_collection_metrics: ReturnItemCollectionMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumedCapacity {
    pub table_name: String,
    pub capacity_units: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemCollectionMetrics {
    /// Partition key of the item collection.
    pub item_collection_key: Item,
    pub size_estimate_bytes: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactWriteOutput {
    pub consumed_capacity: Vec<ConsumedCapacity>,
    pub item_collection_metrics: BTreeMap<String, Vec<ItemCollectionMetrics>>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why one item of a canceled transaction failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancellationCode {
    /// This item was not the cause.
    None,
    ConditionalCheckFailed,
    ItemCollectionSizeLimitExceeded,
    TransactionConflict,
    ProvisionedThroughputExceeded,
    ThrottlingError,
    ValidationError,
    Other(String),
}

impl CancellationCode {
    pub fn from_code(code: &str) -> Self {
        match code {
            "None" => CancellationCode::None,
            "ConditionalCheckFailed" => CancellationCode::ConditionalCheckFailed,
            "ItemCollectionSizeLimitExceeded" => CancellationCode::ItemCollectionSizeLimitExceeded,
            "TransactionConflict" => CancellationCode::TransactionConflict,
            "ProvisionedThroughputExceeded" => CancellationCode::ProvisionedThroughputExceeded,
            "ThrottlingError" => CancellationCode::ThrottlingError,
            "ValidationError" => CancellationCode::ValidationError,
            other => CancellationCode::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            CancellationCode::None => "None",
            CancellationCode::ConditionalCheckFailed => "ConditionalCheckFailed",
            CancellationCode::ItemCollectionSizeLimitExceeded => "ItemCollectionSizeLimitExceeded",
            CancellationCode::TransactionConflict => "TransactionConflict",
            CancellationCode::ProvisionedThroughputExceeded => "ProvisionedThroughputExceeded",
            CancellationCode::ThrottlingError => "ThrottlingError",
            CancellationCode::ValidationError => "ValidationError",
            CancellationCode::Other(code) => code,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancellationReason {
    pub code: CancellationCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// The current item, when the backend returns it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<Item>,
}

impl CancellationReason {
    pub fn none() -> Self {
        Self {
            code: CancellationCode::None,
            message: None,
            item: None,
        }
    }
}

/// Message DynamoDB attaches to a `ValidationException` for duplicate targets.
const MULTIPLE_OPERATIONS_MESSAGE: &str = "multiple operations on one item";

/// Every failure a backend can report, decoded once at the adapter boundary.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BackendError {
    #[error("conditional check failed: {message}")]
    ConditionalCheckFailed { message: String },

    /// The same item was addressed more than once in one transaction.
    #[error("transaction validation error: {message}")]
    TransactionValidation { message: String },

    #[error("transaction canceled: {message}")]
    TransactionCanceled {
        message: String,
        reasons: Vec<CancellationReason>,
    },

    #[error("transaction conflict: {message}")]
    TransactionConflict { message: String },

    #[error("idempotent parameter mismatch: {message}")]
    IdempotentParameterMismatch { message: String },

    #[error("transaction in progress: {message}")]
    TransactionInProgress { message: String },

    #[error("resource not found: {message}")]
    ResourceNotFound { message: String },

    /// Any other service error, with the service's own error code.
    #[error("{code}: {message}")]
    Service { code: String, message: String },
}

impl BackendError {
    /// Decode a service error code (e.g. `TransactionConflictException`).
    ///
    /// Cancellation reasons are not part of the code; adapters that receive
    /// them should build [`BackendError::TransactionCanceled`] directly.
    pub fn from_service_error(code: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        let code = code.rsplit('#').next().unwrap_or(code);
        match code {
            "ConditionalCheckFailedException" => BackendError::ConditionalCheckFailed { message },
            "TransactionCanceledException" => BackendError::TransactionCanceled {
                message,
                reasons: Vec::new(),
            },
            "TransactionConflictException" => BackendError::TransactionConflict { message },
            "IdempotentParameterMismatchException" => {
                BackendError::IdempotentParameterMismatch { message }
            }
            "TransactionInProgressException" => BackendError::TransactionInProgress { message },
            "ResourceNotFoundException" => BackendError::ResourceNotFound { message },
            "ValidationException" if message.contains(MULTIPLE_OPERATIONS_MESSAGE) => {
                BackendError::TransactionValidation { message }
            }
            other => BackendError::Service {
                code: other.to_string(),
                message,
            },
        }
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        BackendError::Service {
            code: "ValidationException".to_string(),
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Backend trait
// ---------------------------------------------------------------------------

/// A partition-key/sort-key store with an all-or-nothing write transaction.
///
/// Handles are owned by the caller and shared across operations; this crate
/// never connects or closes them. Each call is a single request with no retry.
pub trait Backend: Send + Sync {
    /// Write an item, subject to an optional condition on the current item.
    fn put_item(
        &self,
        request: PutRequest,
    ) -> impl Future<Output = Result<Option<Item>, BackendError>> + Send;

    /// Delete an item, returning the old item when `AllOld` is requested.
    fn delete_item(
        &self,
        request: DeleteRequest,
    ) -> impl Future<Output = Result<Option<Item>, BackendError>> + Send;

    fn get_item(
        &self,
        request: GetRequest,
    ) -> impl Future<Output = Result<Option<Item>, BackendError>> + Send;

    /// Read several items from one consistent snapshot, positionally.
    fn transact_get(
        &self,
        requests: Vec<GetRequest>,
    ) -> impl Future<Output = Result<Vec<Option<Item>>, BackendError>> + Send;

    /// Apply every item atomically or none of them.
    fn transact_write(
        &self,
        input: TransactWriteInput,
    ) -> impl Future<Output = Result<TransactWriteOutput, BackendError>> + Send;
}

impl<B: Backend> Backend for Arc<B> {
    fn put_item(
        &self,
        request: PutRequest,
    ) -> impl Future<Output = Result<Option<Item>, BackendError>> + Send {
        (**self).put_item(request)
    }

    fn delete_item(
        &self,
        request: DeleteRequest,
    ) -> impl Future<Output = Result<Option<Item>, BackendError>> + Send {
        (**self).delete_item(request)
    }

    fn get_item(
        &self,
        request: GetRequest,
    ) -> impl Future<Output = Result<Option<Item>, BackendError>> + Send {
        (**self).get_item(request)
    }

    fn transact_get(
        &self,
        requests: Vec<GetRequest>,
    ) -> impl Future<Output = Result<Vec<Option<Item>>, BackendError>> + Send {
        (**self).transact_get(requests)
    }

    fn transact_write(
        &self,
        input: TransactWriteInput,
    ) -> impl Future<Output = Result<TransactWriteOutput, BackendError>> + Send {
        (**self).transact_write(input)
    }
}
