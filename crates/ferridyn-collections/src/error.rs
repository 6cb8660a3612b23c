//! Error types for all collection operations.

use thiserror::Error;

use crate::backend::{BackendError, CancellationReason};
use crate::types::KeyPath;

/// Top-level error type for collection operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Write(#[from] WriteError),

    /// A backend failure with no domain counterpart, passed through unchanged.
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Caller input rejected before any backend call was made.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("invalid _id in collection '{collection}': expected a string, got {actual}")]
    InvalidId { collection: String, actual: String },

    #[error("invalid value for indexed field '{path}' in collection '{collection}': {reason}")]
    InvalidIndexedFieldValue {
        collection: String,
        path: KeyPath,
        reason: String,
    },

    #[error(
        "missing or invalid parent id for child collection '{collection}' (parent '{parent_collection}')"
    )]
    InvalidParentId {
        collection: String,
        parent_collection: String,
    },

    #[error("invalid find descriptors: {0}")]
    InvalidFindDescriptor(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// A transactional write rejected by the backend.
#[derive(Debug, Error)]
pub enum TransactionError {
    /// The submission addressed the same item more than once.
    #[error("transaction validation failed: {message}")]
    Validation { message: String },

    /// The backend could not satisfy every condition atomically.
    #[error("transaction canceled: {message}")]
    Canceled {
        message: String,
        /// One entry per submitted item, in submission order.
        reasons: Vec<CancellationReason>,
    },

    #[error("transaction conflict: {message}")]
    Conflict { message: String },

    #[error("idempotency token {token:?} was reused with different parameters: {message}")]
    IdempotentParameterMismatch {
        token: Option<String>,
        message: String,
    },

    #[error("transaction with idempotency token {token:?} is still in progress: {message}")]
    InProgress {
        token: Option<String>,
        message: String,
    },
}

/// Collection definitions that cannot be resolved or are inconsistent.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    #[error("collection defined more than once: {0}")]
    DuplicateCollection(String),

    #[error("child collection '{collection}' references unknown parent '{parent}'")]
    ParentCollectionNotFound { collection: String, parent: String },

    #[error("access pattern in collection '{collection}' references unknown index '{index}'")]
    IndexNotFound { collection: String, index: String },

    #[error("invalid definition for collection '{collection}': {reason}")]
    InvalidDefinition { collection: String, reason: String },
}

/// A single-item write rejected by its own guard condition.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("an item with _id '{id}' already exists in collection '{collection}'")]
    AlreadyExists { collection: String, id: String },
}

pub type Result<T> = std::result::Result<T, Error>;
