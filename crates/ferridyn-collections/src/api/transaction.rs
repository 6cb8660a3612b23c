//! Multi-item atomic writes across collections.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::backend::{
    Backend, BackendError, ReturnConsumedCapacity, ReturnItemCollectionMetrics,
    TransactWriteInput, TransactWriteItem, TransactWriteOutput,
};
use crate::condition::CompositeCondition;
use crate::error::{Error, TransactionError, ValidationError};
use crate::types::{Document, MAX_TRANSACT_WRITE_ITEMS};

use super::context::Context;
use super::operations::{build_delete_child_request, build_delete_request, build_replace_request};

/// One write within a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransactionWriteRequest {
    /// Upsert a document.
    Replace {
        collection: String,
        value: Document,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        condition: Option<CompositeCondition>,
    },
    /// Delete a root collection document.
    Delete {
        collection: String,
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        condition: Option<CompositeCondition>,
    },
    /// Delete a child collection document.
    DeleteChild {
        collection: String,
        id: String,
        parent_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        condition: Option<CompositeCondition>,
    },
}

impl TransactionWriteRequest {
    pub fn collection(&self) -> &str {
        match self {
            TransactionWriteRequest::Replace { collection, .. }
            | TransactionWriteRequest::Delete { collection, .. }
            | TransactionWriteRequest::DeleteChild { collection, .. } => collection,
        }
    }
}

/// Submission options for a transactional write.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactWriteOptions {
    /// Resubmitting identical items under the same token is a no-op.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_token: Option<String>,
    #[serde(default)]
    pub return_consumed_capacity: ReturnConsumedCapacity,
    #[serde(default)]
    pub return_item_collection_metrics: ReturnItemCollectionMetrics,
}

/// Lifecycle of a [`TransactionWrite`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Nothing queued yet.
    Idle,
    /// At least one write queued.
    Building,
    /// Sent to the backend, awaiting the outcome.
    Submitted,
    Committed,
    Rejected,
}

/// Collects writes and submits them as a single all-or-nothing transaction.
///
/// A transaction executes at most once; after it commits or is rejected,
/// [`execute`](Self::execute) returns an error without contacting the
/// backend.
pub struct TransactionWrite<'a, B> {
    ctx: &'a Context<B>,
    requests: Vec<TransactionWriteRequest>,
    options: TransactWriteOptions,
    state: TransactionState,
}

impl<'a, B: Backend> TransactionWrite<'a, B> {
    pub(crate) fn new(ctx: &'a Context<B>) -> Self {
        Self {
            ctx,
            requests: Vec::new(),
            options: TransactWriteOptions::default(),
            state: TransactionState::Idle,
        }
    }

    /// Queue an upsert of `value` into `collection`.
    pub fn replace(&mut self, collection: &str, value: Document) -> &mut Self {
        self.push(TransactionWriteRequest::Replace {
            collection: collection.to_string(),
            value,
            condition: None,
        })
    }

    /// Queue an upsert that only applies if `condition` holds on the stored document.
    pub fn replace_if(
        &mut self,
        collection: &str,
        value: Document,
        condition: CompositeCondition,
    ) -> &mut Self {
        self.push(TransactionWriteRequest::Replace {
            collection: collection.to_string(),
            value,
            condition: Some(condition),
        })
    }

    pub fn delete(&mut self, collection: &str, id: &str) -> &mut Self {
        self.push(TransactionWriteRequest::Delete {
            collection: collection.to_string(),
            id: id.to_string(),
            condition: None,
        })
    }

    pub fn delete_if(
        &mut self,
        collection: &str,
        id: &str,
        condition: CompositeCondition,
    ) -> &mut Self {
        self.push(TransactionWriteRequest::Delete {
            collection: collection.to_string(),
            id: id.to_string(),
            condition: Some(condition),
        })
    }

    pub fn delete_child(&mut self, collection: &str, id: &str, parent_id: &str) -> &mut Self {
        self.push(TransactionWriteRequest::DeleteChild {
            collection: collection.to_string(),
            id: id.to_string(),
            parent_id: parent_id.to_string(),
            condition: None,
        })
    }

    /// Queue an already-built request.
    pub fn push(&mut self, request: TransactionWriteRequest) -> &mut Self {
        self.requests.push(request);
        if self.state == TransactionState::Idle {
            self.state = TransactionState::Building;
        }
        self
    }

    pub fn idempotency_token(&mut self, token: &str) -> &mut Self {
        self.options.idempotency_token = Some(token.to_string());
        self
    }

    pub fn return_consumed_capacity(&mut self, mode: ReturnConsumedCapacity) -> &mut Self {
        self.options.return_consumed_capacity = mode;
        self
    }

    pub fn return_item_collection_metrics(
        &mut self,
        mode: ReturnItemCollectionMetrics,
    ) -> &mut Self {
        self.options.return_item_collection_metrics = mode;
        self
    }

    /// Replace all submission options at once.
    pub fn options(&mut self, options: TransactWriteOptions) -> &mut Self {
        self.options = options;
        self
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Number of queued writes.
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Submit every queued write atomically.
    ///
    /// Bounds and per-item validation run before the backend is contacted;
    /// a failure there leaves the transaction unsubmitted.
    pub async fn execute(&mut self) -> Result<TransactWriteOutput, Error> {
        if matches!(
            self.state,
            TransactionState::Submitted | TransactionState::Committed | TransactionState::Rejected
        ) {
            return Err(ValidationError::InvalidArgument(
                "transaction has already been submitted".to_string(),
            )
            .into());
        }

        let items = build_transact_items(self.ctx, &self.requests)?;
        let input = TransactWriteInput {
            items,
            client_request_token: self.options.idempotency_token.clone(),
            return_consumed_capacity: self.options.return_consumed_capacity,
            return_item_collection_metrics: self.options.return_item_collection_metrics,
        };

        debug!(
            items = input.items.len(),
            token = ?input.client_request_token,
            "submitting transaction"
        );
        self.state = TransactionState::Submitted;

        match self.ctx.backend().transact_write(input).await {
            Ok(output) => {
                self.state = TransactionState::Committed;
                Ok(output)
            }
            Err(err) => {
                self.state = TransactionState::Rejected;
                warn!(error = %err, "transaction rejected");
                Err(map_transaction_error(
                    err,
                    self.options.idempotency_token.as_deref(),
                ))
            }
        }
    }
}

/// Translate requests into backend items, one per request, in order.
pub fn build_transact_items<B>(
    ctx: &Context<B>,
    requests: &[TransactionWriteRequest],
) -> Result<Vec<TransactWriteItem>, Error> {
    if requests.is_empty() {
        return Err(ValidationError::InvalidArgument(
            "a transaction needs at least one write".to_string(),
        )
        .into());
    }
    if requests.len() > MAX_TRANSACT_WRITE_ITEMS {
        return Err(ValidationError::InvalidFindDescriptor(format!(
            "a transaction accepts at most {MAX_TRANSACT_WRITE_ITEMS} writes, got {}",
            requests.len()
        ))
        .into());
    }

    requests
        .iter()
        .map(|request| {
            let definition = ctx.collection(request.collection())?;
            let item = match request {
                TransactionWriteRequest::Replace {
                    value, condition, ..
                } => {
                    let (put, _) = build_replace_request(definition, value, condition.as_ref())?;
                    TransactWriteItem::Put(put)
                }
                TransactionWriteRequest::Delete { id, condition, .. } => {
                    let mut delete = build_delete_request(definition, id, condition.as_ref())?;
                    delete.return_values = Default::default();
                    TransactWriteItem::Delete(delete)
                }
                TransactionWriteRequest::DeleteChild {
                    id,
                    parent_id,
                    condition,
                    ..
                } => {
                    let mut delete = build_delete_child_request(
                        definition,
                        id,
                        parent_id,
                        condition.as_ref(),
                    )?;
                    delete.return_values = Default::default();
                    TransactWriteItem::Delete(delete)
                }
            };
            Ok(item)
        })
        .collect()
}

/// Map a backend failure to the transaction taxonomy. Anything that is not
/// transaction-specific passes through unchanged.
pub(crate) fn map_transaction_error(err: BackendError, token: Option<&str>) -> Error {
    let token = token.map(str::to_string);
    match err {
        BackendError::TransactionValidation { message } => {
            TransactionError::Validation { message }.into()
        }
        BackendError::TransactionCanceled { message, reasons } => {
            TransactionError::Canceled { message, reasons }.into()
        }
        BackendError::TransactionConflict { message } => {
            TransactionError::Conflict { message }.into()
        }
        BackendError::IdempotentParameterMismatch { message } => {
            TransactionError::IdempotentParameterMismatch { token, message }.into()
        }
        BackendError::TransactionInProgress { message } => {
            TransactionError::InProgress { token, message }.into()
        }
        other => Error::Backend(other),
    }
}
