//! Integration tests: collections over the in-memory backend and a scripted backend.

use std::future::Future;

use parking_lot::Mutex;
use serde_json::{Value, json};

use ferridyn_collections::api::{
    Context, FindDescriptor, TransactWriteOptions, TransactionState, TransactionWriteRequest,
};
use ferridyn_collections::backend::{
    Backend, BackendError, CancellationCode, DeleteRequest, GetRequest, MemoryBackend,
    PutRequest, ReturnConsumedCapacity, ReturnItemCollectionMetrics, TransactWriteInput,
    TransactWriteOutput,
};
use ferridyn_collections::collection::{AccessPattern, CollectionDefinition, CollectionLayout};
use ferridyn_collections::condition::CompositeCondition;
use ferridyn_collections::error::{Error, TransactionError, ValidationError, WriteError};
use ferridyn_collections::types::Item;

const TABLE: &str = "global";

fn layout() -> CollectionLayout {
    CollectionLayout::new(TABLE)
        .find_key("gs1", "gs1p", Some("gs1s"))
        .ttl_attribute("expiresAt")
}

fn definitions() -> Vec<CollectionDefinition> {
    vec![
        CollectionDefinition::root("users", layout())
            .access_pattern(
                AccessPattern::new("gs1")
                    .partition_keys(["email"])
                    .sort_keys(["name"]),
            )
            .ttl_key_path("expiresAt")
            .build()
            .unwrap(),
        CollectionDefinition::child("addresses", layout(), "users", "userId")
            .build()
            .unwrap(),
    ]
}

fn memory_context() -> Context<MemoryBackend> {
    let backend = MemoryBackend::new();
    backend.ensure_table(&layout()).unwrap();
    Context::new(backend, definitions()).unwrap()
}

fn stored_items(ctx: &Context<MemoryBackend>) -> Vec<Item> {
    ctx.backend().scan(TABLE).unwrap()
}

// ---------------------------------------------------------------------------
// Single-item operations
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_replace_then_find() {
    let ctx = memory_context();
    let doc = json!({"_id": "u1", "email": "alice@example.com", "name": "Alice"});

    let stored = ctx.replace("users", &doc, None).await.unwrap();
    assert_eq!(stored, doc);

    let found = ctx.find_by_id("users", "u1").await.unwrap();
    assert_eq!(found, Some(doc));

    let items = stored_items(&ctx);
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["id"], json!("users|-|u1"));
    assert_eq!(items[0]["sid"], json!("users|-|u1"));
    assert_eq!(items[0]["gs1p"], json!("users|-|alice@example.com"));
    assert_eq!(items[0]["gs1s"], json!("users|-|Alice"));
    assert_eq!(items[0]["type"], json!("users"));
}

#[tokio::test]
async fn test_replace_generates_missing_id() {
    let ctx = memory_context();
    let stored = ctx
        .replace("users", &json!({"email": "bob@example.com"}), None)
        .await
        .unwrap();
    let id = stored["_id"].as_str().unwrap();
    assert!(!id.is_empty());

    let found = ctx.find_by_id("users", id).await.unwrap().unwrap();
    assert_eq!(found["email"], json!("bob@example.com"));
}

#[tokio::test]
async fn test_replace_recomputes_index_keys() {
    let ctx = memory_context();
    ctx.replace(
        "users",
        &json!({"_id": "u1", "email": "a@example.com", "name": "A"}),
        None,
    )
    .await
    .unwrap();
    ctx.replace("users", &json!({"_id": "u1", "email": "b@example.com"}), None)
        .await
        .unwrap();

    let items = stored_items(&ctx);
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["gs1p"], json!("users|-|b@example.com"));
    // Sort keys with no values are omitted rather than kept stale.
    assert!(!items[0].contains_key("gs1s"));
    assert_eq!(
        items[0]["value"],
        json!({"_id": "u1", "email": "b@example.com"})
    );

    ctx.replace("users", &json!({"_id": "u1"}), None)
        .await
        .unwrap();
    let items = stored_items(&ctx);
    assert_eq!(items[0]["gs1p"], json!("users"));
}

#[tokio::test]
async fn test_replace_writes_ttl_seconds() {
    let ctx = memory_context();
    ctx.replace(
        "users",
        &json!({"_id": "u1", "expiresAt": "2021-01-01T00:00:00.500Z"}),
        None,
    )
    .await
    .unwrap();
    let items = stored_items(&ctx);
    assert_eq!(items[0]["expiresAt"], json!(1609459201));
}

#[tokio::test]
async fn test_replace_rejects_invalid_documents() {
    let ctx = memory_context();

    let err = ctx
        .replace("users", &json!({"_id": 7}), None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Validation(ValidationError::InvalidId { .. })
    ));

    let err = ctx
        .replace("users", &json!({"_id": "u1", "email": {"nested": true}}), None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Validation(ValidationError::InvalidIndexedFieldValue { .. })
    ));

    let err = ctx
        .replace("addresses", &json!({"_id": "a1"}), None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Validation(ValidationError::InvalidParentId { .. })
    ));

    assert!(stored_items(&ctx).is_empty());
}

#[tokio::test]
async fn test_conditional_replace() {
    let ctx = memory_context();
    ctx.replace("users", &json!({"_id": "u1", "version": 1}), None)
        .await
        .unwrap();

    let condition = CompositeCondition::eq("version", 1);
    ctx.replace(
        "users",
        &json!({"_id": "u1", "version": 2}),
        Some(&condition),
    )
    .await
    .unwrap();

    // The stored version is now 2, so the same condition fails.
    let err = ctx
        .replace(
            "users",
            &json!({"_id": "u1", "version": 3}),
            Some(&condition),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Backend(BackendError::ConditionalCheckFailed { .. })
    ));

    let found = ctx.find_by_id("users", "u1").await.unwrap().unwrap();
    assert_eq!(found["version"], json!(2));
}

#[tokio::test]
async fn test_insert_rejects_existing() {
    let ctx = memory_context();
    ctx.insert("users", &json!({"_id": "u1", "name": "first"}))
        .await
        .unwrap();

    let err = ctx
        .insert("users", &json!({"_id": "u1", "name": "second"}))
        .await
        .unwrap_err();
    match err {
        Error::Write(WriteError::AlreadyExists { collection, id }) => {
            assert_eq!(collection, "users");
            assert_eq!(id, "u1");
        }
        other => panic!("expected AlreadyExists, got {other:?}"),
    }

    let found = ctx.find_by_id("users", "u1").await.unwrap().unwrap();
    assert_eq!(found["name"], json!("first"));
}

#[tokio::test]
async fn test_delete_returns_old_document() {
    let ctx = memory_context();
    let doc = json!({"_id": "u1", "name": "Alice"});
    ctx.replace("users", &doc, None).await.unwrap();

    let old = ctx.delete_by_id("users", "u1", None).await.unwrap();
    assert_eq!(old, Some(doc));
    assert_eq!(ctx.find_by_id("users", "u1").await.unwrap(), None);

    let again = ctx.delete_by_id("users", "u1", None).await.unwrap();
    assert_eq!(again, None);
}

#[tokio::test]
async fn test_conditional_delete() {
    let ctx = memory_context();
    ctx.replace("users", &json!({"_id": "u1", "locked": true}), None)
        .await
        .unwrap();

    let err = ctx
        .delete_by_id(
            "users",
            "u1",
            Some(&CompositeCondition::ne("locked", true)),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Backend(BackendError::ConditionalCheckFailed { .. })
    ));
    assert!(ctx.find_by_id("users", "u1").await.unwrap().is_some());
}

#[tokio::test]
async fn test_child_documents_live_under_parent() {
    let ctx = memory_context();
    ctx.replace("users", &json!({"_id": "u1"}), None)
        .await
        .unwrap();
    let address = json!({"_id": "a1", "userId": "u1", "city": "Sydney"});
    ctx.replace("addresses", &address, None).await.unwrap();

    let items = stored_items(&ctx);
    let child = items
        .iter()
        .find(|item| item["type"] == json!("addresses"))
        .unwrap();
    assert_eq!(child["id"], json!("users|-|u1"));
    assert_eq!(child["sid"], json!("addresses|-|a1"));

    let found = ctx.find_child_by_id("addresses", "a1", "u1").await.unwrap();
    assert_eq!(found, Some(address.clone()));
    assert_eq!(
        ctx.find_child_by_id("addresses", "a1", "u2").await.unwrap(),
        None
    );

    let old = ctx
        .delete_child_by_id("addresses", "a1", "u1", None)
        .await
        .unwrap();
    assert_eq!(old, Some(address));
    assert_eq!(
        ctx.find_child_by_id("addresses", "a1", "u1").await.unwrap(),
        None
    );
}

#[tokio::test]
async fn test_child_lookup_requires_parent() {
    let ctx = memory_context();
    let err = ctx.find_by_id("addresses", "a1").await.unwrap_err();
    assert!(matches!(
        err,
        Error::Validation(ValidationError::InvalidParentId { .. })
    ));

    let err = ctx
        .find_child_by_id("addresses", "a1", "")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Validation(ValidationError::InvalidParentId { .. })
    ));
}

#[tokio::test]
async fn test_unknown_collection() {
    let ctx = memory_context();
    let err = ctx.find_by_id("nope", "x").await.unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[tokio::test]
async fn test_missing_table_is_resource_not_found() {
    let ctx = Context::new(MemoryBackend::new(), definitions()).unwrap();
    let err = ctx.find_by_id("users", "u1").await.unwrap_err();
    assert!(matches!(
        err,
        Error::Backend(BackendError::ResourceNotFound { .. })
    ));
}

// ---------------------------------------------------------------------------
// Transactional reads
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_transact_find_is_positional() {
    let ctx = memory_context();
    ctx.replace("users", &json!({"_id": "u1"}), None)
        .await
        .unwrap();
    ctx.replace("addresses", &json!({"_id": "a1", "userId": "u1"}), None)
        .await
        .unwrap();

    let found = ctx
        .transact_find_by_ids(&[
            FindDescriptor::new("users", "missing"),
            FindDescriptor::child("addresses", "a1", "u1"),
            FindDescriptor::new("users", "u1"),
        ])
        .await
        .unwrap();
    assert_eq!(found.len(), 3);
    assert_eq!(found[0], None);
    assert_eq!(found[1].as_ref().unwrap()["_id"], json!("a1"));
    assert_eq!(found[2].as_ref().unwrap()["_id"], json!("u1"));
}

#[tokio::test]
async fn test_transact_find_bounds() {
    let ctx = memory_context();

    let err = ctx.transact_find_by_ids(&[]).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Validation(ValidationError::InvalidFindDescriptor(_))
    ));

    let descriptors: Vec<_> = (0..26)
        .map(|i| FindDescriptor::new("users", &format!("u{i}")))
        .collect();
    let err = ctx.transact_find_by_ids(&descriptors).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Validation(ValidationError::InvalidFindDescriptor(_))
    ));

    let found = ctx.transact_find_by_ids(&descriptors[..25]).await.unwrap();
    assert!(found.iter().all(Option::is_none));
}

// ---------------------------------------------------------------------------
// Transactional writes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_transaction_applies_all_writes() {
    let ctx = memory_context();
    ctx.replace("users", &json!({"_id": "old"}), None)
        .await
        .unwrap();

    let mut txn = ctx.transaction();
    txn.replace("users", json!({"_id": "u1", "name": "Alice"}))
        .replace("addresses", json!({"_id": "a1", "userId": "u1"}))
        .delete("users", "old");
    assert_eq!(txn.state(), TransactionState::Building);

    txn.execute().await.unwrap();
    assert_eq!(txn.state(), TransactionState::Committed);

    assert!(ctx.find_by_id("users", "u1").await.unwrap().is_some());
    assert!(
        ctx.find_child_by_id("addresses", "a1", "u1")
            .await
            .unwrap()
            .is_some()
    );
    assert_eq!(ctx.find_by_id("users", "old").await.unwrap(), None);

    // A transaction executes at most once.
    let err = txn.execute().await.unwrap_err();
    assert!(matches!(
        err,
        Error::Validation(ValidationError::InvalidArgument(_))
    ));
}

#[tokio::test]
async fn test_transaction_canceled_applies_nothing() {
    let ctx = memory_context();
    ctx.replace("users", &json!({"_id": "u1", "version": 1}), None)
        .await
        .unwrap();

    let requests = vec![
        TransactionWriteRequest::Replace {
            collection: "users".into(),
            value: json!({"_id": "u2"}),
            condition: None,
        },
        TransactionWriteRequest::Replace {
            collection: "users".into(),
            value: json!({"_id": "u1", "version": 5}),
            condition: Some(CompositeCondition::eq("version", 4)),
        },
    ];
    let err = ctx
        .transaction_write(requests, TransactWriteOptions::default())
        .await
        .unwrap_err();

    match err {
        Error::Transaction(TransactionError::Canceled { reasons, .. }) => {
            assert_eq!(reasons.len(), 2);
            assert_eq!(reasons[0].code, CancellationCode::None);
            assert_eq!(reasons[1].code, CancellationCode::ConditionalCheckFailed);
        }
        other => panic!("expected Canceled, got {other:?}"),
    }

    assert_eq!(ctx.find_by_id("users", "u2").await.unwrap(), None);
    let u1 = ctx.find_by_id("users", "u1").await.unwrap().unwrap();
    assert_eq!(u1["version"], json!(1));
}

#[tokio::test]
async fn test_transaction_duplicate_target_is_validation_error() {
    let ctx = memory_context();
    let mut txn = ctx.transaction();
    txn.replace("users", json!({"_id": "u1"})).delete("users", "u1");

    let err = txn.execute().await.unwrap_err();
    assert!(matches!(
        err,
        Error::Transaction(TransactionError::Validation { .. })
    ));
    assert_eq!(txn.state(), TransactionState::Rejected);
    assert!(stored_items(&ctx).is_empty());
}

#[tokio::test]
async fn test_transaction_bounds() {
    let ctx = memory_context();

    let err = ctx
        .transaction_write(Vec::new(), TransactWriteOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Validation(ValidationError::InvalidArgument(_))
    ));

    let requests: Vec<_> = (0..101)
        .map(|i| TransactionWriteRequest::Delete {
            collection: "users".into(),
            id: format!("u{i}"),
            condition: None,
        })
        .collect();
    let err = ctx
        .transaction_write(requests, TransactWriteOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Validation(ValidationError::InvalidFindDescriptor(_))
    ));
}

#[tokio::test]
async fn test_transaction_rejects_invalid_item_before_submitting() {
    let ctx = memory_context();
    let mut txn = ctx.transaction();
    txn.replace("users", json!({"_id": "u1"}))
        .replace("addresses", json!({"_id": "a1"}));

    let err = txn.execute().await.unwrap_err();
    assert!(matches!(
        err,
        Error::Validation(ValidationError::InvalidParentId { .. })
    ));
    assert_eq!(txn.state(), TransactionState::Building);
    assert!(stored_items(&ctx).is_empty());
}

#[tokio::test]
async fn test_idempotent_replay_and_mismatch() {
    let ctx = memory_context();
    let options = TransactWriteOptions {
        idempotency_token: Some("tok-1".to_string()),
        return_consumed_capacity: ReturnConsumedCapacity::Total,
        return_item_collection_metrics: ReturnItemCollectionMetrics::None,
    };
    let requests = || {
        vec![TransactionWriteRequest::Replace {
            collection: "users".into(),
            value: json!({"_id": "u1", "n": 1}),
            condition: None,
        }]
    };

    let first = ctx
        .transaction_write(requests(), options.clone())
        .await
        .unwrap();
    assert_eq!(first.consumed_capacity.len(), 1);
    assert_eq!(first.consumed_capacity[0].table_name, TABLE);

    // Change the stored document behind the transaction's back; a replay
    // under the same token must not reapply the write.
    ctx.replace("users", &json!({"_id": "u1", "n": 2}), None)
        .await
        .unwrap();
    let replay = ctx
        .transaction_write(requests(), options.clone())
        .await
        .unwrap();
    assert_eq!(replay, first);
    let u1 = ctx.find_by_id("users", "u1").await.unwrap().unwrap();
    assert_eq!(u1["n"], json!(2));

    let different = vec![TransactionWriteRequest::Delete {
        collection: "users".into(),
        id: "u1".into(),
        condition: None,
    }];
    let err = ctx
        .transaction_write(different, options)
        .await
        .unwrap_err();
    match err {
        Error::Transaction(TransactionError::IdempotentParameterMismatch { token, .. }) => {
            assert_eq!(token.as_deref(), Some("tok-1"));
        }
        other => panic!("expected IdempotentParameterMismatch, got {other:?}"),
    }
}

#[tokio::test]
async fn test_transaction_item_collection_metrics() {
    let ctx = memory_context();
    let mut txn = ctx.transaction();
    txn.replace("users", json!({"_id": "u1"}))
        .replace("addresses", json!({"_id": "a1", "userId": "u1"}))
        .return_item_collection_metrics(ReturnItemCollectionMetrics::Size);
    let output = txn.execute().await.unwrap();

    let metrics = &output.item_collection_metrics[TABLE];
    assert!(!metrics.is_empty());
    assert!(
        metrics
            .iter()
            .all(|m| m.item_collection_key["id"] == json!("users|-|u1"))
    );
}

#[tokio::test]
async fn test_round_trip_through_transactions() {
    let ctx = memory_context();
    let docs: Vec<Value> = (0..5)
        .map(|i| json!({"_id": format!("u{i}"), "email": format!("u{i}@example.com"), "n": i}))
        .collect();

    let mut txn = ctx.transaction();
    for doc in &docs {
        txn.replace("users", doc.clone());
    }
    txn.execute().await.unwrap();

    let descriptors: Vec<_> = (0..5)
        .map(|i| FindDescriptor::new("users", &format!("u{i}")))
        .collect();
    let found = ctx.transact_find_by_ids(&descriptors).await.unwrap();
    let found: Vec<Value> = found.into_iter().map(Option::unwrap).collect();
    assert_eq!(found, docs);
}

// ---------------------------------------------------------------------------
// Error mapping with a scripted backend
// ---------------------------------------------------------------------------

/// Fails every transactional write with a preset error.
struct ScriptedBackend {
    transact_error: Mutex<Option<BackendError>>,
    submissions: Mutex<Vec<TransactWriteInput>>,
}

impl ScriptedBackend {
    fn failing_with(err: BackendError) -> Self {
        Self {
            transact_error: Mutex::new(Some(err)),
            submissions: Mutex::new(Vec::new()),
        }
    }

    fn unsupported() -> BackendError {
        BackendError::Service {
            code: "UnsupportedOperation".to_string(),
            message: "scripted backend".to_string(),
        }
    }
}

impl Backend for ScriptedBackend {
    fn put_item(
        &self,
        _request: PutRequest,
    ) -> impl Future<Output = Result<Option<Item>, BackendError>> + Send {
        async { Err(Self::unsupported()) }
    }

    fn delete_item(
        &self,
        _request: DeleteRequest,
    ) -> impl Future<Output = Result<Option<Item>, BackendError>> + Send {
        async { Err(Self::unsupported()) }
    }

    fn get_item(
        &self,
        _request: GetRequest,
    ) -> impl Future<Output = Result<Option<Item>, BackendError>> + Send {
        async { Err(Self::unsupported()) }
    }

    fn transact_get(
        &self,
        _requests: Vec<GetRequest>,
    ) -> impl Future<Output = Result<Vec<Option<Item>>, BackendError>> + Send {
        async { Err(Self::unsupported()) }
    }

    fn transact_write(
        &self,
        input: TransactWriteInput,
    ) -> impl Future<Output = Result<TransactWriteOutput, BackendError>> + Send {
        self.submissions.lock().push(input);
        let result = match self.transact_error.lock().clone() {
            Some(err) => Err(err),
            None => Ok(TransactWriteOutput::default()),
        };
        async move { result }
    }
}

async fn submit_with(err: BackendError) -> (Error, Vec<TransactWriteInput>) {
    let ctx = Context::new(ScriptedBackend::failing_with(err), definitions()).unwrap();
    let mut txn = ctx.transaction();
    txn.replace("users", json!({"_id": "u1"}))
        .idempotency_token("tok-9");
    let err = txn.execute().await.unwrap_err();
    let submissions = std::mem::take(&mut *ctx.backend().submissions.lock());
    (err, submissions)
}

#[tokio::test]
async fn test_conflict_maps_to_transaction_conflict() {
    let (err, submissions) = submit_with(BackendError::from_service_error(
        "TransactionConflictException",
        "conflict",
    ))
    .await;
    assert!(matches!(
        err,
        Error::Transaction(TransactionError::Conflict { .. })
    ));
    assert_eq!(submissions.len(), 1);
    assert_eq!(
        submissions[0].client_request_token.as_deref(),
        Some("tok-9")
    );
}

#[tokio::test]
async fn test_in_progress_carries_token() {
    let (err, _) = submit_with(BackendError::from_service_error(
        "TransactionInProgressException",
        "still running",
    ))
    .await;
    match err {
        Error::Transaction(TransactionError::InProgress { token, message }) => {
            assert_eq!(token.as_deref(), Some("tok-9"));
            assert_eq!(message, "still running");
        }
        other => panic!("expected InProgress, got {other:?}"),
    }
}

#[tokio::test]
async fn test_other_backend_errors_pass_through() {
    let (err, _) = submit_with(BackendError::from_service_error(
        "ProvisionedThroughputExceededException",
        "slow down",
    ))
    .await;
    match err {
        Error::Backend(BackendError::Service { code, message }) => {
            assert_eq!(code, "ProvisionedThroughputExceededException");
            assert_eq!(message, "slow down");
        }
        other => panic!("expected Service error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_validation_failure_never_reaches_backend() {
    let ctx = Context::new(
        ScriptedBackend::failing_with(ScriptedBackend::unsupported()),
        definitions(),
    )
    .unwrap();
    let err = ctx
        .transaction_write(
            vec![TransactionWriteRequest::DeleteChild {
                collection: "addresses".into(),
                id: "a1".into(),
                parent_id: String::new(),
                condition: None,
            }],
            TransactWriteOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Validation(ValidationError::InvalidParentId { .. })
    ));
    assert!(ctx.backend().submissions.lock().is_empty());
}
