//! An in-process [`Backend`] with DynamoDB transaction semantics.
//!
//! Tables must be created before use. All state sits behind one mutex, so
//! every call (including a whole transaction) is applied atomically with
//! respect to every other call. Idempotency tokens are remembered for
//! [`IDEMPOTENCY_WINDOW`].

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use crate::collection::CollectionLayout;
use crate::condition::CompiledCondition;
use crate::types::{Item, MAX_TRANSACT_GET_ITEMS, MAX_TRANSACT_WRITE_ITEMS};

use super::expression;
use super::{
    Backend, BackendError, CancellationCode, CancellationReason, ConsumedCapacity, DeleteRequest,
    GetRequest, ItemCollectionMetrics, PutRequest, ReturnConsumedCapacity,
    ReturnItemCollectionMetrics, ReturnValues, TransactWriteInput, TransactWriteItem,
    TransactWriteOutput,
};

/// How long a transaction's idempotency token is remembered.
pub const IDEMPOTENCY_WINDOW: Duration = Duration::from_secs(10 * 60);

/// Write capacity charged per transactional write item.
const TRANSACT_WRITE_UNITS_PER_ITEM: f64 = 2.0;

/// A table's primary key rendered as comparable strings.
type ItemKey = (String, String);

struct MemoryTable {
    partition_key: String,
    sort_key: Option<String>,
    items: BTreeMap<ItemKey, Item>,
}

impl MemoryTable {
    fn key_of(&self, attributes: &Item) -> Result<ItemKey, BackendError> {
        let pk = render_key_attribute(attributes, &self.partition_key)?;
        let sk = match &self.sort_key {
            Some(name) => render_key_attribute(attributes, name)?,
            None => String::new(),
        };
        Ok((pk, sk))
    }
}

fn render_key_attribute(attributes: &Item, name: &str) -> Result<String, BackendError> {
    match attributes.get(name) {
        Some(Value::String(s)) if !s.is_empty() => Ok(format!("S:{s}")),
        Some(Value::Number(n)) => Ok(format!("N:{n}")),
        Some(_) => Err(BackendError::validation(format!(
            "key attribute '{name}' must be a non-empty string or a number"
        ))),
        None => Err(BackendError::validation(format!(
            "missing key attribute '{name}'"
        ))),
    }
}

struct TokenRecord {
    items: Vec<TransactWriteItem>,
    recorded_at: Instant,
    output: TransactWriteOutput,
}

#[derive(Default)]
struct MemoryState {
    tables: HashMap<String, MemoryTable>,
    tokens: HashMap<String, TokenRecord>,
}

impl MemoryState {
    fn table(&self, name: &str) -> Result<&MemoryTable, BackendError> {
        self.tables
            .get(name)
            .ok_or_else(|| BackendError::ResourceNotFound {
                message: format!("table not found: {name}"),
            })
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut MemoryTable, BackendError> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| BackendError::ResourceNotFound {
                message: format!("table not found: {name}"),
            })
    }
}

/// An in-memory backend. Cheaply clonable; clones share state.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table keyed by the given attribute names.
    pub fn create_table(
        &self,
        name: &str,
        partition_key: &str,
        sort_key: Option<&str>,
    ) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        if state.tables.contains_key(name) {
            return Err(BackendError::Service {
                code: "ResourceInUseException".to_string(),
                message: format!("table already exists: {name}"),
            });
        }
        state.tables.insert(
            name.to_string(),
            MemoryTable {
                partition_key: partition_key.to_string(),
                sort_key: sort_key.map(str::to_string),
                items: BTreeMap::new(),
            },
        );
        debug!(table = name, "memory table created");
        Ok(())
    }

    /// Create the table described by a collection layout, if it is missing.
    pub fn ensure_table(&self, layout: &CollectionLayout) -> Result<(), BackendError> {
        if self.state.lock().tables.contains_key(&layout.table_name) {
            return Ok(());
        }
        self.create_table(
            &layout.table_name,
            &layout.primary_key.partition_key,
            Some(&layout.primary_key.sort_key),
        )
    }

    /// Every item in a table, in key order.
    pub fn scan(&self, table: &str) -> Result<Vec<Item>, BackendError> {
        let state = self.state.lock();
        Ok(state.table(table)?.items.values().cloned().collect())
    }

    pub fn item_count(&self, table: &str) -> Result<usize, BackendError> {
        let state = self.state.lock();
        Ok(state.table(table)?.items.len())
    }

    fn put_sync(&self, request: PutRequest) -> Result<Option<Item>, BackendError> {
        let return_values = request.return_values;
        let mut state = self.state.lock();
        let table = state.table_mut(&request.table_name)?;
        let key = table.key_of(&request.item)?;
        let existing = table.items.get(&key);
        check_condition(request.condition.as_ref(), existing)?;

        let old = table.items.insert(key, request.item);
        Ok(old.filter(|_| return_values == ReturnValues::AllOld))
    }

    fn delete_sync(&self, request: DeleteRequest) -> Result<Option<Item>, BackendError> {
        let return_values = request.return_values;
        let mut state = self.state.lock();
        let table = state.table_mut(&request.table_name)?;
        let key = table.key_of(&request.key)?;
        let existing = table.items.get(&key);
        check_condition(request.condition.as_ref(), existing)?;

        let old = table.items.remove(&key);
        Ok(old.filter(|_| return_values == ReturnValues::AllOld))
    }

    fn get_one_sync(&self, request: &GetRequest) -> Result<Option<Item>, BackendError> {
        let state = self.state.lock();
        Self::get_sync(&state, request)
    }

    fn get_sync(state: &MemoryState, request: &GetRequest) -> Result<Option<Item>, BackendError> {
        let table = state.table(&request.table_name)?;
        let key = table.key_of(&request.key)?;
        Ok(table.items.get(&key).cloned())
    }

    fn transact_get_sync(&self, requests: Vec<GetRequest>) -> Result<Vec<Option<Item>>, BackendError> {
        if requests.is_empty() || requests.len() > MAX_TRANSACT_GET_ITEMS {
            return Err(BackendError::validation(format!(
                "transactional reads accept 1 to {MAX_TRANSACT_GET_ITEMS} items, got {}",
                requests.len()
            )));
        }
        let state = self.state.lock();
        requests
            .iter()
            .map(|request| Self::get_sync(&state, request))
            .collect()
    }

    fn transact_write_sync(
        &self,
        input: TransactWriteInput,
    ) -> Result<TransactWriteOutput, BackendError> {
        if input.items.is_empty() || input.items.len() > MAX_TRANSACT_WRITE_ITEMS {
            return Err(BackendError::validation(format!(
                "transactional writes accept 1 to {MAX_TRANSACT_WRITE_ITEMS} items, got {}",
                input.items.len()
            )));
        }

        let mut state = self.state.lock();
        let now = Instant::now();
        state
            .tokens
            .retain(|_, record| now.duration_since(record.recorded_at) < IDEMPOTENCY_WINDOW);

        if let Some(token) = &input.client_request_token
            && let Some(record) = state.tokens.get(token)
        {
            if record.items == input.items {
                debug!(token = %token, "idempotent transaction replay");
                return Ok(record.output.clone());
            }
            return Err(BackendError::IdempotentParameterMismatch {
                message: format!(
                    "idempotency token {token} was used with a different set of items"
                ),
            });
        }

        // Resolve every target key and reject duplicate targets.
        let mut targets = Vec::with_capacity(input.items.len());
        let mut seen = HashSet::new();
        for item in &input.items {
            let table = state.table(item.table_name())?;
            let key = match item {
                TransactWriteItem::Put(put) => table.key_of(&put.item)?,
                TransactWriteItem::Delete(delete) => table.key_of(&delete.key)?,
            };
            if !seen.insert((item.table_name().to_string(), key.clone())) {
                return Err(BackendError::TransactionValidation {
                    message: "Transaction request cannot include multiple operations on one item"
                        .to_string(),
                });
            }
            targets.push(key);
        }

        // Evaluate every condition before applying anything.
        let mut reasons = Vec::with_capacity(input.items.len());
        let mut canceled = false;
        for (item, key) in input.items.iter().zip(&targets) {
            let existing = state.table(item.table_name())?.items.get(key);
            let passed = match item.condition() {
                Some(condition) => expression::evaluate(condition, existing)?,
                None => true,
            };
            if passed {
                reasons.push(CancellationReason::none());
            } else {
                canceled = true;
                reasons.push(CancellationReason {
                    code: CancellationCode::ConditionalCheckFailed,
                    message: Some("The conditional request failed".to_string()),
                    item: existing.cloned(),
                });
            }
        }
        if canceled {
            let codes: Vec<&str> = reasons.iter().map(|r| r.code.as_str()).collect();
            return Err(BackendError::TransactionCanceled {
                message: format!(
                    "Transaction cancelled, please refer cancellation reasons for specific reasons [{}]",
                    codes.join(", ")
                ),
                reasons,
            });
        }

        let output = build_output(&state, &input, &targets)?;

        for (item, key) in input.items.iter().zip(targets) {
            let table = state.table_mut(item.table_name())?;
            match item {
                TransactWriteItem::Put(put) => {
                    table.items.insert(key, put.item.clone());
                }
                TransactWriteItem::Delete(_) => {
                    table.items.remove(&key);
                }
            }
        }

        if let Some(token) = input.client_request_token {
            state.tokens.insert(
                token,
                TokenRecord {
                    items: input.items,
                    recorded_at: now,
                    output: output.clone(),
                },
            );
        }

        Ok(output)
    }
}

fn check_condition(
    condition: Option<&CompiledCondition>,
    existing: Option<&Item>,
) -> Result<(), BackendError> {
    let Some(condition) = condition else {
        return Ok(());
    };
    if expression::evaluate(condition, existing)? {
        Ok(())
    } else {
        Err(BackendError::ConditionalCheckFailed {
            message: "The conditional request failed".to_string(),
        })
    }
}

fn build_output(
    state: &MemoryState,
    input: &TransactWriteInput,
    targets: &[ItemKey],
) -> Result<TransactWriteOutput, BackendError> {
    let mut output = TransactWriteOutput::default();

    if input.return_consumed_capacity != ReturnConsumedCapacity::None {
        let mut per_table: BTreeMap<&str, f64> = BTreeMap::new();
        for item in &input.items {
            *per_table.entry(item.table_name()).or_default() += TRANSACT_WRITE_UNITS_PER_ITEM;
        }
        output.consumed_capacity = per_table
            .into_iter()
            .map(|(table_name, capacity_units)| ConsumedCapacity {
                table_name: table_name.to_string(),
                capacity_units,
            })
            .collect();
    }

    if input.return_item_collection_metrics == ReturnItemCollectionMetrics::Size {
        for (item, key) in input.items.iter().zip(targets) {
            let table = state.table(item.table_name())?;
            let size_estimate_bytes = match item {
                TransactWriteItem::Put(put) => serde_json::to_vec(&put.item)
                    .map(|bytes| bytes.len())
                    .unwrap_or_default(),
                TransactWriteItem::Delete(_) => 0,
            };
            let mut item_collection_key = Item::new();
            let attributes = match item {
                TransactWriteItem::Put(put) => &put.item,
                TransactWriteItem::Delete(delete) => &delete.key,
            };
            if let Some(pk) = attributes.get(&table.partition_key) {
                item_collection_key.insert(table.partition_key.clone(), pk.clone());
            }
            debug!(table = item.table_name(), key = ?key, "collected item metrics");
            output
                .item_collection_metrics
                .entry(item.table_name().to_string())
                .or_default()
                .push(ItemCollectionMetrics {
                    item_collection_key,
                    size_estimate_bytes,
                });
        }
    }

    Ok(output)
}

impl Backend for MemoryBackend {
    async fn put_item(&self, request: PutRequest) -> Result<Option<Item>, BackendError> {
        self.put_sync(request)
    }

    async fn delete_item(&self, request: DeleteRequest) -> Result<Option<Item>, BackendError> {
        self.delete_sync(request)
    }

    async fn get_item(&self, request: GetRequest) -> Result<Option<Item>, BackendError> {
        self.get_one_sync(&request)
    }

    async fn transact_get(
        &self,
        requests: Vec<GetRequest>,
    ) -> Result<Vec<Option<Item>>, BackendError> {
        self.transact_get_sync(requests)
    }

    async fn transact_write(
        &self,
        input: TransactWriteInput,
    ) -> Result<TransactWriteOutput, BackendError> {
        self.transact_write_sync(input)
    }
}
