//! Public API: the collection context, single-item operations, and transactional writes.

pub mod context;
pub mod operations;
pub mod transaction;

pub use context::Context;
pub use operations::{
    FindDescriptor, build_delete_child_request, build_delete_request, build_get_request,
    build_insert_request, build_replace_request, compile_value_condition,
};
pub use transaction::{
    TransactWriteOptions, TransactionState, TransactionWrite, TransactionWriteRequest,
    build_transact_items,
};
