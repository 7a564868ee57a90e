// ============================================================================
// Store Boundary
// ============================================================================
//
// The key/value store capabilities the engine writes through: conditional
// put, conditional delete and a bounded all-or-nothing transaction.
//
// ============================================================================

pub mod condition;
pub mod memory;

pub use condition::{Condition, ConditionExpression};
pub use memory::{MemoryStore, StoreStats};

use crate::core::{AttributeMap, StoreError};
use async_trait::async_trait;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Clone, PartialEq)]
pub struct PutRequest {
    pub table_name: String,
    pub item: AttributeMap,
    pub condition: Option<Condition>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteRequest {
    pub table_name: String,
    /// Key attributes of the item to delete
    pub key: AttributeMap,
    pub condition: Option<Condition>,
}

/// One element of an atomic transaction
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOperation {
    Put(PutRequest),
    Delete(DeleteRequest),
}

impl WriteOperation {
    pub fn table_name(&self) -> &str {
        match self {
            WriteOperation::Put(put) => &put.table_name,
            WriteOperation::Delete(delete) => &delete.table_name,
        }
    }

    pub fn condition(&self) -> Option<&Condition> {
        match self {
            WriteOperation::Put(put) => put.condition.as_ref(),
            WriteOperation::Delete(delete) => delete.condition.as_ref(),
        }
    }
}

/// Key/value store client
///
/// Implementations map these calls onto their wire protocol. A failed
/// condition must surface as [`StoreError::ConditionalCheckFailed`] (or
/// [`StoreError::TransactionCanceled`] inside a transaction).
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn put(&self, request: PutRequest) -> StoreResult<()>;

    async fn delete(&self, request: DeleteRequest) -> StoreResult<()>;

    /// Applies every operation or none of them.
    async fn transact_write(&self, operations: Vec<WriteOperation>) -> StoreResult<()>;
}
