use super::value::ItemKey;
use std::sync::Arc;
use thiserror::Error;

/// Errors reported by a key/value store implementation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Conditional check failed on table '{table}' for key {key}")]
    ConditionalCheckFailed { table: String, key: ItemKey },

    #[error("Transaction canceled: conditional check failed for operations {failed_operations:?}")]
    TransactionCanceled { failed_operations: Vec<usize> },

    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// True when the store rejected a write because its condition did not hold.
    pub fn is_conditional_check_failed(&self) -> bool {
        matches!(
            self,
            StoreError::ConditionalCheckFailed { .. } | StoreError::TransactionCanceled { .. }
        )
    }
}

/// One failed write of a parallel flush.
#[derive(Debug, Clone)]
pub struct WriteFailure {
    pub table: String,
    pub key: ItemKey,
    pub error: Arc<StoreError>,
}

#[derive(Error, Debug, Clone)]
pub enum UowError {
    #[error("Key is in use in table '{table}': {key}")]
    KeyInUse { table: String, key: ItemKey },

    #[error("Table '{0}' is not registered")]
    UnknownTable(String),

    #[error("Table '{0}' is already registered")]
    TableExists(String),

    #[error("Table '{table}' is not configured for entity type {expected}")]
    EntityTypeMismatch { table: String, expected: &'static str },

    #[error("Entity in table '{table}' is missing key attribute '{attribute}'")]
    MissingKeyAttribute { table: String, attribute: String },

    #[error("Marshal error: {0}")]
    Marshal(String),

    #[error("A flush is already in progress")]
    FlushInProgress,

    #[error("Transactions accept a maximum of {limit} items, {attempted} provided")]
    TransactionItemsLimitReached { attempted: usize, limit: usize },

    #[error("Error flushing tracked items: {0}")]
    Flush(#[source] Arc<StoreError>),

    #[error("{} of {attempted} writes failed while flushing", failures.len())]
    PartialFlush {
        failures: Vec<WriteFailure>,
        attempted: usize,
    },

    #[error("Lock error: {0}")]
    LockError(String),

    #[error("Flush task aborted: {0}")]
    FlushAborted(String),
}

impl UowError {
    /// First underlying store error, if the failure came from the store.
    pub fn store_error(&self) -> Option<&Arc<StoreError>> {
        match self {
            UowError::Flush(err) => Some(err),
            UowError::PartialFlush { failures, .. } => failures.first().map(|f| &f.error),
            _ => None,
        }
    }

    /// True when the store rejected a conditional write (lost an optimistic
    /// concurrency race or created over an existing key).
    pub fn is_conflict(&self) -> bool {
        match self {
            UowError::Flush(err) => err.is_conditional_check_failed(),
            UowError::PartialFlush { failures, .. } => failures
                .iter()
                .any(|f| f.error.is_conditional_check_failed()),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, UowError>;

impl<T> From<std::sync::PoisonError<T>> for UowError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<StoreError> for UowError {
    fn from(err: StoreError) -> Self {
        Self::Flush(Arc::new(err))
    }
}

impl From<serde_json::Error> for UowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Marshal(err.to_string())
    }
}
