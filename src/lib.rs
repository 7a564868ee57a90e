// ============================================================================
// uowkv Library
// ============================================================================
//
// Unit of work for entities stored in a key/value store with conditional
// writes and bounded atomic transactions.
//
//   EntityManager ──flush()──> Flusher ──> KeyValueStore
//        │                       ├─ ParallelFlusher
//        └─ TrackedSet           └─ TransactionalFlusher
//
// ============================================================================

pub mod config;
pub mod core;
pub mod flusher;
pub mod manager;
pub mod storage;
pub mod tracked;

pub use config::{
    ManagerConfig, MemoryStoreConfig, OverflowPolicy, TableConfig, TableRegistry, TableSchema,
    TransactionalConfig,
};
pub use core::{
    AttributeMap, EntityId, ItemKey, KeySchema, Result, Shared, StoreError, UowError,
    WriteFailure, shared,
};
pub use flusher::{FlushReport, Flusher, ParallelFlusher, TransactionalFlusher};
pub use manager::{EntityManager, FlushEvent, OverflowDecision};
pub use storage::{
    Condition, DeleteRequest, KeyValueStore, MemoryStore, PutRequest, StoreResult, WriteOperation,
};
pub use tracked::TrackedState;

/// Convenient imports for application code
pub mod prelude {
    pub use crate::{
        EntityManager, FlushEvent, KeySchema, MemoryStore, ParallelFlusher, Shared, TableConfig,
        TableRegistry, TransactionalConfig, TransactionalFlusher, UowError, shared,
    };
}
