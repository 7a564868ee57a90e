// ============================================================================
// Configuration
// ============================================================================
//
// Table registry plus builder-style tuning for the manager, the transactional
// flusher and the in-memory store.
//
// ============================================================================

pub mod table;

pub use table::{MarshalFn, TableConfig, TableRegistry, TableSchema, to_attribute_map};

use crate::flusher::Flusher;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// DynamoDB's per-transaction item ceiling.
pub const DEFAULT_TRANSACTION_ITEMS: usize = 25;

/// EntityManager configuration
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Capacity of the event broadcast channel. Slow subscribers that fall
    /// further behind than this miss events.
    pub event_capacity: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self { event_capacity: 64 }
    }
}

impl ManagerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the event channel capacity
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }
}

/// What a transactional flush does when its operations exceed `max_items`.
#[derive(Clone, Default)]
pub enum OverflowPolicy {
    /// Fail with `TransactionItemsLimitReached` without writing anything.
    #[default]
    Reject,
    /// Hand the whole tracked set to another flusher, giving up atomicity.
    Fallback(Arc<dyn Flusher>),
    /// Apply sequential transactions of at most `max_items` operations.
    /// Atomicity holds within a chunk only.
    Chunk,
}

impl fmt::Debug for OverflowPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverflowPolicy::Reject => write!(f, "Reject"),
            OverflowPolicy::Fallback(_) => write!(f, "Fallback(..)"),
            OverflowPolicy::Chunk => write!(f, "Chunk"),
        }
    }
}

/// TransactionalFlusher configuration
#[derive(Debug, Clone)]
pub struct TransactionalConfig {
    /// Maximum operations per atomic transaction
    pub max_items: usize,

    /// Behavior when a flush needs more than `max_items` operations
    pub overflow: OverflowPolicy,
}

impl Default for TransactionalConfig {
    fn default() -> Self {
        Self {
            max_items: DEFAULT_TRANSACTION_ITEMS,
            overflow: OverflowPolicy::Reject,
        }
    }
}

impl TransactionalConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-transaction item limit
    pub fn max_items(mut self, max_items: usize) -> Self {
        self.max_items = max_items.max(1);
        self
    }

    /// Delegate oversized flushes to `flusher`
    pub fn fallback(mut self, flusher: Arc<dyn Flusher>) -> Self {
        self.overflow = OverflowPolicy::Fallback(flusher);
        self
    }

    /// Split oversized flushes into sequential transactions
    pub fn chunked(mut self) -> Self {
        self.overflow = OverflowPolicy::Chunk;
        self
    }
}

/// MemoryStore configuration
#[derive(Debug, Clone)]
pub struct MemoryStoreConfig {
    /// Maximum operations accepted by one `transact_write` call
    pub max_transaction_items: usize,

    /// Artificial delay applied to every call
    pub latency: Option<Duration>,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            max_transaction_items: 100,
            latency: None,
        }
    }
}

impl MemoryStoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the store's own transaction ceiling
    pub fn max_transaction_items(mut self, max: usize) -> Self {
        self.max_transaction_items = max;
        self
    }

    /// Delay every call by `latency`
    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }
}
