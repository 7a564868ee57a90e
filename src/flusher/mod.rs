// ============================================================================
// Flushers
// ============================================================================
//
// A flusher turns one flush cycle's captured items into store writes.
//
// - ParallelFlusher: independent conditional writes, all in flight at once,
//   no cross-item atomicity.
// - TransactionalFlusher: one atomic transaction bounded by an item limit,
//   with a configurable overflow policy.
//
// ============================================================================

pub mod parallel;
pub mod transactional;
pub mod version;

pub use parallel::ParallelFlusher;
pub use transactional::TransactionalFlusher;
pub use version::build_write;

use crate::core::Result;
use crate::manager::FlushEvents;
use crate::tracked::CapturedItem;
use async_trait::async_trait;

/// Outcome of a successful flush cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Puts and deletes applied
    pub written: usize,
    /// Updated items skipped because they had not changed
    pub skipped: usize,
    /// Atomic transactions issued
    pub transactions: usize,
}

#[async_trait]
pub trait Flusher: Send + Sync {
    /// Performs every pending write for `items`. Items come in tracking order.
    async fn flush(&self, items: &[CapturedItem], events: &FlushEvents) -> Result<FlushReport>;
}
