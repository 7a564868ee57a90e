use super::{FlushReport, Flusher, build_write};
use crate::config::{OverflowPolicy, TransactionalConfig};
use crate::core::{Result, UowError};
use crate::manager::{FlushEvent, FlushEvents, OverflowDecision};
use crate::storage::{KeyValueStore, WriteOperation};
use crate::tracked::CapturedItem;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{Instrument, Level, event, info_span};

/// Applies a flush as one atomic transaction.
///
/// When the operations do not fit in `max_items`, the configured
/// [`OverflowPolicy`] decides: reject before writing anything, delegate the
/// whole set to a fallback flusher, or split into sequential transactions.
/// Chunks run strictly one after another in tracking order; a failing chunk
/// stops the flush and earlier chunks stay applied.
pub struct TransactionalFlusher {
    store: Arc<dyn KeyValueStore>,
    config: TransactionalConfig,
}

impl TransactionalFlusher {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_config(store, TransactionalConfig::default())
    }

    pub fn with_config(store: Arc<dyn KeyValueStore>, config: TransactionalConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &TransactionalConfig {
        &self.config
    }

    /// Effective per-transaction limit; never zero.
    fn limit(&self) -> usize {
        self.config.max_items.max(1)
    }

    async fn apply_chunks(&self, mut remaining: Vec<WriteOperation>) -> Result<usize> {
        let limit = self.limit();
        let mut transactions = 0;
        while !remaining.is_empty() {
            let rest = remaining.split_off(remaining.len().min(limit));
            let chunk = std::mem::replace(&mut remaining, rest);
            let size = chunk.len();

            if let Err(err) = self.store.transact_write(chunk).await {
                event!(
                    Level::DEBUG,
                    chunk = transactions,
                    size,
                    error = %err,
                    "transaction chunk failed"
                );
                return Err(UowError::Flush(Arc::new(err)));
            }

            event!(Level::DEBUG, chunk = transactions, size, "transaction chunk applied");
            transactions += 1;
        }
        Ok(transactions)
    }
}

#[async_trait]
impl Flusher for TransactionalFlusher {
    async fn flush(&self, items: &[CapturedItem], events: &FlushEvents) -> Result<FlushReport> {
        let span = info_span!(
            "uow.flush.transactional",
            items = items.len(),
            limit = self.limit()
        );

        async move {
            let operations: Vec<WriteOperation> = items.iter().filter_map(build_write).collect();
            let written = operations.len();
            let skipped = items.len() - written;
            let limit = self.limit();

            if written > limit {
                match &self.config.overflow {
                    OverflowPolicy::Reject => {
                        event!(Level::WARN, attempted = written, limit, "transaction items limit reached");
                        return Err(UowError::TransactionItemsLimitReached {
                            attempted: written,
                            limit,
                        });
                    }
                    OverflowPolicy::Fallback(fallback) => {
                        event!(Level::WARN, attempted = written, limit, "delegating flush to fallback flusher");
                        events.emit(FlushEvent::LimitExceeded {
                            attempted: written,
                            limit,
                            decision: OverflowDecision::Fallback,
                        });
                        return fallback.flush(items, events).await;
                    }
                    OverflowPolicy::Chunk => {
                        event!(Level::WARN, attempted = written, limit, "splitting flush into chunks");
                        events.emit(FlushEvent::LimitExceeded {
                            attempted: written,
                            limit,
                            decision: OverflowDecision::Chunk,
                        });
                    }
                }
            }

            let transactions = self.apply_chunks(operations).await?;
            Ok(FlushReport {
                written,
                skipped,
                transactions,
            })
        }
        .instrument(span)
        .await
    }
}
