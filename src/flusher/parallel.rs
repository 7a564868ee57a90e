use super::{FlushReport, Flusher, build_write};
use crate::core::{Result, UowError, WriteFailure};
use crate::manager::FlushEvents;
use crate::storage::{KeyValueStore, StoreResult, WriteOperation};
use crate::tracked::CapturedItem;
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{Instrument, Level, event, info_span};

/// Writes every item independently and concurrently.
///
/// Waits for all writes, then reports every failed key at once. Writes that
/// succeeded stay applied.
pub struct ParallelFlusher {
    store: Arc<dyn KeyValueStore>,
}

impl ParallelFlusher {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    async fn write(&self, operation: WriteOperation) -> StoreResult<()> {
        match operation {
            WriteOperation::Put(put) => self.store.put(put).await,
            WriteOperation::Delete(delete) => self.store.delete(delete).await,
        }
    }
}

#[async_trait]
impl Flusher for ParallelFlusher {
    async fn flush(&self, items: &[CapturedItem], _events: &FlushEvents) -> Result<FlushReport> {
        let span = info_span!("uow.flush.parallel", items = items.len());

        async move {
            let mut skipped = 0;
            let mut writes = Vec::with_capacity(items.len());
            for captured in items {
                match build_write(captured) {
                    Some(operation) => writes.push((captured, operation)),
                    None => skipped += 1,
                }
            }

            let attempted = writes.len();
            let results = join_all(writes.into_iter().map(|(captured, operation)| async move {
                (captured, self.write(operation).await)
            }))
            .await;

            let failures: Vec<WriteFailure> = results
                .into_iter()
                .filter_map(|(captured, result)| {
                    result.err().map(|err| WriteFailure {
                        table: captured.schema().table_name.clone(),
                        key: captured.key().clone(),
                        error: Arc::new(err),
                    })
                })
                .collect();

            if !failures.is_empty() {
                for failure in &failures {
                    event!(
                        Level::DEBUG,
                        table = %failure.table,
                        key = %failure.key,
                        error = %failure.error,
                        "parallel write failed"
                    );
                }
                return Err(UowError::PartialFlush {
                    failures,
                    attempted,
                });
            }

            event!(Level::DEBUG, written = attempted, skipped, "parallel writes applied");
            Ok(FlushReport {
                written: attempted,
                skipped,
                transactions: 0,
            })
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TableConfig;
    use crate::core::{ItemKey, KeySchema, StoreError, shared};
    use crate::storage::MemoryStore;
    use crate::tracked::{CreatedItem, DeletedItem, TrackedItem, UpdatedItem, bind};
    use serde::Serialize;
    use serde_json::json;

    #[derive(Serialize)]
    struct Item {
        id: u32,
        label: String,
    }

    fn config() -> Arc<TableConfig<Item>> {
        Arc::new(TableConfig::new("items", KeySchema::hash("id")).versioned("v"))
    }

    fn store() -> Arc<MemoryStore> {
        Arc::new(MemoryStore::new().with_table("items", KeySchema::hash("id")))
    }

    fn created(id: u32) -> CapturedItem {
        let item = shared(Item {
            id,
            label: format!("item {}", id),
        });
        TrackedItem::Created(CreatedItem::new(bind(&item, config())))
            .capture()
            .unwrap()
    }

    #[tokio::test]
    async fn test_writes_every_item() {
        let store = store();
        let flusher = ParallelFlusher::new(store.clone());
        let items: Vec<_> = (0..5).map(created).collect();

        let report = flusher.flush(&items, &FlushEvents::new(4)).await.unwrap();
        assert_eq!(report.written, 5);
        assert_eq!(store.len("items").unwrap(), 5);
        assert_eq!(store.stats().puts, 5);
    }

    #[tokio::test]
    async fn test_skips_unchanged_and_deletes() {
        let store = store();
        let flusher = ParallelFlusher::new(store.clone());
        flusher
            .flush(&[created(1), created(2)], &FlushEvents::new(4))
            .await
            .unwrap();

        let one = shared(Item {
            id: 1,
            label: "item 1".into(),
        });
        let two = shared(Item {
            id: 2,
            label: "item 2".into(),
        });
        let items = vec![
            TrackedItem::Updated(UpdatedItem::new(bind(&one, config()), Some(0)).unwrap())
                .capture()
                .unwrap(),
            TrackedItem::Deleted(DeletedItem::new(bind(&two, config()), None))
                .capture()
                .unwrap(),
        ];

        let report = flusher.flush(&items, &FlushEvents::new(4)).await.unwrap();
        assert_eq!(report.written, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(store.len("items").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_collects_every_failure() {
        let store = store();
        let flusher = ParallelFlusher::new(store.clone());
        flusher
            .flush(&[created(1)], &FlushEvents::new(4))
            .await
            .unwrap();

        store.fail_on_key("items", ItemKey::new(json!(2), None), StoreError::Unavailable("boom".into()));
        let err = flusher
            .flush(&[created(1), created(2), created(3)], &FlushEvents::new(4))
            .await
            .unwrap_err();

        let UowError::PartialFlush { failures, attempted } = err else {
            panic!("expected a partial flush error");
        };
        assert_eq!(attempted, 3);
        assert_eq!(failures.len(), 2);
        assert!(failures.iter().any(|f| f.error.is_conditional_check_failed()));
        assert!(
            failures
                .iter()
                .any(|f| *f.error == StoreError::Unavailable("boom".into()))
        );
        assert!(store.get("items", &ItemKey::new(json!(3), None)).unwrap().is_some());
    }
}
