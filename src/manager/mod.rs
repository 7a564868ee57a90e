// ============================================================================
// Entity Manager
// ============================================================================
//
// Owns the tracked set and drives flush cycles:
//
//   Idle ──flush()──> Flushing(shared result) ──done──> Idle
//
// While Flushing, further flush() calls await the same in-flight result and
// every mutation of the tracked set fails with FlushInProgress. The flush
// runs as its own tokio task, so it completes even if every caller drops
// its future.
//
// On success each flushed item advances (Created -> Updated, Updated gets a
// fresh snapshot, Deleted leaves the set). On failure the tracked set is left
// exactly as it was.
//
// ============================================================================

pub mod events;

pub use events::{FlushEvent, FlushEvents, OverflowDecision};

use crate::config::{ManagerConfig, TableRegistry};
use crate::core::{EntityId, ItemKey, Result, Shared, UowError};
use crate::flusher::{FlushReport, Flusher};
use crate::tracked::{
    CapturedItem, CreatedItem, DeletedItem, TrackedItem, TrackedSet, TrackedState, UpdatedItem,
    bind,
};
use futures::future::{BoxFuture, FutureExt, Shared as SharedFuture};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::{Instrument, Level, event, info_span};

type PendingFlush = SharedFuture<BoxFuture<'static, Result<FlushReport>>>;

enum FlushState {
    Idle,
    Flushing(PendingFlush),
}

struct ManagerState {
    tracked: TrackedSet,
    flush: FlushState,
}

struct ManagerInner {
    flusher: Arc<dyn Flusher>,
    registry: TableRegistry,
    events: FlushEvents,
    state: Mutex<ManagerState>,
}

/// Unit of work over a key/value store.
///
/// Cloning is cheap; clones share the tracked set, the flush state and the
/// event channel.
#[derive(Clone)]
pub struct EntityManager {
    inner: Arc<ManagerInner>,
}

impl EntityManager {
    pub fn new(flusher: Arc<dyn Flusher>, registry: TableRegistry) -> Self {
        Self::with_config(flusher, registry, ManagerConfig::default())
    }

    pub fn with_config(
        flusher: Arc<dyn Flusher>,
        registry: TableRegistry,
        config: ManagerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                flusher,
                registry,
                events: FlushEvents::new(config.event_capacity),
                state: Mutex::new(ManagerState {
                    tracked: TrackedSet::new(),
                    flush: FlushState::Idle,
                }),
            }),
        }
    }

    /// Tracks an entity that already exists in the store. Its current state
    /// becomes the dirty-check baseline. No-op if the entity is tracked.
    pub fn track<E: Send + Sync + 'static>(
        &self,
        table: &str,
        entity: &Shared<E>,
        version: Option<u64>,
    ) -> Result<()> {
        let config = self.inner.registry.config::<E>(table)?;
        let item = TrackedItem::Updated(UpdatedItem::new(bind(entity, config), version)?);
        let mut state = self.inner.lock_idle()?;
        if state.tracked.contains(EntityId::of(entity)) {
            return Ok(());
        }

        insert_new(&mut state.tracked, item)
    }

    /// Tracks an entity to be created on the next flush. No-op if the entity
    /// is tracked.
    pub fn track_new<E: Send + Sync + 'static>(&self, table: &str, entity: &Shared<E>) -> Result<()> {
        let config = self.inner.registry.config::<E>(table)?;
        let mut state = self.inner.lock_idle()?;
        if state.tracked.contains(EntityId::of(entity)) {
            return Ok(());
        }

        let item = TrackedItem::Created(CreatedItem::new(bind(entity, config)));
        insert_new(&mut state.tracked, item)
    }

    /// Marks an entity for deletion. A never-flushed Created entity is simply
    /// forgotten; any other tracked entity keeps its known version.
    pub fn delete<E: Send + Sync + 'static>(&self, table: &str, entity: &Shared<E>) -> Result<()> {
        let config = self.inner.registry.config::<E>(table)?;
        let mut state = self.inner.lock_idle()?;
        let id = EntityId::of(entity);

        let existing = state.tracked.get(id).map(|item| (item.state(), item.version()));
        match existing {
            Some((TrackedState::Created, _)) => {
                state.tracked.remove(id);
                Ok(())
            }
            Some((_, version)) => {
                state
                    .tracked
                    .insert(TrackedItem::Deleted(DeletedItem::new(bind(entity, config), version)));
                Ok(())
            }
            None => {
                let item = TrackedItem::Deleted(DeletedItem::new(bind(entity, config), None));
                insert_new(&mut state.tracked, item)
            }
        }
    }

    /// Forgets every tracked entity without touching the store.
    pub fn clear(&self) -> Result<()> {
        self.inner.lock_idle()?.tracked.clear();
        Ok(())
    }

    pub fn key_is_tracked(&self, table: &str, key: &ItemKey) -> Result<bool> {
        self.inner.state.lock()?.tracked.key_is_tracked(table, key)
    }

    /// Writes every pending change.
    ///
    /// If a flush is already running, waits for it and returns its result.
    /// The outcome is also broadcast as a [`FlushEvent`].
    pub async fn flush(&self) -> Result<FlushReport> {
        let pending = {
            let mut state = self.inner.state.lock()?;
            let in_flight = match &state.flush {
                FlushState::Flushing(pending) => Some(pending.clone()),
                FlushState::Idle => None,
            };
            match in_flight {
                Some(pending) => pending,
                None => {
                    let pending = Arc::clone(&self.inner).start_flush();
                    state.flush = FlushState::Flushing(pending.clone());
                    pending
                }
            }
        };
        pending.await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FlushEvent> {
        self.inner.events.subscribe()
    }

    pub fn registry(&self) -> &TableRegistry {
        &self.inner.registry
    }

    pub fn is_flushing(&self) -> bool {
        self.inner
            .state
            .lock()
            .map(|state| matches!(state.flush, FlushState::Flushing(_)))
            .unwrap_or(false)
    }

    pub fn is_tracked<E>(&self, entity: &Shared<E>) -> bool {
        self.state_of(entity).is_some()
    }

    pub fn state_of<E>(&self, entity: &Shared<E>) -> Option<TrackedState> {
        let state = self.inner.state.lock().ok()?;
        state.tracked.get(EntityId::of(entity)).map(TrackedItem::state)
    }

    pub fn len(&self) -> usize {
        self.inner
            .state
            .lock()
            .map(|state| state.tracked.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Inserts an item for an untracked entity, refusing a second entity with the
/// same key in the same table.
fn insert_new(tracked: &mut TrackedSet, item: TrackedItem) -> Result<()> {
    let key = item.key()?;
    if tracked.key_is_tracked(item.table_name(), &key)? {
        return Err(UowError::KeyInUse {
            table: item.table_name().to_string(),
            key,
        });
    }
    tracked.insert(item);
    Ok(())
}

impl ManagerInner {
    fn lock_idle(&self) -> Result<MutexGuard<'_, ManagerState>> {
        let state = self.state.lock()?;
        match state.flush {
            FlushState::Idle => Ok(state),
            FlushState::Flushing(_) => Err(UowError::FlushInProgress),
        }
    }

    /// Spawns the flush task and wraps it so every caller shares one result.
    fn start_flush(self: Arc<Self>) -> PendingFlush {
        let task = tokio::spawn(Arc::clone(&self).run_flush());
        async move {
            match task.await {
                Ok(result) => result,
                Err(join_error) => {
                    self.state
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .flush = FlushState::Idle;
                    let err = UowError::FlushAborted(join_error.to_string());
                    event!(Level::ERROR, error = %err, "flush task aborted");
                    self.events.emit(FlushEvent::Error(err.clone()));
                    Err(err)
                }
            }
        }
        .boxed()
        .shared()
    }

    async fn run_flush(self: Arc<Self>) -> Result<FlushReport> {
        let span = info_span!("uow.flush");

        async move {
            let outcome = self.flush_tracked().await;

            let result = {
                let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
                state.flush = FlushState::Idle;
                outcome.map(|(report, captured)| {
                    state.tracked.advance(captured);
                    report
                })
            };

            match &result {
                Ok(report) => {
                    event!(
                        Level::INFO,
                        written = report.written,
                        skipped = report.skipped,
                        transactions = report.transactions,
                        "flush complete"
                    );
                    self.events.emit(FlushEvent::Flushed(*report));
                }
                Err(err) => {
                    event!(Level::ERROR, error = %err, "flush failed");
                    self.events.emit(FlushEvent::Error(err.clone()));
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn flush_tracked(&self) -> Result<(FlushReport, Vec<CapturedItem>)> {
        // Marshal runs caller code; keep it outside the state lock.
        let pending = self.state.lock()?.tracked.to_vec();
        let captured = pending
            .iter()
            .map(TrackedItem::capture)
            .collect::<Result<Vec<_>>>()?;
        event!(Level::DEBUG, items = captured.len(), "captured tracked items");

        let report = self.flusher.flush(&captured, &self.events).await?;
        Ok((report, captured))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MemoryStoreConfig, TableConfig};
    use crate::core::{KeySchema, shared};
    use crate::flusher::{ParallelFlusher, TransactionalFlusher};
    use crate::storage::MemoryStore;
    use serde::Serialize;
    use serde_json::json;
    use std::time::Duration;

    #[derive(Serialize)]
    struct Account {
        id: String,
        balance: i64,
    }

    fn account(id: &str, balance: i64) -> Shared<Account> {
        shared(Account {
            id: id.into(),
            balance,
        })
    }

    fn registry() -> TableRegistry {
        TableRegistry::new()
            .with_table(TableConfig::<Account>::new("accounts", KeySchema::hash("id")).versioned("version"))
            .unwrap()
    }

    fn slow_store() -> Arc<MemoryStore> {
        Arc::new(
            MemoryStore::with_config(MemoryStoreConfig::new().latency(Duration::from_millis(50)))
                .with_table("accounts", KeySchema::hash("id")),
        )
    }

    fn manager(store: &Arc<MemoryStore>) -> EntityManager {
        EntityManager::new(Arc::new(TransactionalFlusher::new(store.clone())), registry())
    }

    #[test]
    fn test_track_is_idempotent_per_entity() {
        let store = Arc::new(MemoryStore::new());
        let m = manager(&store);
        let a = account("a", 10);

        m.track("accounts", &a, Some(3)).unwrap();
        m.track("accounts", &a, Some(9)).unwrap();
        m.track_new("accounts", &a).unwrap();

        assert_eq!(m.len(), 1);
        assert_eq!(m.state_of(&a), Some(TrackedState::Updated));
    }

    #[test]
    fn test_key_in_use() {
        let store = Arc::new(MemoryStore::new());
        let m = manager(&store);
        m.track("accounts", &account("a", 10), None).unwrap();

        let err = m.track_new("accounts", &account("a", 20)).unwrap_err();
        assert!(matches!(err, UowError::KeyInUse { ref table, .. } if table == "accounts"));
        let err = m.delete("accounts", &account("a", 0)).unwrap_err();
        assert!(matches!(err, UowError::KeyInUse { .. }));
        assert!(m.key_is_tracked("accounts", &ItemKey::new(json!("a"), None)).unwrap());
    }

    #[test]
    fn test_unknown_table_and_type_mismatch() {
        let store = Arc::new(MemoryStore::new());
        let m = manager(&store);

        let err = m.track_new("missing", &account("a", 0)).unwrap_err();
        assert!(matches!(err, UowError::UnknownTable(_)));

        #[derive(Serialize)]
        struct Other {
            id: String,
        }
        let err = m
            .track_new("accounts", &shared(Other { id: "x".into() }))
            .unwrap_err();
        assert!(matches!(err, UowError::EntityTypeMismatch { .. }));
    }

    #[test]
    fn test_delete_transitions() {
        let store = Arc::new(MemoryStore::new());
        let m = manager(&store);
        let created = account("a", 1);
        let existing = account("b", 1);

        m.track_new("accounts", &created).unwrap();
        m.delete("accounts", &created).unwrap();
        assert!(!m.is_tracked(&created));

        m.track("accounts", &existing, Some(4)).unwrap();
        m.delete("accounts", &existing).unwrap();
        assert_eq!(m.state_of(&existing), Some(TrackedState::Deleted));

        m.clear().unwrap();
        assert!(m.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_flushes_share_one_cycle() {
        let store = slow_store();
        let m = manager(&store);
        m.track_new("accounts", &account("a", 1)).unwrap();

        let (first, second) = tokio::join!(m.flush(), m.flush());
        assert_eq!(first.unwrap(), second.unwrap());
        assert_eq!(store.stats().transactions, 1);
        assert!(!m.is_flushing());
    }

    #[tokio::test]
    async fn test_mutations_rejected_while_flushing() {
        let store = slow_store();
        let m = manager(&store);
        m.track_new("accounts", &account("a", 1)).unwrap();

        let background = m.clone();
        let handle = tokio::spawn(async move { background.flush().await });
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(m.is_flushing());
        assert!(matches!(
            m.track_new("accounts", &account("b", 1)),
            Err(UowError::FlushInProgress)
        ));
        assert!(matches!(m.clear(), Err(UowError::FlushInProgress)));

        handle.await.unwrap().unwrap();
        assert!(!m.is_flushing());
        m.track_new("accounts", &account("b", 1)).unwrap();
    }

    #[tokio::test]
    async fn test_flush_survives_dropped_caller() {
        let store = slow_store();
        let m = manager(&store);
        let a = account("a", 1);
        m.track_new("accounts", &a).unwrap();

        let timed_out = tokio::time::timeout(Duration::from_millis(10), m.flush()).await;
        assert!(timed_out.is_err());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!m.is_flushing());
        assert_eq!(store.len("accounts").unwrap(), 1);
        assert_eq!(m.state_of(&a), Some(TrackedState::Updated));
    }

    #[derive(Serialize)]
    struct Fragile {
        id: String,
        broken: bool,
    }

    fn fragile_marshal(fragile: &Fragile) -> crate::core::AttributeMap {
        if fragile.broken {
            panic!("marshal failed for {}", fragile.id);
        }
        crate::config::to_attribute_map(fragile).unwrap()
    }

    #[tokio::test]
    async fn test_panicking_marshal_does_not_wedge_manager() {
        let store = Arc::new(MemoryStore::new().with_table("fragile", KeySchema::hash("id")));
        let registry = TableRegistry::new()
            .with_table(TableConfig::with_marshal(
                "fragile",
                KeySchema::hash("id"),
                fragile_marshal,
            ))
            .unwrap();
        let m = EntityManager::new(Arc::new(TransactionalFlusher::new(store.clone())), registry);
        let mut rx = m.subscribe();
        let f = shared(Fragile {
            id: "f1".into(),
            broken: false,
        });
        m.track_new("fragile", &f).unwrap();

        f.write().unwrap().broken = true;
        let err = m.flush().await.unwrap_err();
        assert!(matches!(err, UowError::FlushAborted(_)));
        assert!(matches!(rx.try_recv().unwrap(), FlushEvent::Error(UowError::FlushAborted(_))));
        assert!(!m.is_flushing());
        assert_eq!(m.state_of(&f), Some(TrackedState::Created));

        f.write().unwrap().broken = false;
        let report = m.flush().await.unwrap();
        assert_eq!(report.written, 1);
        assert_eq!(store.len("fragile").unwrap(), 1);

        m.clear().unwrap();
        m.track_new("fragile", &shared(Fragile {
            id: "f2".into(),
            broken: false,
        }))
        .unwrap();
        assert_eq!(m.len(), 1);
    }

    #[tokio::test]
    async fn test_edits_during_flush_stay_dirty() {
        let store = slow_store();
        let m = EntityManager::new(Arc::new(ParallelFlusher::new(store.clone())), registry());
        let a = account("a", 1);
        m.track_new("accounts", &a).unwrap();

        let background = m.clone();
        let handle = tokio::spawn(async move { background.flush().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        a.write().unwrap().balance = 99;
        handle.await.unwrap().unwrap();

        let report = m.flush().await.unwrap();
        assert_eq!(report.written, 1);
        let stored = store
            .get("accounts", &ItemKey::new(json!("a"), None))
            .unwrap()
            .unwrap();
        assert_eq!(stored["balance"], json!(99));
        assert_eq!(stored["version"], json!(1));
    }
}
