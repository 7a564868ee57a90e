// ============================================================================
// Tracked Items
// ============================================================================
//
// One tracked item per entity, tagged with the pending intent:
//
//   Created ──flush──> Updated ──flush──> Updated (snapshot refreshed)
//   Deleted ──flush──> (removed)
//
// Keys are always read from the marshaled form of the entity.
//
// ============================================================================

use crate::config::{TableConfig, TableSchema};
use crate::core::{AttributeMap, EntityId, ItemKey, Result, Shared};
use std::sync::Arc;

/// Type-erased view of a tracked entity bound to its table configuration.
pub trait TrackedEntity: Send + Sync {
    fn id(&self) -> EntityId;
    fn schema(&self) -> &TableSchema;
    fn marshal(&self) -> Result<AttributeMap>;
}

pub type EntityHandle = Arc<dyn TrackedEntity>;

struct BoundEntity<E> {
    entity: Shared<E>,
    config: Arc<TableConfig<E>>,
}

impl<E: Send + Sync + 'static> TrackedEntity for BoundEntity<E> {
    fn id(&self) -> EntityId {
        EntityId::of(&self.entity)
    }

    fn schema(&self) -> &TableSchema {
        self.config.schema()
    }

    fn marshal(&self) -> Result<AttributeMap> {
        let entity = self.entity.read()?;
        self.config.marshal(&entity)
    }
}

pub fn bind<E: Send + Sync + 'static>(entity: &Shared<E>, config: Arc<TableConfig<E>>) -> EntityHandle {
    Arc::new(BoundEntity {
        entity: Arc::clone(entity),
        config,
    })
}

/// Lifecycle state of a tracked entity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackedState {
    Created,
    Updated,
    Deleted,
}

impl std::fmt::Display for TrackedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackedState::Created => write!(f, "CREATED"),
            TrackedState::Updated => write!(f, "UPDATED"),
            TrackedState::Deleted => write!(f, "DELETED"),
        }
    }
}

/// An entity that does not exist in the store yet.
#[derive(Clone)]
pub struct CreatedItem {
    entity: EntityHandle,
    version: Option<u64>,
}

impl CreatedItem {
    pub fn new(entity: EntityHandle) -> Self {
        let version = entity.schema().is_versioned().then_some(0);
        Self { entity, version }
    }

    /// The item as it is tracked once the store holds it.
    pub fn to_update(&self) -> Result<UpdatedItem> {
        UpdatedItem::new(Arc::clone(&self.entity), self.version)
    }
}

/// An entity loaded from the store, dirty-checked against `initial_status`.
#[derive(Clone)]
pub struct UpdatedItem {
    entity: EntityHandle,
    version: Option<u64>,
    initial_status: AttributeMap,
}

impl UpdatedItem {
    pub fn new(entity: EntityHandle, version: Option<u64>) -> Result<Self> {
        let initial_status = entity.marshal()?;
        Ok(Self::with_state(entity, version, initial_status))
    }

    pub(crate) fn with_state(
        entity: EntityHandle,
        version: Option<u64>,
        initial_status: AttributeMap,
    ) -> Self {
        let version = if entity.schema().is_versioned() {
            Some(version.unwrap_or(0))
        } else {
            None
        };
        Self {
            entity,
            version,
            initial_status,
        }
    }

    /// Takes a fresh snapshot of the entity as the dirty-check baseline.
    pub fn set_state(&mut self) -> Result<()> {
        self.initial_status = self.entity.marshal()?;
        Ok(())
    }

    pub fn has_changed(&self) -> Result<bool> {
        Ok(self.entity.marshal()? != self.initial_status)
    }

    pub fn initial_status(&self) -> &AttributeMap {
        &self.initial_status
    }
}

/// An entity to be removed from the store, whatever its current state.
#[derive(Clone)]
pub struct DeletedItem {
    entity: EntityHandle,
    version: Option<u64>,
}

impl DeletedItem {
    pub fn new(entity: EntityHandle, version: Option<u64>) -> Self {
        let version = if entity.schema().is_versioned() {
            version
        } else {
            None
        };
        Self { entity, version }
    }
}

#[derive(Clone)]
pub enum TrackedItem {
    Created(CreatedItem),
    Updated(UpdatedItem),
    Deleted(DeletedItem),
}

impl TrackedItem {
    fn entity(&self) -> &EntityHandle {
        match self {
            TrackedItem::Created(item) => &item.entity,
            TrackedItem::Updated(item) => &item.entity,
            TrackedItem::Deleted(item) => &item.entity,
        }
    }

    pub fn entity_id(&self) -> EntityId {
        self.entity().id()
    }

    pub fn schema(&self) -> &TableSchema {
        self.entity().schema()
    }

    pub fn table_name(&self) -> &str {
        &self.schema().table_name
    }

    /// Last known store version; `None` when the table is not versioned.
    pub fn version(&self) -> Option<u64> {
        match self {
            TrackedItem::Created(item) => item.version,
            TrackedItem::Updated(item) => item.version,
            TrackedItem::Deleted(item) => item.version,
        }
    }

    pub fn state(&self) -> TrackedState {
        match self {
            TrackedItem::Created(_) => TrackedState::Created,
            TrackedItem::Updated(_) => TrackedState::Updated,
            TrackedItem::Deleted(_) => TrackedState::Deleted,
        }
    }

    pub fn marshal(&self) -> Result<AttributeMap> {
        self.entity().marshal()
    }

    pub fn key(&self) -> Result<ItemKey> {
        let schema = self.schema();
        schema
            .key_schema
            .key_of(&schema.table_name, &self.marshal()?)
    }

    /// Marshals the entity once for a flush cycle.
    pub fn capture(&self) -> Result<CapturedItem> {
        let attributes = self.marshal()?;
        let schema = self.schema();
        let key = schema.key_schema.key_of(&schema.table_name, &attributes)?;
        Ok(CapturedItem {
            item: self.clone(),
            attributes,
            key,
        })
    }

    /// State after a successful flush that wrote `written`. `None` means the
    /// item leaves the tracked set.
    pub(crate) fn after_flush(self, written: AttributeMap) -> Option<TrackedItem> {
        match self {
            TrackedItem::Created(item) => Some(TrackedItem::Updated(UpdatedItem::with_state(
                item.entity,
                item.version,
                written,
            ))),
            TrackedItem::Updated(mut item) => {
                item.initial_status = written;
                Some(TrackedItem::Updated(item))
            }
            TrackedItem::Deleted(_) => None,
        }
    }
}

/// A tracked item together with the attributes marshaled at flush time.
/// Flushers build writes from these, never from the live entity.
#[derive(Clone)]
pub struct CapturedItem {
    item: TrackedItem,
    attributes: AttributeMap,
    key: ItemKey,
}

impl CapturedItem {
    pub fn item(&self) -> &TrackedItem {
        &self.item
    }

    pub fn attributes(&self) -> &AttributeMap {
        &self.attributes
    }

    pub fn key(&self) -> &ItemKey {
        &self.key
    }

    pub fn schema(&self) -> &TableSchema {
        self.item.schema()
    }

    /// False only for an Updated item whose state matches its snapshot.
    pub fn changed(&self) -> bool {
        match &self.item {
            TrackedItem::Updated(item) => item.initial_status != self.attributes,
            TrackedItem::Created(_) | TrackedItem::Deleted(_) => true,
        }
    }

    pub(crate) fn into_parts(self) -> (TrackedItem, AttributeMap) {
        (self.item, self.attributes)
    }
}
