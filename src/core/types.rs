use super::{AttributeMap, ItemKey, Result, UowError};
use std::sync::{Arc, RwLock};

/// Handle to an in-memory entity. Tracking is by handle identity, so two
/// handles to equal values are two distinct entities.
pub type Shared<E> = Arc<RwLock<E>>;

pub fn shared<E>(entity: E) -> Shared<E> {
    Arc::new(RwLock::new(entity))
}

/// Identity of a tracked entity (the address of its shared allocation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(usize);

impl EntityId {
    pub fn of<E>(entity: &Shared<E>) -> Self {
        EntityId(Arc::as_ptr(entity) as *const () as usize)
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "entity_{:x}", self.0)
    }
}

/// Names of the attributes forming a table's primary key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySchema {
    pub hash: String,
    pub range: Option<String>,
}

impl KeySchema {
    pub fn hash(hash: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            range: None,
        }
    }

    pub fn composite(hash: impl Into<String>, range: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            range: Some(range.into()),
        }
    }

    pub fn has_range(&self) -> bool {
        self.range.is_some()
    }

    /// Reads the key off a marshaled item.
    pub fn key_of(&self, table: &str, attributes: &AttributeMap) -> Result<ItemKey> {
        let hash = attributes
            .get(&self.hash)
            .cloned()
            .ok_or_else(|| UowError::MissingKeyAttribute {
                table: table.to_string(),
                attribute: self.hash.clone(),
            })?;

        let range = match &self.range {
            Some(attr) => Some(attributes.get(attr).cloned().ok_or_else(|| {
                UowError::MissingKeyAttribute {
                    table: table.to_string(),
                    attribute: attr.clone(),
                }
            })?),
            None => None,
        };

        Ok(ItemKey::new(hash, range))
    }

    /// Hash equality, plus range equality when the table has a range key.
    pub fn same_key(&self, a: &ItemKey, b: &ItemKey) -> bool {
        a.hash == b.hash && (self.range.is_none() || a.range == b.range)
    }
}
