use super::{DeleteRequest, KeyValueStore, PutRequest, StoreResult, WriteOperation};
use crate::config::MemoryStoreConfig;
use crate::core::{AttributeMap, ItemKey, KeySchema, StoreError};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

/// Call counters, for asserting how many writes a flush issued.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Calls received, successful or not
    pub calls: usize,
    pub puts: usize,
    pub deletes: usize,
    pub transactions: usize,
    pub transaction_items: usize,
}

struct MemoryTable {
    key_schema: KeySchema,
    items: BTreeMap<String, AttributeMap>,
}

impl MemoryTable {
    fn key_of(&self, table: &str, attributes: &AttributeMap) -> StoreResult<ItemKey> {
        self.key_schema
            .key_of(table, attributes)
            .map_err(|e| StoreError::Validation(e.to_string()))
    }
}

struct InjectedFailure {
    error: StoreError,
    /// Only writes to this table and key fail; every call fails when unset.
    target: Option<(String, ItemKey)>,
}

/// In-process key/value store with conditional writes and atomic
/// transactions. Used as the store in tests and local runs.
pub struct MemoryStore {
    config: MemoryStoreConfig,
    tables: Mutex<HashMap<String, MemoryTable>>,
    failure: Mutex<Option<InjectedFailure>>,
    stats: Mutex<StoreStats>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_config(MemoryStoreConfig::default())
    }

    pub fn with_config(config: MemoryStoreConfig) -> Self {
        Self {
            config,
            tables: Mutex::new(HashMap::new()),
            failure: Mutex::new(None),
            stats: Mutex::new(StoreStats::default()),
        }
    }

    /// Builder form of [`MemoryStore::create_table`]; replaces an existing table.
    pub fn with_table(mut self, name: &str, key_schema: KeySchema) -> Self {
        if let Ok(tables) = self.tables.get_mut() {
            tables.insert(
                name.to_string(),
                MemoryTable {
                    key_schema,
                    items: BTreeMap::new(),
                },
            );
        }
        self
    }

    pub fn create_table(&self, name: &str, key_schema: KeySchema) -> StoreResult<()> {
        let mut tables = self.lock_tables()?;
        if tables.contains_key(name) {
            return Err(StoreError::Validation(format!("Table '{}' already exists", name)));
        }
        tables.insert(
            name.to_string(),
            MemoryTable {
                key_schema,
                items: BTreeMap::new(),
            },
        );
        Ok(())
    }

    pub fn get(&self, table: &str, key: &ItemKey) -> StoreResult<Option<AttributeMap>> {
        let tables = self.lock_tables()?;
        let table_ref = tables
            .get(table)
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))?;
        Ok(table_ref.items.get(&key.canonical()).cloned())
    }

    pub fn scan(&self, table: &str) -> StoreResult<Vec<AttributeMap>> {
        let tables = self.lock_tables()?;
        let table_ref = tables
            .get(table)
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))?;
        Ok(table_ref.items.values().cloned().collect())
    }

    pub fn len(&self, table: &str) -> StoreResult<usize> {
        let tables = self.lock_tables()?;
        tables
            .get(table)
            .map(|t| t.items.len())
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))
    }

    /// Every following call fails with `error` until [`MemoryStore::clear_failure`].
    pub fn fail_on_call(&self, error: StoreError) {
        self.set_failure(InjectedFailure { error, target: None });
    }

    /// Writes touching `key` in `table` fail with `error`; other writes succeed.
    pub fn fail_on_key(&self, table: &str, key: ItemKey, error: StoreError) {
        self.set_failure(InjectedFailure {
            error,
            target: Some((table.to_string(), key)),
        });
    }

    pub fn clear_failure(&self) {
        if let Ok(mut failure) = self.failure.lock() {
            *failure = None;
        }
    }

    pub fn stats(&self) -> StoreStats {
        self.stats.lock().map(|s| *s).unwrap_or_default()
    }

    fn set_failure(&self, injected: InjectedFailure) {
        if let Ok(mut failure) = self.failure.lock() {
            *failure = Some(injected);
        }
    }

    fn lock_tables(&self) -> StoreResult<MutexGuard<'_, HashMap<String, MemoryTable>>> {
        self.tables
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("lock poisoned: {}", e)))
    }

    fn record(&self, update: impl FnOnce(&mut StoreStats)) {
        if let Ok(mut stats) = self.stats.lock() {
            update(&mut stats);
        }
    }

    async fn begin_call(&self) {
        self.record(|s| s.calls += 1);
        if let Some(latency) = self.config.latency {
            tokio::time::sleep(latency).await;
        }
    }

    /// Returns the injected error if it applies to a write on `keys`.
    fn injected_failure(&self, keys: &[(&str, &ItemKey)]) -> StoreResult<()> {
        let failure = self
            .failure
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("lock poisoned: {}", e)))?;
        match failure.as_ref() {
            None => Ok(()),
            Some(InjectedFailure { error, target: None }) => Err(error.clone()),
            Some(InjectedFailure {
                error,
                target: Some((table, key)),
            }) => {
                if keys.iter().any(|(t, k)| *t == table.as_str() && *k == key) {
                    Err(error.clone())
                } else {
                    Ok(())
                }
            }
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// A write resolved against its table: canonical key plus what to do.
struct ResolvedWrite<'a> {
    table: &'a str,
    key: ItemKey,
    canonical: String,
    item: Option<&'a AttributeMap>,
    condition: Option<&'a super::Condition>,
}

fn resolve<'a>(
    tables: &HashMap<String, MemoryTable>,
    operation: &'a WriteOperation,
) -> StoreResult<ResolvedWrite<'a>> {
    let table = operation.table_name();
    let table_ref = tables
        .get(table)
        .ok_or_else(|| StoreError::TableNotFound(table.to_string()))?;
    let (attributes, item) = match operation {
        WriteOperation::Put(put) => (&put.item, Some(&put.item)),
        WriteOperation::Delete(delete) => (&delete.key, None),
    };
    let key = table_ref.key_of(table, attributes)?;
    Ok(ResolvedWrite {
        table,
        canonical: key.canonical(),
        key,
        item,
        condition: operation.condition(),
    })
}

fn apply(tables: &mut HashMap<String, MemoryTable>, write: &ResolvedWrite<'_>) {
    if let Some(table_ref) = tables.get_mut(write.table) {
        match write.item {
            Some(item) => {
                table_ref.items.insert(write.canonical.clone(), item.clone());
            }
            None => {
                table_ref.items.remove(&write.canonical);
            }
        }
    }
}

impl MemoryStore {
    async fn write_one(&self, operation: WriteOperation) -> StoreResult<()> {
        self.begin_call().await;

        let mut tables = self.lock_tables()?;
        let write = resolve(&tables, &operation)?;
        self.injected_failure(&[(write.table, &write.key)])?;

        let existing = tables
            .get(write.table)
            .and_then(|t| t.items.get(&write.canonical));
        if let Some(condition) = write.condition {
            if !condition.evaluate(existing) {
                return Err(StoreError::ConditionalCheckFailed {
                    table: write.table.to_string(),
                    key: write.key.clone(),
                });
            }
        }

        apply(&mut tables, &write);
        let is_put = write.item.is_some();
        drop(tables);
        self.record(|s| {
            if is_put {
                s.puts += 1;
            } else {
                s.deletes += 1;
            }
        });
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn put(&self, request: PutRequest) -> StoreResult<()> {
        self.write_one(WriteOperation::Put(request)).await
    }

    async fn delete(&self, request: DeleteRequest) -> StoreResult<()> {
        self.write_one(WriteOperation::Delete(request)).await
    }

    async fn transact_write(&self, operations: Vec<WriteOperation>) -> StoreResult<()> {
        self.begin_call().await;

        if operations.is_empty() {
            return Err(StoreError::Validation(
                "Transaction must contain at least one operation".into(),
            ));
        }
        if operations.len() > self.config.max_transaction_items {
            return Err(StoreError::Validation(format!(
                "Transaction accepts a maximum of {} items, {} provided",
                self.config.max_transaction_items,
                operations.len()
            )));
        }

        let mut tables = self.lock_tables()?;
        let writes = operations
            .iter()
            .map(|op| resolve(&tables, op))
            .collect::<StoreResult<Vec<_>>>()?;

        let targets: Vec<(&str, &ItemKey)> = writes.iter().map(|w| (w.table, &w.key)).collect();
        self.injected_failure(&targets)?;

        let mut seen = HashSet::new();
        for write in &writes {
            if !seen.insert((write.table, write.canonical.as_str())) {
                return Err(StoreError::Validation(format!(
                    "Transaction contains multiple operations on key {} of table '{}'",
                    write.key, write.table
                )));
            }
        }

        let failed_operations: Vec<usize> = writes
            .iter()
            .enumerate()
            .filter(|(_, write)| {
                write.condition.is_some_and(|condition| {
                    let existing = tables
                        .get(write.table)
                        .and_then(|t| t.items.get(&write.canonical));
                    !condition.evaluate(existing)
                })
            })
            .map(|(index, _)| index)
            .collect();
        if !failed_operations.is_empty() {
            return Err(StoreError::TransactionCanceled { failed_operations });
        }

        for write in &writes {
            apply(&mut tables, write);
        }
        drop(tables);

        let count = writes.len();
        self.record(|s| {
            s.transactions += 1;
            s.transaction_items += count;
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Condition;
    use serde_json::{Value, json};

    fn store() -> MemoryStore {
        MemoryStore::new().with_table("t", KeySchema::composite("pk", "sk"))
    }

    fn item(value: Value) -> AttributeMap {
        serde_json::from_value(value).unwrap()
    }

    fn put(value: Value, condition: Option<Condition>) -> PutRequest {
        PutRequest {
            table_name: "t".into(),
            item: item(value),
            condition,
        }
    }

    fn key(pk: &str, sk: i64) -> ItemKey {
        ItemKey::new(json!(pk), Some(json!(sk)))
    }

    fn absent(pk: &str, sk: i64) -> Condition {
        Condition::KeyAbsent {
            key_schema: KeySchema::composite("pk", "sk"),
            key: key(pk, sk),
        }
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let store = store();
        store
            .put(put(json!({"pk": "a", "sk": 1, "x": true}), None))
            .await
            .unwrap();

        let stored = store.get("t", &key("a", 1)).unwrap().unwrap();
        assert_eq!(stored["x"], json!(true));
        assert_eq!(store.len("t").unwrap(), 1);
        assert_eq!(store.stats().puts, 1);
    }

    #[tokio::test]
    async fn test_conditional_put_rejects_existing_key() {
        let store = store();
        store
            .put(put(json!({"pk": "a", "sk": 1}), Some(absent("a", 1))))
            .await
            .unwrap();
        let err = store
            .put(put(json!({"pk": "a", "sk": 1}), Some(absent("a", 1))))
            .await
            .unwrap_err();
        assert!(err.is_conditional_check_failed());
    }

    #[tokio::test]
    async fn test_versioned_delete() {
        let store = store();
        store
            .put(put(json!({"pk": "a", "sk": 1, "v": 2}), None))
            .await
            .unwrap();

        let stale = DeleteRequest {
            table_name: "t".into(),
            key: item(json!({"pk": "a", "sk": 1})),
            condition: Some(Condition::VersionEquals {
                attr: "v".into(),
                version: 1,
            }),
        };
        assert!(store.delete(stale).await.is_err());

        let current = DeleteRequest {
            table_name: "t".into(),
            key: item(json!({"pk": "a", "sk": 1})),
            condition: Some(Condition::VersionEquals {
                attr: "v".into(),
                version: 2,
            }),
        };
        store.delete(current).await.unwrap();
        assert!(store.get("t", &key("a", 1)).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_transaction_is_all_or_nothing() {
        let store = store();
        store.put(put(json!({"pk": "b", "sk": 1}), None)).await.unwrap();

        let err = store
            .transact_write(vec![
                WriteOperation::Put(put(json!({"pk": "a", "sk": 1}), Some(absent("a", 1)))),
                WriteOperation::Put(put(json!({"pk": "b", "sk": 1}), Some(absent("b", 1)))),
            ])
            .await
            .unwrap_err();

        assert_eq!(
            err,
            StoreError::TransactionCanceled {
                failed_operations: vec![1]
            }
        );
        assert!(store.get("t", &key("a", 1)).unwrap().is_none());
        assert_eq!(store.stats().transactions, 0);
    }

    #[tokio::test]
    async fn test_transaction_rejects_duplicate_keys_and_oversize() {
        let store = MemoryStore::with_config(MemoryStoreConfig::new().max_transaction_items(1))
            .with_table("t", KeySchema::composite("pk", "sk"));
        let err = store
            .transact_write(vec![
                WriteOperation::Put(put(json!({"pk": "a", "sk": 1}), None)),
                WriteOperation::Put(put(json!({"pk": "b", "sk": 1}), None)),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));

        let store = self::store();
        let err = store
            .transact_write(vec![
                WriteOperation::Put(put(json!({"pk": "a", "sk": 1}), None)),
                WriteOperation::Put(put(json!({"pk": "a", "sk": 1, "x": 1}), None)),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let store = store();
        store.fail_on_key("t", key("a", 1), StoreError::Unavailable("boom".into()));
        assert!(store.put(put(json!({"pk": "a", "sk": 1}), None)).await.is_err());
        store.put(put(json!({"pk": "b", "sk": 1}), None)).await.unwrap();

        store.fail_on_call(StoreError::Unavailable("down".into()));
        assert!(store.put(put(json!({"pk": "c", "sk": 1}), None)).await.is_err());

        store.clear_failure();
        store.put(put(json!({"pk": "c", "sk": 1}), None)).await.unwrap();
        assert_eq!(store.stats().calls, 4);
        assert_eq!(store.stats().puts, 2);
    }

    #[tokio::test]
    async fn test_unknown_table() {
        let store = store();
        let err = store
            .put(PutRequest {
                table_name: "missing".into(),
                item: item(json!({"pk": "a"})),
                condition: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::TableNotFound("missing".into()));
    }
}
