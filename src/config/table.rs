use crate::core::{AttributeMap, KeySchema, Result, UowError};
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub type MarshalFn<E> = Arc<dyn Fn(&E) -> Result<AttributeMap> + Send + Sync>;

/// Type-independent part of a table configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub table_name: String,
    pub key_schema: KeySchema,
    /// Attribute holding the optimistic-concurrency version. `None` disables
    /// versioning for the table.
    pub version_attr: Option<String>,
}

impl TableSchema {
    pub fn new(table_name: impl Into<String>, key_schema: KeySchema) -> Self {
        Self {
            table_name: table_name.into(),
            key_schema,
            version_attr: None,
        }
    }

    pub fn is_versioned(&self) -> bool {
        self.version_attr.is_some()
    }
}

/// Per-entity-type table configuration.
///
/// `marshal` maps an entity to the attributes written to the store. It must be
/// pure and deterministic: the same function produces both the written item and
/// the dirty-checking snapshot, and keys are always read from its output.
pub struct TableConfig<E> {
    schema: TableSchema,
    marshal: MarshalFn<E>,
}

impl<E: Serialize> TableConfig<E> {
    /// Configuration whose marshal is the entity's serde JSON form.
    pub fn new(table_name: impl Into<String>, key_schema: KeySchema) -> Self {
        Self {
            schema: TableSchema::new(table_name, key_schema),
            marshal: Arc::new(|entity: &E| to_attribute_map(entity)),
        }
    }
}

impl<E> TableConfig<E> {
    pub fn with_marshal<F>(table_name: impl Into<String>, key_schema: KeySchema, marshal: F) -> Self
    where
        F: Fn(&E) -> AttributeMap + Send + Sync + 'static,
    {
        Self {
            schema: TableSchema::new(table_name, key_schema),
            marshal: Arc::new(move |entity: &E| Ok(marshal(entity))),
        }
    }

    /// Enables optimistic-concurrency versioning on the given attribute.
    pub fn versioned(mut self, version_attr: impl Into<String>) -> Self {
        self.schema.version_attr = Some(version_attr.into());
        self
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn table_name(&self) -> &str {
        &self.schema.table_name
    }

    pub fn marshal(&self, entity: &E) -> Result<AttributeMap> {
        (self.marshal)(entity)
    }
}

impl<E> fmt::Debug for TableConfig<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableConfig")
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

/// Serializes any serde value into an attribute map. Fails unless the value
/// serializes to a JSON object.
pub fn to_attribute_map<T: Serialize + ?Sized>(value: &T) -> Result<AttributeMap> {
    match serde_json::to_value(value)? {
        serde_json::Value::Object(map) => Ok(map.into_iter().collect()),
        other => Err(UowError::Marshal(format!(
            "expected an object, got {}",
            json_type_name(&other)
        ))),
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

struct RegisteredTable {
    config: Arc<dyn Any + Send + Sync>,
    schema: TableSchema,
}

/// Table configurations keyed by table name.
#[derive(Default)]
pub struct TableRegistry {
    tables: HashMap<String, RegisteredTable>,
}

impl TableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<E: 'static>(&mut self, config: TableConfig<E>) -> Result<()> {
        let name = config.table_name().to_string();
        if self.tables.contains_key(&name) {
            return Err(UowError::TableExists(name));
        }

        let schema = config.schema().clone();
        self.tables.insert(
            name,
            RegisteredTable {
                config: Arc::new(config),
                schema,
            },
        );
        Ok(())
    }

    /// Builder form of [`TableRegistry::register`].
    pub fn with_table<E: 'static>(mut self, config: TableConfig<E>) -> Result<Self> {
        self.register(config)?;
        Ok(self)
    }

    /// Typed lookup of a table's configuration.
    pub fn config<E: 'static>(&self, table_name: &str) -> Result<Arc<TableConfig<E>>> {
        let table = self
            .tables
            .get(table_name)
            .ok_or_else(|| UowError::UnknownTable(table_name.to_string()))?;

        Arc::clone(&table.config)
            .downcast::<TableConfig<E>>()
            .map_err(|_| UowError::EntityTypeMismatch {
                table: table_name.to_string(),
                expected: std::any::type_name::<E>(),
            })
    }

    pub fn schema(&self, table_name: &str) -> Result<&TableSchema> {
        self.tables
            .get(table_name)
            .map(|t| &t.schema)
            .ok_or_else(|| UowError::UnknownTable(table_name.to_string()))
    }

    pub fn contains(&self, table_name: &str) -> bool {
        self.tables.contains_key(table_name)
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
