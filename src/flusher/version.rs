// ============================================================================
// Write Conditions and Versions
// ============================================================================
//
// Per-variant write rules shared by every flusher:
//
//   Created  -> put,    existence guard, version attribute = 0
//   Updated  -> put,    version guard,   version attribute = version + 1
//               (no write at all when the snapshot is unchanged)
//   Deleted  -> delete, version guard
//
// The version guard is skipped when the table is unversioned or the known
// version is 0 (nothing to compare against).
//
// ============================================================================

use crate::config::TableSchema;
use crate::core::AttributeMap;
use crate::storage::{Condition, DeleteRequest, PutRequest, WriteOperation};
use crate::tracked::{CapturedItem, TrackedItem};
use serde_json::json;

pub fn with_create_version(mut item: AttributeMap, schema: &TableSchema) -> AttributeMap {
    if let Some(attr) = &schema.version_attr {
        item.insert(attr.clone(), json!(0));
    }
    item
}

pub fn with_update_version(mut item: AttributeMap, tracked: &TrackedItem) -> AttributeMap {
    if let Some(attr) = &tracked.schema().version_attr {
        let next = tracked.version().unwrap_or(0) + 1;
        item.insert(attr.clone(), json!(next));
    }
    item
}

pub fn version_condition(tracked: &TrackedItem) -> Option<Condition> {
    let attr = tracked.schema().version_attr.as_ref()?;
    match tracked.version() {
        Some(version) if version > 0 => Some(Condition::VersionEquals {
            attr: attr.clone(),
            version,
        }),
        _ => None,
    }
}

pub fn existence_guard(captured: &CapturedItem) -> Condition {
    Condition::KeyAbsent {
        key_schema: captured.schema().key_schema.clone(),
        key: captured.key().clone(),
    }
}

/// The store write for one captured item, or `None` for an unchanged update.
pub fn build_write(captured: &CapturedItem) -> Option<WriteOperation> {
    let schema = captured.schema();
    let table_name = schema.table_name.clone();
    match captured.item() {
        TrackedItem::Created(_) => Some(WriteOperation::Put(PutRequest {
            table_name,
            item: with_create_version(captured.attributes().clone(), schema),
            condition: Some(existence_guard(captured)),
        })),
        tracked @ TrackedItem::Updated(_) => {
            if !captured.changed() {
                return None;
            }
            Some(WriteOperation::Put(PutRequest {
                table_name,
                item: with_update_version(captured.attributes().clone(), tracked),
                condition: version_condition(tracked),
            }))
        }
        tracked @ TrackedItem::Deleted(_) => Some(WriteOperation::Delete(DeleteRequest {
            table_name,
            key: captured.key().to_attributes(&schema.key_schema),
            condition: version_condition(tracked),
        })),
    }
}
