use super::KeySchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Store-native representation of one item. Ordered so that two marshals of
/// the same entity compare and serialize identically.
pub type AttributeMap = BTreeMap<String, Value>;

/// Primary key of a stored item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemKey {
    pub hash: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<Value>,
}

impl ItemKey {
    pub fn new(hash: Value, range: Option<Value>) -> Self {
        Self { hash, range }
    }

    /// Key attributes as they appear in a delete request.
    pub fn to_attributes(&self, schema: &KeySchema) -> AttributeMap {
        let mut attributes = AttributeMap::new();
        attributes.insert(schema.hash.clone(), self.hash.clone());
        if let (Some(attr), Some(range)) = (&schema.range, &self.range) {
            attributes.insert(attr.clone(), range.clone());
        }
        attributes
    }

    /// Canonical string form, usable as a map key by in-process stores.
    pub fn canonical(&self) -> String {
        match &self.range {
            Some(range) => format!("{}\u{1f}{}", self.hash, range),
            None => self.hash.to_string(),
        }
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.range {
            Some(range) => write!(f, "({}, {})", self.hash, range),
            None => write!(f, "({})", self.hash),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_to_attributes_composite() {
        let schema = KeySchema::composite("pk", "sk");
        let key = ItemKey::new(json!("a"), Some(json!("b")));
        let attrs = key.to_attributes(&schema);
        assert_eq!(attrs.len(), 2);
        assert_eq!(attrs["pk"], json!("a"));
        assert_eq!(attrs["sk"], json!("b"));
    }

    #[test]
    fn test_canonical_distinguishes_types() {
        let text = ItemKey::new(json!("1"), None);
        let number = ItemKey::new(json!(1), None);
        assert_ne!(text.canonical(), number.canonical());
    }

    #[test]
    fn test_display() {
        let key = ItemKey::new(json!("a"), Some(json!(2)));
        assert_eq!(key.to_string(), "(\"a\", 2)");
    }
}
