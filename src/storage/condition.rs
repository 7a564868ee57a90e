use crate::core::{AttributeMap, ItemKey, KeySchema};
use serde_json::{Value, json};
use std::collections::BTreeMap;

/// Precondition attached to a put or delete.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Existence guard: no stored item may already carry `key`.
    KeyAbsent { key_schema: KeySchema, key: ItemKey },
    /// Version guard: the stored version attribute must equal `version`.
    VersionEquals { attr: String, version: u64 },
    And(Vec<Condition>),
}

/// DynamoDB-style rendering of a condition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConditionExpression {
    pub expression: String,
    pub attribute_names: BTreeMap<String, String>,
    pub attribute_values: BTreeMap<String, Value>,
}

impl Condition {
    pub fn and(self, other: Condition) -> Condition {
        match self {
            Condition::And(mut all) => {
                all.push(other);
                Condition::And(all)
            }
            first => Condition::And(vec![first, other]),
        }
    }

    pub fn expression(&self) -> ConditionExpression {
        let mut out = ConditionExpression::default();
        self.render(&mut out);
        out
    }

    fn render(&self, out: &mut ConditionExpression) {
        match self {
            Condition::KeyAbsent { key_schema, key } => {
                push_clause(out, "#keyHash<>:keyHash");
                out.attribute_names
                    .insert("#keyHash".into(), key_schema.hash.clone());
                out.attribute_values
                    .insert(":keyHash".into(), key.hash.clone());
                if let (Some(attr), Some(range)) = (&key_schema.range, &key.range) {
                    push_clause(out, "#keyRange<>:keyRange");
                    out.attribute_names.insert("#keyRange".into(), attr.clone());
                    out.attribute_values
                        .insert(":keyRange".into(), range.clone());
                }
            }
            Condition::VersionEquals { attr, version } => {
                push_clause(out, "#version=:version");
                out.attribute_names.insert("#version".into(), attr.clone());
                out.attribute_values
                    .insert(":version".into(), json!(version));
            }
            Condition::And(all) => {
                for condition in all {
                    condition.render(out);
                }
            }
        }
    }

    /// Evaluates the condition against the item currently stored at the
    /// target key (`None` when there is none).
    pub fn evaluate(&self, existing: Option<&AttributeMap>) -> bool {
        match self {
            Condition::KeyAbsent { key_schema, key } => match existing {
                None => true,
                Some(item) => {
                    let hash_differs = item.get(&key_schema.hash) != Some(&key.hash);
                    let range_differs = match (&key_schema.range, &key.range) {
                        (Some(attr), Some(range)) => item.get(attr) != Some(range),
                        _ => false,
                    };
                    hash_differs || range_differs
                }
            },
            Condition::VersionEquals { attr, version } => existing
                .and_then(|item| item.get(attr))
                .is_some_and(|stored| *stored == json!(version)),
            Condition::And(all) => all.iter().all(|c| c.evaluate(existing)),
        }
    }
}

fn push_clause(out: &mut ConditionExpression, clause: &str) {
    if !out.expression.is_empty() {
        out.expression.push_str(" and ");
    }
    out.expression.push_str(clause);
}
