//! Server-side search criteria
//!
//! The JSON shape is `{"opt": "eq", "key": "a.b", "value": 1}` for
//! comparisons and `{"opt": "and", "value": [...]}` for logical nodes.

use crate::query::{compare, CompareOp};
use portex_core::Value;
use serde::{Deserialize, Serialize};

/// Comparison operator of a criteria leaf
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CriteriaOp {
    /// Equal
    Eq,
    /// Not equal
    Ne,
    /// Greater than
    Gt,
    /// Greater than or equal
    Gte,
    /// Less than
    Lt,
    /// Less than or equal
    Lte,
    /// Member of the value list
    In,
    /// Not a member of the value list
    Nin,
}

impl From<CompareOp> for CriteriaOp {
    fn from(op: CompareOp) -> Self {
        match op {
            CompareOp::Eq => CriteriaOp::Eq,
            CompareOp::Ne => CriteriaOp::Ne,
            CompareOp::Gt => CriteriaOp::Gt,
            CompareOp::Gte => CriteriaOp::Gte,
            CompareOp::Lt => CriteriaOp::Lt,
            CompareOp::Lte => CriteriaOp::Lte,
        }
    }
}

/// Logical connective
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalOp {
    /// All children match
    And,
    /// Any child matches
    Or,
}

/// Leaf comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompareCriteria {
    /// Operator
    pub opt: CriteriaOp,
    /// Dotted column path
    pub key: String,
    /// Constant, or a list for `in`/`nin`
    pub value: serde_json::Value,
}

/// Criteria tree sent to a search backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Criteria {
    /// Leaf comparison
    Compare(CompareCriteria),
    /// Logical node
    Logical {
        /// Connective
        opt: LogicalOp,
        /// Children
        value: Vec<Criteria>,
    },
}

impl Criteria {
    /// Evaluate against a row record with the same semantics as a local
    /// query. Missing keys read as null.
    pub fn matches(&self, row: &Value) -> bool {
        match self {
            Criteria::Compare(leaf) => {
                let cell = row.get_path(&leaf.key).cloned().unwrap_or(Value::Null);
                let list = || {
                    leaf.value
                        .as_array()
                        .map(|items| items.iter().any(|v| compare(CompareOp::Eq, &cell, &Value::from_json(v.clone()))))
                        .unwrap_or(false)
                };
                let constant = || Value::from_json(leaf.value.clone());
                match leaf.opt {
                    CriteriaOp::Eq => compare(CompareOp::Eq, &cell, &constant()),
                    CriteriaOp::Ne => compare(CompareOp::Ne, &cell, &constant()),
                    CriteriaOp::Gt => compare(CompareOp::Gt, &cell, &constant()),
                    CriteriaOp::Gte => compare(CompareOp::Gte, &cell, &constant()),
                    CriteriaOp::Lt => compare(CompareOp::Lt, &cell, &constant()),
                    CriteriaOp::Lte => compare(CompareOp::Lte, &cell, &constant()),
                    CriteriaOp::In => list(),
                    CriteriaOp::Nin => !list(),
                }
            }
            Criteria::Logical { opt: LogicalOp::And, value } => value.iter().all(|c| c.matches(row)),
            Criteria::Logical { opt: LogicalOp::Or, value } => value.iter().any(|c| c.matches(row)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_tree() {
        let tree: Criteria = serde_json::from_value(json!({
            "opt": "or",
            "value": [
                {"opt": "eq", "key": "label", "value": "cat"},
                {"opt": "and", "value": [{"opt": "gte", "key": "box.x", "value": 3}]}
            ]
        }))
        .unwrap();
        match &tree {
            Criteria::Logical { opt, value } => {
                assert_eq!(*opt, LogicalOp::Or);
                assert!(matches!(value[0], Criteria::Compare(_)));
                assert!(matches!(value[1], Criteria::Logical { .. }));
            }
            other => panic!("unexpected criteria: {other:?}"),
        }
        assert_eq!(serde_json::from_value::<Criteria>(serde_json::to_value(&tree).unwrap()).unwrap(), tree);
    }

    #[test]
    fn test_unknown_operator_rejected() {
        assert!(serde_json::from_value::<Criteria>(json!({"opt": "like", "key": "a", "value": 1})).is_err());
    }

    #[test]
    fn test_matches_nested_path() {
        let row = Value::record([
            ("label", Value::from("cat")),
            ("box", Value::record([("x", Value::Int(4))])),
        ]);
        let c: Criteria = serde_json::from_value(json!({
            "opt": "and",
            "value": [
                {"opt": "in", "key": "label", "value": ["cat", "dog"]},
                {"opt": "gt", "key": "box.x", "value": 3.5}
            ]
        }))
        .unwrap();
        assert!(c.matches(&row));
        let missing: Criteria = serde_json::from_value(json!({"opt": "eq", "key": "nope", "value": null})).unwrap();
        assert!(missing.matches(&row));
    }
}
