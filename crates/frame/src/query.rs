//! Row predicates and row maps

use crate::criteria::{CompareCriteria, Criteria, CriteriaOp, LogicalOp};
use crate::row::Row;
use portex_core::{Error, Result, Value};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `>`
    Gt,
    /// `>=`
    Gte,
    /// `<`
    Lt,
    /// `<=`
    Lte,
}

type RowPredicate = Arc<dyn Fn(&Row<'_>) -> Result<bool> + Send + Sync>;
type RowFunction = Arc<dyn Fn(&Row<'_>) -> Result<Value> + Send + Sync>;

/// Boolean condition over a row
#[derive(Clone)]
pub enum Predicate {
    /// Compare the cell at `key` with a constant
    Compare {
        /// Column path
        key: String,
        /// Operator
        op: CompareOp,
        /// Right-hand constant
        value: Value,
    },
    /// Membership of the cell at `key` in a constant list
    In {
        /// Column path
        key: String,
        /// Candidate values
        values: Vec<Value>,
        /// `not in` when set
        negated: bool,
    },
    /// All sub-predicates hold
    And(Vec<Predicate>),
    /// Any sub-predicate holds
    Or(Vec<Predicate>),
    /// Arbitrary function; evaluates locally only
    Custom(RowPredicate),
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Compare { key, op, value } => write!(f, "{} {:?} {:?}", key, op, value),
            Predicate::In { key, values, negated } => {
                write!(f, "{} {}in {:?}", key, if *negated { "not " } else { "" }, values)
            }
            Predicate::And(ps) => f.debug_tuple("And").field(ps).finish(),
            Predicate::Or(ps) => f.debug_tuple("Or").field(ps).finish(),
            Predicate::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl Predicate {
    /// Predicate from a closure.
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&Row<'_>) -> Result<bool> + Send + Sync + 'static,
    {
        Predicate::Custom(Arc::new(f))
    }

    /// `self && other`, flattening nested conjunctions.
    pub fn and(self, other: Predicate) -> Self {
        match self {
            Predicate::And(mut ps) => {
                ps.push(other);
                Predicate::And(ps)
            }
            p => Predicate::And(vec![p, other]),
        }
    }

    /// `self || other`, flattening nested disjunctions.
    pub fn or(self, other: Predicate) -> Self {
        match self {
            Predicate::Or(mut ps) => {
                ps.push(other);
                Predicate::Or(ps)
            }
            p => Predicate::Or(vec![p, other]),
        }
    }

    /// Evaluate against one row.
    pub fn evaluate(&self, row: &Row<'_>) -> Result<bool> {
        match self {
            Predicate::Compare { key, op, value } => Ok(compare(*op, &row.get(key)?, value)),
            Predicate::In { key, values, negated } => {
                let cell = row.get(key)?;
                let found = values.iter().any(|v| compare(CompareOp::Eq, &cell, v));
                Ok(found != *negated)
            }
            Predicate::And(ps) => {
                for p in ps {
                    if !p.evaluate(row)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Predicate::Or(ps) => {
                for p in ps {
                    if p.evaluate(row)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Predicate::Custom(f) => f(row),
        }
    }

    /// Translate into a server-side criteria tree.
    ///
    /// `Custom` predicates have no translation and fail with
    /// `Error::Criteria`.
    pub fn to_criteria(&self) -> Result<Criteria> {
        match self {
            Predicate::Compare { key, op, value } => Ok(Criteria::Compare(CompareCriteria {
                opt: CriteriaOp::from(*op),
                key: key.clone(),
                value: criteria_value(value)?,
            })),
            Predicate::In { key, values, negated } => Ok(Criteria::Compare(CompareCriteria {
                opt: if *negated { CriteriaOp::Nin } else { CriteriaOp::In },
                key: key.clone(),
                value: serde_json::Value::Array(
                    values.iter().map(criteria_value).collect::<Result<_>>()?,
                ),
            })),
            Predicate::And(ps) => Ok(Criteria::Logical {
                opt: LogicalOp::And,
                value: ps.iter().map(Predicate::to_criteria).collect::<Result<_>>()?,
            }),
            Predicate::Or(ps) => Ok(Criteria::Logical {
                opt: LogicalOp::Or,
                value: ps.iter().map(Predicate::to_criteria).collect::<Result<_>>()?,
            }),
            Predicate::Custom(_) => Err(Error::Criteria(
                "a custom predicate cannot be translated to search criteria".into(),
            )),
        }
    }
}

fn criteria_value(value: &Value) -> Result<serde_json::Value> {
    match value {
        Value::Array(_) | Value::Record(_) | Value::Bytes(_) | Value::File(_) => Err(Error::Criteria(
            format!("cannot compare against a {} constant on the server", value.type_name()),
        )),
        other => other.to_json(),
    }
}

/// Builder for predicates on one column path
#[derive(Debug, Clone)]
pub struct Column {
    key: String,
}

/// Start a predicate on `path`.
pub fn col(path: impl Into<String>) -> Column {
    Column { key: path.into() }
}

impl Column {
    fn compare(self, op: CompareOp, value: impl Into<Value>) -> Predicate {
        Predicate::Compare {
            key: self.key,
            op,
            value: value.into(),
        }
    }

    /// `==`
    pub fn eq(self, value: impl Into<Value>) -> Predicate {
        self.compare(CompareOp::Eq, value)
    }

    /// `!=`
    pub fn ne(self, value: impl Into<Value>) -> Predicate {
        self.compare(CompareOp::Ne, value)
    }

    /// `>`
    pub fn gt(self, value: impl Into<Value>) -> Predicate {
        self.compare(CompareOp::Gt, value)
    }

    /// `>=`
    pub fn gte(self, value: impl Into<Value>) -> Predicate {
        self.compare(CompareOp::Gte, value)
    }

    /// `<`
    pub fn lt(self, value: impl Into<Value>) -> Predicate {
        self.compare(CompareOp::Lt, value)
    }

    /// `<=`
    pub fn lte(self, value: impl Into<Value>) -> Predicate {
        self.compare(CompareOp::Lte, value)
    }

    /// Cell is one of `values`.
    pub fn is_in<I, V>(self, values: I) -> Predicate
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Predicate::In {
            key: self.key,
            values: values.into_iter().map(Into::into).collect(),
            negated: false,
        }
    }

    /// Cell is none of `values`.
    pub fn not_in<I, V>(self, values: I) -> Predicate
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Predicate::In {
            key: self.key,
            values: values.into_iter().map(Into::into).collect(),
            negated: true,
        }
    }
}

/// Per-row function producing one value
#[derive(Clone)]
pub enum RowMap {
    /// Project the cell at a column path
    Column(String),
    /// Arbitrary function; evaluates locally only
    Custom(RowFunction),
}

impl fmt::Debug for RowMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowMap::Column(path) => f.debug_tuple("Column").field(path).finish(),
            RowMap::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl RowMap {
    /// Row map from a closure.
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&Row<'_>) -> Result<Value> + Send + Sync + 'static,
    {
        RowMap::Custom(Arc::new(f))
    }

    /// Evaluate against one row.
    pub fn evaluate(&self, row: &Row<'_>) -> Result<Value> {
        match self {
            RowMap::Column(path) => row.get(path),
            RowMap::Custom(f) => f(row),
        }
    }
}

/// Compare two cells.
///
/// Numbers compare by value across int and float. Null equals only null
/// and never orders. Mismatched kinds are unequal and unordered.
pub fn compare(op: CompareOp, left: &Value, right: &Value) -> bool {
    let ordering = match (left, right) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Null, _) | (_, Value::Null) => None,
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (a, b) => match (a.as_number(), b.as_number()) {
            (Some(x), Some(y)) => x.partial_cmp(&y),
            _ => (a == b).then_some(Ordering::Equal),
        },
    };
    let null_involved = left.is_null() || right.is_null();
    match op {
        CompareOp::Eq => ordering == Some(Ordering::Equal),
        CompareOp::Ne => ordering != Some(Ordering::Equal),
        _ if null_involved => false,
        CompareOp::Gt => ordering == Some(Ordering::Greater),
        CompareOp::Gte => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
        CompareOp::Lt => ordering == Some(Ordering::Less),
        CompareOp::Lte => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compare_numeric_across_kinds() {
        assert!(compare(CompareOp::Eq, &Value::Int(2), &Value::Float(2.0)));
        assert!(compare(CompareOp::Lt, &Value::Int(1), &Value::Float(1.5)));
        assert!(!compare(CompareOp::Gt, &Value::from("b"), &Value::Int(1)));
    }

    #[test]
    fn test_compare_null() {
        assert!(compare(CompareOp::Eq, &Value::Null, &Value::Null));
        assert!(compare(CompareOp::Ne, &Value::Int(1), &Value::Null));
        assert!(!compare(CompareOp::Lte, &Value::Null, &Value::Null));
        assert!(!compare(CompareOp::Gt, &Value::Int(1), &Value::Null));
    }

    #[test]
    fn test_builder_flattens() {
        let p = col("a").eq(1).and(col("b").gt(2)).and(col("c").lt(3));
        match p {
            Predicate::And(ps) => assert_eq!(ps.len(), 3),
            other => panic!("unexpected predicate: {other:?}"),
        }
    }

    #[test]
    fn test_custom_not_translatable() {
        let p = col("a").eq(1).or(Predicate::custom(|_| Ok(true)));
        assert!(matches!(p.to_criteria(), Err(Error::Criteria(_))));
    }

    #[test]
    fn test_not_in_translates_to_nin() {
        let criteria = col("label").not_in(["cat", "dog"]).to_criteria().unwrap();
        assert_eq!(
            serde_json::to_value(&criteria).unwrap(),
            serde_json::json!({"opt": "nin", "key": "label", "value": ["cat", "dog"]})
        );
    }
}
