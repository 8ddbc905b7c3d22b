//! Cell and row values
//!
//! [`Value`] is the dynamically-typed value that flows through series cells,
//! row views and remote row payloads. A row is a [`Value::Record`].
//!
//! ## Type Equality
//!
//! Different variants are never equal: `Int(1) != Float(1.0)`. Schema
//! coercion (see `schema::coerce`) is the only place where an integer becomes
//! a float. Float equality follows IEEE-754 (`NaN != NaN`).

use crate::error::{Error, Result};
use crate::file::FileRef;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single cell, nested record or row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    /// Missing value in a nullable column
    Null,
    /// Boolean value
    Bool(bool),
    /// Signed integer (int32 and int64 columns)
    Int(i64),
    /// Floating point (float32 and float64 columns)
    Float(f64),
    /// UTF-8 string (string and enum columns)
    String(String),
    /// Raw bytes, coerced to a local [`FileRef`] in binary columns
    Bytes(Vec<u8>),
    /// Array or tensor cell
    Array(Vec<Value>),
    /// Record cell or full row, keyed by field name
    Record(BTreeMap<String, Value>),
    /// Binary cell
    File(FileRef),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Record(a), Value::Record(b)) => a == b,
            (Value::File(a), Value::File(b)) => a == b,
            _ => false,
        }
    }
}

impl Value {
    /// Build a record from `(name, value)` pairs.
    pub fn record<K, I>(fields: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Record(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Get the type name as a string
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Array(_) => "array",
            Value::Record(_) => "record",
            Value::File(_) => "file",
        }
    }

    /// Check if this is a null value
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get as bool if this is a Bool value
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get as i64 if this is an Int value
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Get as f64 for Int and Float values
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Get as &str if this is a String value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get as &[Value] if this is an Array value
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Get as a field map if this is a Record value
    pub fn as_record(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Record(r) => Some(r),
            _ => None,
        }
    }

    /// Get as a file reference if this is a File value
    pub fn as_file(&self) -> Option<&FileRef> {
        match self {
            Value::File(f) => Some(f),
            _ => None,
        }
    }

    /// Follow a dotted path (`"box.x"`) through nested records.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        path.split('.').try_fold(self, |current, segment| match current {
            Value::Record(fields) => fields.get(segment),
            _ => None,
        })
    }

    /// Convert from a JSON value. Integers stay integers.
    pub fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(fields) => Value::Record(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Convert to a JSON value.
    ///
    /// Bytes, files and non-finite floats have no JSON form and are rejected.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        Ok(match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .ok_or_else(|| {
                    Error::InvalidArgument(format!("{} has no JSON representation", f))
                })?,
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => serde_json::Value::Array(
                items.iter().map(Value::to_json).collect::<Result<_>>()?,
            ),
            Value::Record(fields) => serde_json::Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), v.to_json()?)))
                    .collect::<Result<_>>()?,
            ),
            Value::Bytes(_) | Value::File(_) => {
                return Err(Error::InvalidArgument(format!(
                    "{} values have no JSON representation",
                    self.type_name()
                )))
            }
        })
    }
}

// ============================================================================
// From implementations for ergonomic API usage
// ============================================================================

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<FileRef> for Value {
    fn from(f: FileRef) -> Self {
        Value::File(f)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map(Into::into).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_int_never_equals_float() {
        assert_ne!(Value::Int(1), Value::Float(1.0));
        assert_eq!(Value::Float(-0.0), Value::Float(0.0));
        assert_ne!(Value::Float(f64::NAN), Value::Float(f64::NAN));
    }

    #[test]
    fn test_get_path_through_records() {
        let row = Value::record([
            ("id", Value::Int(7)),
            ("box", Value::record([("x", Value::Float(0.5))])),
        ]);
        assert_eq!(row.get_path("box.x"), Some(&Value::Float(0.5)));
        assert_eq!(row.get_path("id"), Some(&Value::Int(7)));
        assert_eq!(row.get_path("box.y"), None);
        assert_eq!(row.get_path("id.x"), None);
    }

    #[test]
    fn test_json_conversion_keeps_integers() {
        let value = Value::from_json(json!({"a": 1, "b": 1.5, "c": [true, null]}));
        assert_eq!(value.get_path("a"), Some(&Value::Int(1)));
        assert_eq!(value.get_path("b"), Some(&Value::Float(1.5)));
        assert_eq!(value.to_json().unwrap(), json!({"a": 1, "b": 1.5, "c": [true, null]}));
    }

    #[test]
    fn test_bytes_have_no_json_form() {
        assert!(Value::Bytes(vec![1]).to_json().is_err());
        assert!(Value::File(FileRef::bytes(vec![1])).to_json().is_err());
        assert!(Value::Float(f64::INFINITY).to_json().is_err());
    }

    #[test]
    fn test_option_into_value() {
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some("x")), Value::String("x".into()));
    }
}
