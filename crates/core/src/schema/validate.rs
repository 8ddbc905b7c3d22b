//! Value validation and coercion against a [`SchemaType`]

use super::{PrimitiveKind, PrimitiveType, SchemaType};
use crate::error::{Error, Result};
use crate::file::FileRef;
use crate::value::Value;
use std::collections::BTreeMap;

impl SchemaType {
    /// Check that `value` conforms to this type.
    pub fn validate(&self, value: &Value) -> Result<()> {
        self.coerce_at(value.clone(), "").map(|_| ())
    }

    /// Validate and normalize `value`.
    ///
    /// Integers become floats in float columns and raw bytes become local
    /// file references in binary columns. Missing nullable record fields are
    /// filled with null.
    pub fn coerce(&self, value: Value) -> Result<Value> {
        self.coerce_at(value, "")
    }

    pub(crate) fn coerce_at(&self, value: Value, path: &str) -> Result<Value> {
        match self {
            SchemaType::Template(t) => t.expanded.coerce_at(value, path),
            _ if value.is_null() => {
                if self.is_nullable() {
                    Ok(Value::Null)
                } else {
                    Err(Error::schema(path, format!("null is not allowed for {}", self)))
                }
            }
            SchemaType::Primitive(p) => coerce_primitive(p, value, path),
            SchemaType::Enum(e) => match value {
                Value::String(s) if e.index_of(&s).is_some() => Ok(Value::String(s)),
                Value::String(s) => Err(Error::schema(
                    path,
                    format!("'{}' is not one of {:?}", s, e.values),
                )),
                other => Err(mismatch(path, "enum", &other)),
            },
            SchemaType::Array(a) => {
                let items = match value {
                    Value::Array(items) => items,
                    other => return Err(mismatch(path, "array", &other)),
                };
                if let Some(length) = a.length {
                    if items.len() != length {
                        return Err(Error::schema(
                            path,
                            format!("expected {} items, got {}", length, items.len()),
                        ));
                    }
                }
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, item)| a.items.coerce_at(item, &format!("{}[{}]", path, i)))
                    .collect::<Result<Vec<_>>>()
                    .map(Value::Array)
            }
            SchemaType::Tensor(t) => coerce_tensor(&t.shape, &t.items, value, path),
            SchemaType::Record(r) => {
                let mut fields = match value {
                    Value::Record(fields) => fields,
                    other => return Err(mismatch(path, "record", &other)),
                };
                let mut out = BTreeMap::new();
                for field in &r.fields {
                    let field_path = join(path, &field.name);
                    let cell = match fields.remove(&field.name) {
                        Some(cell) => cell,
                        None if field.ty.is_nullable() => Value::Null,
                        None => return Err(Error::schema(field_path, "missing field")),
                    };
                    out.insert(field.name.clone(), field.ty.coerce_at(cell, &field_path)?);
                }
                if let Some(extra) = fields.keys().next() {
                    return Err(Error::schema(join(path, extra), "unknown field"));
                }
                Ok(Value::Record(out))
            }
        }
    }
}

fn coerce_primitive(p: &PrimitiveType, value: Value, path: &str) -> Result<Value> {
    let coerced = match (p.kind, value) {
        (PrimitiveKind::Boolean, Value::Bool(b)) => Value::Bool(b),
        (PrimitiveKind::String, Value::String(s)) => Value::String(s),
        (PrimitiveKind::Binary, Value::File(f)) => Value::File(f),
        (PrimitiveKind::Binary, Value::Bytes(b)) => Value::File(FileRef::bytes(b)),
        (PrimitiveKind::Int32, Value::Int(i)) => {
            if i32::try_from(i).is_err() {
                return Err(Error::schema(path, format!("{} is out of int32 range", i)));
            }
            Value::Int(i)
        }
        (PrimitiveKind::Int64, Value::Int(i)) => Value::Int(i),
        (PrimitiveKind::Float32, Value::Float(f)) if f.is_finite() && f.abs() > f32::MAX as f64 => {
            return Err(Error::schema(path, format!("{} is out of float32 range", f)));
        }
        (PrimitiveKind::Float32 | PrimitiveKind::Float64, Value::Float(f)) => Value::Float(f),
        (PrimitiveKind::Float32 | PrimitiveKind::Float64, Value::Int(i)) => Value::Float(i as f64),
        (kind, other) => return Err(mismatch(path, kind.as_str(), &other)),
    };
    if let Some(n) = coerced.as_number() {
        if p.minimum.map_or(false, |lo| n < lo) || p.maximum.map_or(false, |hi| n > hi) {
            return Err(Error::schema(
                path,
                format!(
                    "{} is outside [{}, {}]",
                    n,
                    p.minimum.map_or("-inf".to_string(), |v| v.to_string()),
                    p.maximum.map_or("inf".to_string(), |v| v.to_string()),
                ),
            ));
        }
    }
    Ok(coerced)
}

fn coerce_tensor(shape: &[usize], items: &SchemaType, value: Value, path: &str) -> Result<Value> {
    let Some((&dim, rest)) = shape.split_first() else {
        return items.coerce_at(value, path);
    };
    let elements = match value {
        Value::Array(elements) => elements,
        other => return Err(mismatch(path, "tensor", &other)),
    };
    if elements.len() != dim {
        return Err(Error::schema(
            path,
            format!("expected dimension {}, got {}", dim, elements.len()),
        ));
    }
    elements
        .into_iter()
        .enumerate()
        .map(|(i, e)| coerce_tensor(rest, items, e, &format!("{}[{}]", path, i)))
        .collect::<Result<Vec<_>>>()
        .map(Value::Array)
}

fn join(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", path, name)
    }
}

fn mismatch(path: &str, expected: &str, got: &Value) -> Error {
    Error::schema(path, format!("expected {}, got {}", expected, got.type_name()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Field;

    fn bbox() -> SchemaType {
        SchemaType::record(vec![
            Field::new("x", SchemaType::float32()),
            Field::new("y", SchemaType::float32()),
            Field::new("label", SchemaType::enumeration(["cat", "dog"]).unwrap()),
            Field::new("note", SchemaType::string().nullable()),
        ])
        .unwrap()
    }

    #[test]
    fn test_int_coerced_to_float() {
        let out = SchemaType::float64().coerce(Value::Int(3)).unwrap();
        assert_eq!(out, Value::Float(3.0));
        assert!(SchemaType::int32().coerce(Value::Float(3.0)).is_err());
    }

    #[test]
    fn test_int32_range() {
        assert!(SchemaType::int32().validate(&Value::Int(i32::MAX as i64)).is_ok());
        assert!(SchemaType::int32().validate(&Value::Int(i32::MAX as i64 + 1)).is_err());
        assert!(SchemaType::int64().validate(&Value::Int(i64::MAX)).is_ok());
    }

    #[test]
    fn test_numeric_bounds() {
        let ty = SchemaType::int32().with_range(Some(0.0), Some(9.0)).unwrap();
        assert!(ty.validate(&Value::Int(9)).is_ok());
        let err = ty.validate(&Value::Int(10)).unwrap_err();
        assert!(err.to_string().contains("outside [0, 9]"));
    }

    #[test]
    fn test_bytes_become_local_file() {
        let out = SchemaType::binary().coerce(Value::Bytes(vec![1, 2])).unwrap();
        assert_eq!(out, Value::File(FileRef::bytes(vec![1, 2])));
    }

    #[test]
    fn test_null_handling() {
        assert!(SchemaType::string().validate(&Value::Null).is_err());
        assert!(SchemaType::string().nullable().validate(&Value::Null).is_ok());
    }

    #[test]
    fn test_record_fills_missing_nullable_fields() {
        let row = Value::record([
            ("x", Value::Float(1.0)),
            ("y", Value::Int(2)),
            ("label", Value::from("cat")),
        ]);
        let out = bbox().coerce(row).unwrap();
        assert_eq!(out.get_path("note"), Some(&Value::Null));
        assert_eq!(out.get_path("y"), Some(&Value::Float(2.0)));
    }

    #[test]
    fn test_record_error_names_field_path() {
        let ty = SchemaType::record(vec![Field::new("box", bbox())]).unwrap();
        let row = Value::record([(
            "box",
            Value::record([
                ("x", Value::Float(1.0)),
                ("y", Value::Float(1.0)),
                ("label", Value::from("bird")),
            ]),
        )]);
        match ty.validate(&row).unwrap_err() {
            Error::SchemaValidation { path, message } => {
                assert_eq!(path, "box.label");
                assert!(message.contains("'bird'"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_record_rejects_unknown_fields() {
        let row = Value::record([("x", Value::Float(1.0)), ("z", Value::Int(1))]);
        let err = SchemaType::record(vec![Field::new("x", SchemaType::float64())])
            .unwrap()
            .validate(&row)
            .unwrap_err();
        assert!(err.to_string().contains("unknown field"));
    }

    #[test]
    fn test_fixed_length_array() {
        let ty = SchemaType::array(SchemaType::int32(), Some(2)).unwrap();
        assert!(ty.validate(&Value::Array(vec![1.into(), 2.into()])).is_ok());
        let err = ty.validate(&Value::Array(vec![1.into()])).unwrap_err();
        assert!(err.to_string().contains("expected 2 items"));
    }

    #[test]
    fn test_tensor_shape() {
        let ty = SchemaType::tensor(vec![2, 2], SchemaType::float32()).unwrap();
        let good = Value::Array(vec![
            Value::Array(vec![1.into(), 2.into()]),
            Value::Array(vec![3.into(), 4.into()]),
        ]);
        assert!(ty.validate(&good).is_ok());
        let bad = Value::Array(vec![Value::Array(vec![1.into(), 2.into()])]);
        assert!(ty.validate(&bad).is_err());
    }
}
