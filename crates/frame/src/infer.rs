//! Primitive type inference for raw column values

use portex_core::{Error, Result, SchemaType, Value};

/// Infer a primitive column type from `values`.
///
/// Integers widen to `float64` when mixed with floats, and any null makes
/// the type nullable. Nested values have no primitive type and are
/// rejected, as are empty or all-null inputs.
pub fn infer_primitive(values: &[Value]) -> Result<SchemaType> {
    let mut inferred: Option<SchemaType> = None;
    let mut nullable = false;
    for (i, value) in values.iter().enumerate() {
        let ty = match value {
            Value::Null => {
                nullable = true;
                continue;
            }
            Value::Bool(_) => SchemaType::boolean(),
            Value::Int(_) => SchemaType::int64(),
            Value::Float(_) => SchemaType::float64(),
            Value::String(_) => SchemaType::string(),
            Value::Bytes(_) | Value::File(_) => SchemaType::binary(),
            Value::Array(_) | Value::Record(_) => {
                return Err(Error::schema(
                    format!("[{}]", i),
                    format!("cannot infer a primitive type from {}", value.type_name()),
                ))
            }
        };
        inferred = Some(match inferred {
            None => ty,
            Some(current) if current == ty => current,
            Some(current) if is_number(&current) && is_number(&ty) => SchemaType::float64(),
            Some(current) => {
                return Err(Error::schema(
                    format!("[{}]", i),
                    format!("mixed column types {} and {}", current, ty),
                ))
            }
        });
    }
    let ty = inferred.ok_or_else(|| {
        Error::schema("", "cannot infer a type from empty or all-null values")
    })?;
    Ok(if nullable { ty.nullable() } else { ty })
}

fn is_number(ty: &SchemaType) -> bool {
    matches!(ty, SchemaType::Primitive(p) if p.kind.is_numeric())
}
