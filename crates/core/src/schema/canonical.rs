//! Canonical tree encoding
//!
//! Every type encodes to a JSON-shaped tree with a `"type"` key. Parameters
//! that hold their default value are omitted, so equal types always produce
//! equal trees. Record fields are a list of `{"name": .., "type": .., ...}`.
//! Template instances encode as their template name plus non-default
//! arguments and are re-expanded through a [`TypeResolver`] when decoded.

use super::package::Resolved;
use super::{Field, PrimitiveKind, SchemaType};
use crate::error::{Error, Result};
use serde_json::{Map, Value as Json};

/// Looks up template names while decoding canonical trees.
pub trait TypeResolver {
    /// Find the template named `name` and the package declaring it.
    fn resolve(&self, name: &str) -> Option<Resolved>;
}

/// Resolver that knows only the builtin types.
#[derive(Debug, Clone, Copy, Default)]
pub struct Builtins;

impl TypeResolver for Builtins {
    fn resolve(&self, _name: &str) -> Option<Resolved> {
        None
    }
}

impl SchemaType {
    /// Encode as a canonical tree.
    pub fn to_canonical(&self) -> Json {
        Json::Object(self.to_canonical_map())
    }

    fn to_canonical_map(&self) -> Map<String, Json> {
        let mut map = Map::new();
        map.insert("type".into(), Json::String(self.type_name().to_string()));
        match self {
            SchemaType::Primitive(p) => {
                if p.nullable {
                    map.insert("nullable".into(), Json::Bool(true));
                }
                for (key, bound) in [("minimum", p.minimum), ("maximum", p.maximum)] {
                    if let Some(bound) = bound {
                        map.insert(key.into(), number(p.kind, bound));
                    }
                }
            }
            SchemaType::Enum(e) => {
                map.insert(
                    "values".into(),
                    Json::Array(e.values.iter().cloned().map(Json::String).collect()),
                );
                if e.nullable {
                    map.insert("nullable".into(), Json::Bool(true));
                }
            }
            SchemaType::Array(a) => {
                map.insert("items".into(), a.items.to_canonical());
                if let Some(length) = a.length {
                    map.insert("length".into(), Json::from(length));
                }
            }
            SchemaType::Tensor(t) => {
                map.insert("shape".into(), Json::from(t.shape.clone()));
                map.insert("items".into(), t.items.to_canonical());
                if t.nullable {
                    map.insert("nullable".into(), Json::Bool(true));
                }
            }
            SchemaType::Record(r) => {
                let fields = r
                    .fields
                    .iter()
                    .map(|field| {
                        let mut entry = Map::new();
                        entry.insert("name".into(), Json::String(field.name.clone()));
                        entry.extend(field.ty.to_canonical_map());
                        Json::Object(entry)
                    })
                    .collect();
                map.insert("fields".into(), Json::Array(fields));
            }
            SchemaType::Template(t) => {
                for (key, value) in &t.arguments {
                    map.insert(key.clone(), value.clone());
                }
            }
        }
        map
    }

    /// Decode a canonical tree containing builtin types only.
    pub fn from_canonical(tree: &Json) -> Result<Self> {
        Self::from_canonical_in(tree, &Builtins)
    }

    /// Decode a canonical tree, resolving template names through `resolver`.
    pub fn from_canonical_in(tree: &Json, resolver: &dyn TypeResolver) -> Result<Self> {
        let map = tree
            .as_object()
            .ok_or_else(|| Error::schema("", format!("type must be an object, got {}", tree)))?;
        decode(map.clone(), resolver)
    }

    /// Encode as JSON text.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.to_canonical())?)
    }

    /// Decode from JSON text (builtin types only).
    pub fn from_json(text: &str) -> Result<Self> {
        Self::from_canonical(&serde_json::from_str(text)?)
    }

    /// Encode as YAML text.
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(&self.to_canonical())?)
    }

    /// Decode from YAML text (builtin types only).
    pub fn from_yaml(text: &str) -> Result<Self> {
        Self::from_canonical(&serde_yaml::from_str(text)?)
    }
}

fn decode(mut map: Map<String, Json>, resolver: &dyn TypeResolver) -> Result<SchemaType> {
    let name = match map.remove("type") {
        Some(Json::String(name)) => name,
        Some(other) => return Err(Error::schema("", format!("'type' must be a string, got {}", other))),
        None => return Err(Error::schema("", "missing 'type'")),
    };
    let builtin = PrimitiveKind::parse(&name).is_some()
        || matches!(name.as_str(), "enum" | "array" | "tensor" | "record");
    if !builtin {
        let resolved = resolver
            .resolve(&name)
            .ok_or_else(|| Error::schema("", format!("unknown type '{}'", name)))?;
        return resolved.instantiate(map.into_iter().collect());
    }
    let nullable = match map.remove("nullable") {
        None => false,
        Some(Json::Bool(b)) => b,
        Some(other) => return Err(Error::schema("", format!("'nullable' must be a bool, got {}", other))),
    };
    if nullable && matches!(name.as_str(), "array" | "record") {
        return Err(Error::schema("", format!("{} cannot be nullable", name)));
    }
    let apply_nullable = |ty: SchemaType| if nullable { ty.nullable() } else { ty };

    let ty = if let Some(kind) = PrimitiveKind::parse(&name) {
        let minimum = take_bound(&mut map, "minimum")?;
        let maximum = take_bound(&mut map, "maximum")?;
        let mut ty = apply_nullable(SchemaType::primitive_of(kind));
        if minimum.is_some() || maximum.is_some() {
            ty = ty.with_range(minimum, maximum)?;
        }
        ty
    } else {
        match name.as_str() {
            "enum" => {
                let values = take(&mut map, "values")?;
                let values: Vec<String> = serde_json::from_value(values)?;
                apply_nullable(SchemaType::enumeration(values)?)
            }
            "array" => {
                let items = decode_child(take(&mut map, "items")?, resolver)?;
                let length = match map.remove("length") {
                    None | Some(Json::Null) => None,
                    Some(v) => Some(serde_json::from_value::<usize>(v)?),
                };
                SchemaType::array(items, length)?
            }
            "tensor" => {
                let shape: Vec<usize> = serde_json::from_value(take(&mut map, "shape")?)?;
                let items = decode_child(take(&mut map, "items")?, resolver)?;
                apply_nullable(SchemaType::tensor(shape, items)?)
            }
            "record" => {
                let fields = match take(&mut map, "fields")? {
                    Json::Array(fields) => fields,
                    other => return Err(Error::schema("", format!("'fields' must be a list, got {}", other))),
                };
                let fields = fields
                    .into_iter()
                    .map(|field| decode_field(field, resolver))
                    .collect::<Result<Vec<_>>>()?;
                SchemaType::record(fields)?
            }
            _ => return Err(Error::schema("", format!("unknown type '{}'", name))),
        }
    };
    if let Some(key) = map.keys().next() {
        return Err(Error::schema("", format!("unexpected key '{}' for type {}", key, name)));
    }
    Ok(ty)
}

fn decode_child(tree: Json, resolver: &dyn TypeResolver) -> Result<SchemaType> {
    match tree {
        Json::Object(map) => decode(map, resolver),
        other => Err(Error::schema("", format!("type must be an object, got {}", other))),
    }
}

fn decode_field(tree: Json, resolver: &dyn TypeResolver) -> Result<Field> {
    let mut map = match tree {
        Json::Object(map) => map,
        other => return Err(Error::schema("", format!("field must be an object, got {}", other))),
    };
    let name = match map.remove("name") {
        Some(Json::String(name)) => name,
        _ => return Err(Error::schema("", "field is missing a string 'name'")),
    };
    let ty = decode(map, resolver).map_err(|e| match e {
        Error::SchemaValidation { path, message } if path.is_empty() => {
            Error::schema(name.clone(), message)
        }
        Error::SchemaValidation { path, message } => {
            Error::schema(format!("{}.{}", name, path), message)
        }
        other => other,
    })?;
    Ok(Field::new(name, ty))
}

fn take(map: &mut Map<String, Json>, key: &str) -> Result<Json> {
    map.remove(key)
        .ok_or_else(|| Error::schema("", format!("missing '{}'", key)))
}

fn take_bound(map: &mut Map<String, Json>, key: &str) -> Result<Option<f64>> {
    match map.remove(key) {
        None | Some(Json::Null) => Ok(None),
        Some(Json::Number(n)) => Ok(n.as_f64()),
        Some(other) => Err(Error::schema("", format!("'{}' must be a number, got {}", key, other))),
    }
}

fn number(kind: PrimitiveKind, value: f64) -> Json {
    if kind.is_integer() && value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        Json::from(value as i64)
    } else {
        serde_json::Number::from_f64(value).map_or(Json::Null, Json::Number)
    }
}

impl SchemaType {
    pub(super) fn primitive_of(kind: PrimitiveKind) -> Self {
        match kind {
            PrimitiveKind::Boolean => SchemaType::boolean(),
            PrimitiveKind::Binary => SchemaType::binary(),
            PrimitiveKind::String => SchemaType::string(),
            PrimitiveKind::Int32 => SchemaType::int32(),
            PrimitiveKind::Int64 => SchemaType::int64(),
            PrimitiveKind::Float32 => SchemaType::float32(),
            PrimitiveKind::Float64 => SchemaType::float64(),
        }
    }
}
