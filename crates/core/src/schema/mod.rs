//! Portex structural type system
//!
//! A [`SchemaType`] describes a cell, a column or a whole sheet. Types are
//! built through validated constructors, checked against values with
//! [`SchemaType::validate`] / [`SchemaType::coerce`], and serialized to a
//! canonical JSON/YAML tree that round-trips exactly.
//!
//! Template instances ([`TemplateInstance`]) are structurally identical to
//! their expansion but remember which template produced them. Records that
//! come out of a template are frozen: frames built on them reject mutation.

mod canonical;
mod package;
mod template;
mod validate;

pub use canonical::{Builtins, TypeResolver};
pub use package::{Import, ImportedType, Package, PackageRef, PackageRegistry, PackageSource, Resolved, Scope};
pub use template::{Parameter, Template};

use crate::error::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid"));

// ============================================================================
// Type tree
// ============================================================================

/// Primitive cell kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    /// true / false
    Boolean,
    /// File content referenced by key
    Binary,
    /// UTF-8 text
    String,
    /// 32-bit signed integer
    Int32,
    /// 64-bit signed integer
    Int64,
    /// 32-bit float
    Float32,
    /// 64-bit float
    Float64,
}

impl PrimitiveKind {
    /// Canonical type name.
    pub fn as_str(&self) -> &'static str {
        match self {
            PrimitiveKind::Boolean => "boolean",
            PrimitiveKind::Binary => "binary",
            PrimitiveKind::String => "string",
            PrimitiveKind::Int32 => "int32",
            PrimitiveKind::Int64 => "int64",
            PrimitiveKind::Float32 => "float32",
            PrimitiveKind::Float64 => "float64",
        }
    }

    /// Parse a canonical type name.
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "boolean" => PrimitiveKind::Boolean,
            "binary" => PrimitiveKind::Binary,
            "string" => PrimitiveKind::String,
            "int32" => PrimitiveKind::Int32,
            "int64" => PrimitiveKind::Int64,
            "float32" => PrimitiveKind::Float32,
            "float64" => PrimitiveKind::Float64,
            _ => return None,
        })
    }

    /// True for the four numeric kinds.
    pub fn is_numeric(&self) -> bool {
        self.is_integer() || matches!(self, PrimitiveKind::Float32 | PrimitiveKind::Float64)
    }

    /// True for int32 and int64.
    pub fn is_integer(&self) -> bool {
        matches!(self, PrimitiveKind::Int32 | PrimitiveKind::Int64)
    }
}

/// A primitive type with its optional constraints
#[derive(Debug, Clone, PartialEq)]
pub struct PrimitiveType {
    /// Which primitive
    pub kind: PrimitiveKind,
    /// Whether cells may be null
    pub nullable: bool,
    /// Inclusive lower bound (numeric kinds only)
    pub minimum: Option<f64>,
    /// Inclusive upper bound (numeric kinds only)
    pub maximum: Option<f64>,
}

/// Enumerated string type
#[derive(Debug, Clone, PartialEq)]
pub struct EnumType {
    /// Allowed values in declaration order
    pub values: Vec<String>,
    /// Whether cells may be null
    pub nullable: bool,
}

impl EnumType {
    /// Position of `value` in the declaration, if allowed.
    pub fn index_of(&self, value: &str) -> Option<usize> {
        self.values.iter().position(|v| v == value)
    }
}

/// Variable or fixed length array
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayType {
    /// Element type
    pub items: Box<SchemaType>,
    /// Fixed length, if any
    pub length: Option<usize>,
}

/// Fixed-shape numeric tensor
#[derive(Debug, Clone, PartialEq)]
pub struct TensorType {
    /// Dimensions, all non-zero
    pub shape: Vec<usize>,
    /// Element type (numeric or boolean primitive)
    pub items: Box<SchemaType>,
    /// Whether cells may be null
    pub nullable: bool,
}

/// One named field of a record
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    /// Field name, unique within the record
    pub name: String,
    /// Field type
    pub ty: SchemaType,
}

impl Field {
    /// Create a field.
    pub fn new(name: impl Into<String>, ty: SchemaType) -> Self {
        Field {
            name: name.into(),
            ty,
        }
    }
}

/// Ordered collection of named fields
#[derive(Debug, Clone, PartialEq)]
pub struct RecordType {
    /// Fields in declaration order
    pub fields: Vec<Field>,
    /// False when the record came out of a template
    pub mutable: bool,
}

impl RecordType {
    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Field names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }
}

/// Identity of the template an instance came from
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TemplateId {
    /// Template name
    pub name: String,
    /// Declaring package; `None` for the session's local package
    pub package: Option<PackageRef>,
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.package {
            Some(package) => write!(f, "{}:{}", package, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// A type produced by instantiating a template
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateInstance {
    /// Which template
    pub template: TemplateId,
    /// Arguments that differ from the parameter defaults
    pub arguments: BTreeMap<String, serde_json::Value>,
    /// The substituted declaration, frozen
    pub expanded: Box<SchemaType>,
}

/// A Portex type
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaType {
    /// boolean, binary, string and the numeric kinds
    Primitive(PrimitiveType),
    /// Enumerated string
    Enum(EnumType),
    /// Array of one element type
    Array(ArrayType),
    /// Fixed-shape tensor
    Tensor(TensorType),
    /// Named fields
    Record(RecordType),
    /// Instantiated template
    Template(TemplateInstance),
}

// ============================================================================
// Constructors
// ============================================================================

impl SchemaType {
    fn primitive(kind: PrimitiveKind) -> Self {
        SchemaType::Primitive(PrimitiveType {
            kind,
            nullable: false,
            minimum: None,
            maximum: None,
        })
    }

    /// `boolean`
    pub fn boolean() -> Self {
        Self::primitive(PrimitiveKind::Boolean)
    }

    /// `binary`
    pub fn binary() -> Self {
        Self::primitive(PrimitiveKind::Binary)
    }

    /// `string`
    pub fn string() -> Self {
        Self::primitive(PrimitiveKind::String)
    }

    /// `int32`
    pub fn int32() -> Self {
        Self::primitive(PrimitiveKind::Int32)
    }

    /// `int64`
    pub fn int64() -> Self {
        Self::primitive(PrimitiveKind::Int64)
    }

    /// `float32`
    pub fn float32() -> Self {
        Self::primitive(PrimitiveKind::Float32)
    }

    /// `float64`
    pub fn float64() -> Self {
        Self::primitive(PrimitiveKind::Float64)
    }

    /// Enumeration over identifier-like, unique values.
    pub fn enumeration<I, S>(values: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values: Vec<String> = values.into_iter().map(Into::into).collect();
        if values.is_empty() {
            return Err(Error::schema("", "enum requires at least one value"));
        }
        for (i, value) in values.iter().enumerate() {
            if !IDENTIFIER.is_match(value) {
                return Err(Error::schema(
                    "",
                    format!("enum value '{}' is not a valid identifier", value),
                ));
            }
            if values[..i].contains(value) {
                return Err(Error::schema("", format!("duplicate enum value '{}'", value)));
            }
        }
        Ok(SchemaType::Enum(EnumType {
            values,
            nullable: false,
        }))
    }

    /// Array of `items`, optionally of fixed length.
    pub fn array(items: SchemaType, length: Option<usize>) -> Result<Self> {
        if length == Some(0) {
            return Err(Error::schema("", "fixed array length must be positive"));
        }
        Ok(SchemaType::Array(ArrayType {
            items: Box::new(items),
            length,
        }))
    }

    /// Tensor of numeric or boolean `items` with the given shape.
    pub fn tensor(shape: Vec<usize>, items: SchemaType) -> Result<Self> {
        if shape.is_empty() || shape.contains(&0) {
            return Err(Error::schema(
                "",
                format!("tensor shape {:?} must have positive dimensions", shape),
            ));
        }
        match &items {
            SchemaType::Primitive(p)
                if p.kind.is_numeric() || p.kind == PrimitiveKind::Boolean => {}
            other => {
                return Err(Error::schema(
                    "",
                    format!("tensor items must be numeric or boolean, got {}", other.type_name()),
                ))
            }
        }
        Ok(SchemaType::Tensor(TensorType {
            shape,
            items: Box::new(items),
            nullable: false,
        }))
    }

    /// Mutable record over `fields`; names must be unique identifiers.
    pub fn record(fields: Vec<Field>) -> Result<Self> {
        for (i, field) in fields.iter().enumerate() {
            if field.name.is_empty() || field.name.contains('.') {
                return Err(Error::schema(
                    &field.name,
                    "field names must be non-empty and contain no '.'",
                ));
            }
            if fields[..i].iter().any(|f| f.name == field.name) {
                return Err(Error::schema(&field.name, "duplicate field name"));
            }
        }
        Ok(SchemaType::Record(RecordType {
            fields,
            mutable: true,
        }))
    }

    /// Mark as nullable. Records, arrays and template instances are never
    /// null; the flag has no effect on them.
    pub fn nullable(mut self) -> Self {
        match &mut self {
            SchemaType::Primitive(p) => p.nullable = true,
            SchemaType::Enum(e) => e.nullable = true,
            SchemaType::Tensor(t) => t.nullable = true,
            SchemaType::Array(_) | SchemaType::Record(_) | SchemaType::Template(_) => {}
        }
        self
    }

    /// Add inclusive bounds to a numeric type.
    pub fn with_range(mut self, minimum: Option<f64>, maximum: Option<f64>) -> Result<Self> {
        match &mut self {
            SchemaType::Primitive(p) if p.kind.is_numeric() => {
                if let Some(bound) = minimum.into_iter().chain(maximum).find(|b| !b.is_finite()) {
                    return Err(Error::schema("", format!("range bound {} is not finite", bound)));
                }
                if let (Some(lo), Some(hi)) = (minimum, maximum) {
                    if lo > hi {
                        return Err(Error::schema(
                            "",
                            format!("minimum {} exceeds maximum {}", lo, hi),
                        ));
                    }
                }
                p.minimum = minimum;
                p.maximum = maximum;
                Ok(self)
            }
            other => Err(Error::schema(
                "",
                format!("{} does not take a range", other.type_name()),
            )),
        }
    }
}

// ============================================================================
// Inspection
// ============================================================================

impl SchemaType {
    /// Canonical type name (template name for instances).
    pub fn type_name(&self) -> &str {
        match self {
            SchemaType::Primitive(p) => p.kind.as_str(),
            SchemaType::Enum(_) => "enum",
            SchemaType::Array(_) => "array",
            SchemaType::Tensor(_) => "tensor",
            SchemaType::Record(_) => "record",
            SchemaType::Template(t) => &t.template.name,
        }
    }

    /// The type with all template layers removed.
    pub fn expand(&self) -> &SchemaType {
        match self {
            SchemaType::Template(t) => t.expanded.expand(),
            other => other,
        }
    }

    /// Record view through template layers.
    pub fn as_record(&self) -> Option<&RecordType> {
        match self.expand() {
            SchemaType::Record(r) => Some(r),
            _ => None,
        }
    }

    /// Array view through template layers.
    pub fn as_array(&self) -> Option<&ArrayType> {
        match self.expand() {
            SchemaType::Array(a) => Some(a),
            _ => None,
        }
    }

    /// True when this type came out of a template.
    pub fn is_template(&self) -> bool {
        matches!(self, SchemaType::Template(_))
    }

    /// True if values of this type may be edited in place.
    pub fn is_mutable(&self) -> bool {
        match self {
            SchemaType::Template(_) => false,
            SchemaType::Record(r) => r.mutable,
            _ => true,
        }
    }

    /// Whether null is a valid value.
    pub fn is_nullable(&self) -> bool {
        match self.expand() {
            SchemaType::Primitive(p) => p.nullable,
            SchemaType::Enum(e) => e.nullable,
            SchemaType::Tensor(t) => t.nullable,
            _ => false,
        }
    }

    /// Number of leaf columns this type occupies.
    pub fn leaf_count(&self) -> usize {
        match self.expand() {
            SchemaType::Record(r) => r.fields.iter().map(|f| f.ty.leaf_count()).sum::<usize>().max(1),
            _ => 1,
        }
    }

    /// Structural equality: template instances compare as their expansion
    /// and record mutability is ignored.
    pub fn structurally_eq(&self, other: &SchemaType) -> bool {
        match (self.expand(), other.expand()) {
            (SchemaType::Record(a), SchemaType::Record(b)) => {
                a.fields.len() == b.fields.len()
                    && a
                        .fields
                        .iter()
                        .zip(&b.fields)
                        .all(|(x, y)| x.name == y.name && x.ty.structurally_eq(&y.ty))
            }
            (SchemaType::Array(a), SchemaType::Array(b)) => {
                a.length == b.length && a.items.structurally_eq(&b.items)
            }
            (SchemaType::Tensor(a), SchemaType::Tensor(b)) => {
                a.shape == b.shape && a.nullable == b.nullable && a.items.structurally_eq(&b.items)
            }
            (a, b) => a == b,
        }
    }

    /// Recursively mark records as immutable.
    pub(crate) fn freeze(&mut self) {
        match self {
            SchemaType::Record(r) => {
                r.mutable = false;
                for field in &mut r.fields {
                    field.ty.freeze();
                }
            }
            SchemaType::Array(a) => a.items.freeze(),
            SchemaType::Template(t) => t.expanded.freeze(),
            _ => {}
        }
    }
}

impl fmt::Display for SchemaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaType::Template(t) => write!(f, "{}", t.template),
            SchemaType::Array(a) => write!(f, "array<{}>", a.items),
            SchemaType::Record(r) => {
                f.write_str("record{")?;
                for (i, field) in r.fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", field.name, field.ty)?;
                }
                f.write_str("}")
            }
            other => f.write_str(other.type_name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_rejects_bad_identifiers() {
        assert!(SchemaType::enumeration(["cat", "dog_2"]).is_ok());
        assert!(SchemaType::enumeration(["2cat"]).unwrap_err().is_schema_validation());
        assert!(SchemaType::enumeration(["a b"]).is_err());
        assert!(SchemaType::enumeration(Vec::<String>::new()).is_err());
    }

    #[test]
    fn test_enum_rejects_duplicates() {
        let err = SchemaType::enumeration(["a", "b", "a"]).unwrap_err();
        assert!(err.to_string().contains("duplicate enum value 'a'"));
    }

    #[test]
    fn test_record_rejects_duplicate_fields() {
        let err = SchemaType::record(vec![
            Field::new("x", SchemaType::int32()),
            Field::new("x", SchemaType::string()),
        ])
        .unwrap_err();
        assert!(err.is_schema_validation());
    }

    #[test]
    fn test_record_rejects_dotted_names() {
        assert!(SchemaType::record(vec![Field::new("a.b", SchemaType::int32())]).is_err());
    }

    #[test]
    fn test_tensor_constraints() {
        assert!(SchemaType::tensor(vec![2, 3], SchemaType::float32()).is_ok());
        assert!(SchemaType::tensor(vec![2, 0], SchemaType::float32()).is_err());
        assert!(SchemaType::tensor(vec![2], SchemaType::string()).is_err());
    }

    #[test]
    fn test_range_only_on_numeric() {
        assert!(SchemaType::int32().with_range(Some(0.0), Some(10.0)).is_ok());
        assert!(SchemaType::int32().with_range(Some(5.0), Some(1.0)).is_err());
        assert!(SchemaType::string().with_range(Some(0.0), None).is_err());
    }

    #[test]
    fn test_range_rejects_non_finite_bounds() {
        for bound in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let err = SchemaType::float64().with_range(Some(bound), None).unwrap_err();
            assert!(err.is_schema_validation(), "{bound}: {err}");
            assert!(SchemaType::float64().with_range(Some(0.0), Some(bound)).is_err());
        }
        assert!(SchemaType::float64().with_range(Some(-1e300), Some(1e300)).is_ok());
    }

    #[test]
    fn test_leaf_count_through_nested_records() {
        let ty = SchemaType::record(vec![
            Field::new("a", SchemaType::int32()),
            Field::new(
                "b",
                SchemaType::record(vec![
                    Field::new("x", SchemaType::float32()),
                    Field::new("y", SchemaType::float32()),
                ])
                .unwrap(),
            ),
        ])
        .unwrap();
        assert_eq!(ty.leaf_count(), 3);
    }

    #[test]
    fn test_structural_eq_ignores_mutability() {
        let mut frozen = SchemaType::record(vec![Field::new("x", SchemaType::int32())]).unwrap();
        let open = frozen.clone();
        frozen.freeze();
        assert_ne!(frozen, open);
        assert!(frozen.structurally_eq(&open));
        assert!(!frozen.is_mutable());
    }

    #[test]
    fn test_display() {
        let ty = SchemaType::record(vec![
            Field::new("id", SchemaType::int64()),
            Field::new("tags", SchemaType::array(SchemaType::string(), None).unwrap()),
        ])
        .unwrap();
        assert_eq!(ty.to_string(), "record{id: int64, tags: array<string>}");
    }
}
