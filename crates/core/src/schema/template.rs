//! Parametric type templates
//!
//! A template is a named declaration tree with parameters. Instantiation
//! binds arguments (falling back to defaults), substitutes them into the
//! declaration and decodes the result as an ordinary type.
//!
//! Declaration grammar:
//! - `"$params.x"` is replaced by the value of `x`
//! - `{"+": "$params.x", ...}` merges the mapping bound to `x` into the node
//! - `"+$params.x"` inside a list splices the list bound to `x`
//! - `"exist_if": "<expr>"` drops the node when the expression is false;
//!   `<expr>` is a parameter, or two operands joined by `==`, `!=`, `>=`,
//!   `<=`, `>` or `<`

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use std::cmp::Ordering;
use std::collections::BTreeMap;

const PARAMS_PREFIX: &str = "$params.";
const SPLICE_PREFIX: &str = "+$params.";
const OPERATORS: [&str; 6] = ["==", "!=", ">=", "<=", ">", "<"];
/// Keys an instance already uses for its field name and type
const RESERVED_PARAMETERS: [&str; 2] = ["name", "type"];

/// A template parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    /// Parameter name, referenced as `$params.<name>`
    pub name: String,
    /// Value used when the argument is omitted; required when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Json>,
    /// Closed set of accepted values
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<Json>>,
}

impl Parameter {
    /// Required parameter.
    pub fn required(name: impl Into<String>) -> Self {
        Parameter {
            name: name.into(),
            default: None,
            options: None,
        }
    }

    /// Parameter with a default value.
    pub fn with_default(name: impl Into<String>, default: Json) -> Self {
        Parameter {
            name: name.into(),
            default: Some(default),
            options: None,
        }
    }
}

/// A named, parametric type declaration
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    /// Name used in canonical trees
    pub name: String,
    /// Declared parameters
    pub parameters: Vec<Parameter>,
    /// Declaration tree before substitution
    pub declaration: Json,
}

#[derive(Deserialize)]
struct TemplateTree {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    parameters: Vec<Parameter>,
    declaration: Json,
}

impl Template {
    /// Create a template; parameter names must be unique and may not be
    /// `name` or `type`.
    pub fn new(name: impl Into<String>, parameters: Vec<Parameter>, declaration: Json) -> Result<Self> {
        let name = name.into();
        for (i, param) in parameters.iter().enumerate() {
            if RESERVED_PARAMETERS.contains(&param.name.as_str()) {
                return Err(Error::Template(format!(
                    "template '{}' cannot declare a parameter named '{}'",
                    name, param.name
                )));
            }
            if parameters[..i].iter().any(|p| p.name == param.name) {
                return Err(Error::Template(format!(
                    "template '{}' declares parameter '{}' twice",
                    name, param.name
                )));
            }
            if let (Some(default), Some(options)) = (&param.default, &param.options) {
                if !options.contains(default) {
                    return Err(Error::Template(format!(
                        "default of '{}' is not one of its options",
                        param.name
                    )));
                }
            }
        }
        Ok(Template {
            name,
            parameters,
            declaration,
        })
    }

    /// Decode `{"type": "template", "parameters": [..], "declaration": {..}}`.
    pub fn from_canonical(name: impl Into<String>, tree: &Json) -> Result<Self> {
        let name = name.into();
        let parsed: TemplateTree = serde_json::from_value(tree.clone())
            .map_err(|e| Error::Template(format!("invalid declaration of '{}': {}", name, e)))?;
        if parsed.kind != "template" {
            return Err(Error::Template(format!(
                "'{}' is a {}, not a template",
                name, parsed.kind
            )));
        }
        Template::new(name, parsed.parameters, parsed.declaration)
    }

    /// Encode as a canonical template tree.
    pub fn to_canonical(&self) -> Result<Json> {
        let mut map = Map::new();
        map.insert("type".into(), Json::String("template".into()));
        if !self.parameters.is_empty() {
            map.insert("parameters".into(), serde_json::to_value(&self.parameters)?);
        }
        map.insert("declaration".into(), self.declaration.clone());
        Ok(Json::Object(map))
    }

    /// Bind `arguments` to parameters.
    ///
    /// Returns every parameter's effective value and the subset of
    /// arguments that differ from their defaults.
    pub fn bind(
        &self,
        mut arguments: BTreeMap<String, Json>,
    ) -> Result<(BTreeMap<String, Json>, BTreeMap<String, Json>)> {
        let mut effective = BTreeMap::new();
        let mut explicit = BTreeMap::new();
        for param in &self.parameters {
            let value = match (arguments.remove(&param.name), &param.default) {
                (Some(value), Some(default)) if &value == default => value,
                (Some(value), _) => {
                    explicit.insert(param.name.clone(), value.clone());
                    value
                }
                (None, Some(default)) => default.clone(),
                (None, None) => {
                    return Err(Error::Template(format!(
                        "template '{}' requires parameter '{}'",
                        self.name, param.name
                    )))
                }
            };
            if let Some(options) = &param.options {
                if !options.contains(&value) {
                    return Err(Error::Template(format!(
                        "{} is not an allowed value of '{}'",
                        value, param.name
                    )));
                }
            }
            effective.insert(param.name.clone(), value);
        }
        if let Some(unknown) = arguments.keys().next() {
            return Err(Error::Template(format!(
                "template '{}' has no parameter '{}'",
                self.name, unknown
            )));
        }
        Ok((effective, explicit))
    }

    /// Substitute bound parameters into the declaration.
    pub fn expand(&self, params: &BTreeMap<String, Json>) -> Result<Json> {
        substitute(&self.declaration, params)?.ok_or_else(|| {
            Error::Template(format!("declaration of '{}' was removed by exist_if", self.name))
        })
    }
}

fn lookup(name: &str, params: &BTreeMap<String, Json>) -> Result<Json> {
    params
        .get(name)
        .cloned()
        .ok_or_else(|| Error::Template(format!("unknown parameter '{}'", name)))
}

fn substitute(node: &Json, params: &BTreeMap<String, Json>) -> Result<Option<Json>> {
    match node {
        Json::String(s) => match s.strip_prefix(PARAMS_PREFIX) {
            Some(name) => lookup(name, params).map(Some),
            None => Ok(Some(node.clone())),
        },
        Json::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                if let Some(name) = item.as_str().and_then(|s| s.strip_prefix(SPLICE_PREFIX)) {
                    match lookup(name, params)? {
                        Json::Array(spliced) => out.extend(spliced),
                        Json::Null => {}
                        other => {
                            return Err(Error::Template(format!(
                                "cannot splice non-list {} from '{}'",
                                other, name
                            )))
                        }
                    }
                } else if let Some(value) = substitute(item, params)? {
                    out.push(value);
                }
            }
            Ok(Some(Json::Array(out)))
        }
        Json::Object(map) => {
            if let Some(condition) = map.get("exist_if") {
                if !holds(condition, params)? {
                    return Ok(None);
                }
            }
            let mut out = Map::new();
            if let Some(unpack) = map.get("+") {
                match substitute(unpack, params)? {
                    Some(Json::Object(entries)) => out.extend(entries),
                    Some(Json::Null) | None => {}
                    Some(other) => {
                        return Err(Error::Template(format!("cannot unpack non-mapping {}", other)))
                    }
                }
            }
            for (key, value) in map {
                if key == "exist_if" || key == "+" {
                    continue;
                }
                if let Some(value) = substitute(value, params)? {
                    out.insert(key.clone(), value);
                }
            }
            Ok(Some(Json::Object(out)))
        }
        other => Ok(Some(other.clone())),
    }
}

fn holds(condition: &Json, params: &BTreeMap<String, Json>) -> Result<bool> {
    match condition {
        Json::Bool(b) => Ok(*b),
        Json::String(expr) => evaluate(expr, params),
        other => Err(Error::Template(format!("invalid exist_if condition {}", other))),
    }
}

fn evaluate(expr: &str, params: &BTreeMap<String, Json>) -> Result<bool> {
    for op in OPERATORS {
        if let Some((lhs, rhs)) = expr.split_once(op) {
            let lhs = operand(lhs, params)?;
            let rhs = operand(rhs, params)?;
            return match op {
                "==" => Ok(loose_eq(&lhs, &rhs)),
                "!=" => Ok(!loose_eq(&lhs, &rhs)),
                _ => {
                    let ordering = order(&lhs, &rhs).ok_or_else(|| {
                        Error::Template(format!("cannot order {} and {} in '{}'", lhs, rhs, expr))
                    })?;
                    Ok(match op {
                        ">=" => ordering != Ordering::Less,
                        "<=" => ordering != Ordering::Greater,
                        ">" => ordering == Ordering::Greater,
                        _ => ordering == Ordering::Less,
                    })
                }
            };
        }
    }
    Ok(truthy(&operand(expr, params)?))
}

fn operand(text: &str, params: &BTreeMap<String, Json>) -> Result<Json> {
    let text = text.trim();
    if let Some(name) = text.strip_prefix(PARAMS_PREFIX) {
        return lookup(name, params);
    }
    if let Some(quoted) = text.strip_prefix('\'').and_then(|t| t.strip_suffix('\'')) {
        return Ok(Json::String(quoted.to_string()));
    }
    Ok(serde_json::from_str(text).unwrap_or_else(|_| Json::String(text.to_string())))
}

fn loose_eq(a: &Json, b: &Json) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn order(a: &Json, b: &Json) -> Option<Ordering> {
    match (a, b) {
        (Json::Number(_), Json::Number(_)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Json::String(x), Json::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn truthy(value: &Json) -> bool {
    match value {
        Json::Null => false,
        Json::Bool(b) => *b,
        Json::Number(n) => n.as_f64().map_or(false, |f| f != 0.0),
        Json::String(s) => !s.is_empty(),
        Json::Array(a) => !a.is_empty(),
        Json::Object(o) => !o.is_empty(),
    }
}
