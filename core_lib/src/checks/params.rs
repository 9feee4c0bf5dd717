//! Declared parameter types and coercion into typed values.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    Str,
    Int,
    Float,
    Bool,
    /// Comma-separated in its string form.
    List,
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamType::Str => write!(f, "str"),
            ParamType::Int => write!(f, "int"),
            ParamType::Float => write!(f, "float"),
            ParamType::Bool => write!(f, "bool"),
            ParamType::List => write!(f, "list"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    List(Vec<String>),
}

impl ParamValue {
    pub fn type_of(&self) -> ParamType {
        match self {
            ParamValue::Str(_) => ParamType::Str,
            ParamValue::Int(_) => ParamType::Int,
            ParamValue::Float(_) => ParamType::Float,
            ParamValue::Bool(_) => ParamType::Bool,
            ParamValue::List(_) => ParamType::List,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl ParamType {
    /// Coerces the external string form, as received in a query string.
    pub fn coerce_str(&self, raw: &str) -> Result<ParamValue, String> {
        match self {
            ParamType::Str => Ok(ParamValue::Str(raw.to_string())),
            ParamType::Int => raw
                .trim()
                .parse::<i64>()
                .map(ParamValue::Int)
                .map_err(|_| format!("'{}' is not a valid integer", raw)),
            ParamType::Float => match raw.trim().parse::<f64>() {
                Ok(value) if value.is_finite() => Ok(ParamValue::Float(value)),
                _ => Err(format!("'{}' is not a valid number", raw)),
            },
            ParamType::Bool => match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Ok(ParamValue::Bool(true)),
                "false" | "0" | "no" | "off" => Ok(ParamValue::Bool(false)),
                _ => Err(format!("'{}' is not a valid boolean", raw)),
            },
            ParamType::List => Ok(ParamValue::List(
                raw.split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(str::to_string)
                    .collect(),
            )),
        }
    }

    /// Coerces a configured value. Strings go through [`ParamType::coerce_str`].
    pub fn coerce_json(&self, value: &serde_json::Value) -> Result<ParamValue, String> {
        use serde_json::Value;

        match (self, value) {
            (_, Value::String(raw)) => self.coerce_str(raw),
            (ParamType::Str, Value::Number(n)) => Ok(ParamValue::Str(n.to_string())),
            (ParamType::Str, Value::Bool(b)) => Ok(ParamValue::Str(b.to_string())),
            (ParamType::Int, Value::Number(n)) => n
                .as_i64()
                .map(ParamValue::Int)
                .ok_or_else(|| format!("{} is not a valid integer", n)),
            (ParamType::Float, Value::Number(n)) => n
                .as_f64()
                .map(ParamValue::Float)
                .ok_or_else(|| format!("{} is not a valid number", n)),
            (ParamType::Bool, Value::Bool(b)) => Ok(ParamValue::Bool(*b)),
            (ParamType::List, Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s.clone()),
                    Value::Number(n) => Ok(n.to_string()),
                    other => Err(format!("{} is not a valid list item", other)),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(ParamValue::List),
            (ty, other) => Err(format!("{} is not a valid {}", other, ty)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub ty: ParamType,
    pub default: Option<ParamValue>,
}

impl ParamSpec {
    pub fn is_required(&self) -> bool {
        self.default.is_none()
    }
}

/// The parameters a contract accepts, with the subsets callers may override
/// and responses may show.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSchema {
    params: BTreeMap<String, ParamSpec>,
    overridable: BTreeSet<String>,
    exposed: BTreeSet<String>,
}

impl ParameterSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(mut self, name: &str, ty: ParamType) -> Self {
        self.params.insert(name.to_string(), ParamSpec { ty, default: None });
        self
    }

    pub fn optional(mut self, name: &str, ty: ParamType, default: ParamValue) -> Self {
        self.params.insert(
            name.to_string(),
            ParamSpec {
                ty,
                default: Some(default),
            },
        );
        self
    }

    pub fn overridable(mut self, names: &[&str]) -> Self {
        self.overridable.extend(names.iter().map(|n| n.to_string()));
        self
    }

    pub fn exposed(mut self, names: &[&str]) -> Self {
        self.exposed.extend(names.iter().map(|n| n.to_string()));
        self
    }

    pub fn get(&self, name: &str) -> Option<&ParamSpec> {
        self.params.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamSpec)> {
        self.params.iter()
    }

    pub fn overridable_names(&self) -> &BTreeSet<String> {
        &self.overridable
    }

    pub fn exposed_names(&self) -> &BTreeSet<String> {
        &self.exposed
    }

    /// Names listed as overridable or exposed that the schema does not declare.
    pub fn undeclared_names(&self) -> Vec<&str> {
        self.overridable
            .iter()
            .chain(self.exposed.iter())
            .filter(|name| !self.params.contains_key(*name))
            .map(String::as_str)
            .collect()
    }
}

/// Effective, typed parameters handed to a contract. Always sorted by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CheckParams(BTreeMap<String, ParamValue>);

impl CheckParams {
    pub fn new(values: BTreeMap<String, ParamValue>) -> Self {
        Self(values)
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn insert(&mut self, name: String, value: ParamValue) {
        self.0.insert(name, value);
    }

    fn missing(name: &str, expected: ParamType) -> anyhow::Error {
        anyhow::anyhow!("parameter '{}' is missing or not a {}", name, expected)
    }

    pub fn str(&self, name: &str) -> anyhow::Result<&str> {
        match self.get(name) {
            Some(ParamValue::Str(value)) => Ok(value),
            _ => Err(Self::missing(name, ParamType::Str)),
        }
    }

    pub fn int(&self, name: &str) -> anyhow::Result<i64> {
        match self.get(name) {
            Some(ParamValue::Int(value)) => Ok(*value),
            _ => Err(Self::missing(name, ParamType::Int)),
        }
    }

    pub fn float(&self, name: &str) -> anyhow::Result<f64> {
        match self.get(name) {
            Some(ParamValue::Float(value)) => Ok(*value),
            Some(ParamValue::Int(value)) => Ok(*value as f64),
            _ => Err(Self::missing(name, ParamType::Float)),
        }
    }

    pub fn bool(&self, name: &str) -> anyhow::Result<bool> {
        match self.get(name) {
            Some(ParamValue::Bool(value)) => Ok(*value),
            _ => Err(Self::missing(name, ParamType::Bool)),
        }
    }

    pub fn list(&self, name: &str) -> anyhow::Result<&[String]> {
        match self.get(name) {
            Some(ParamValue::List(value)) => Ok(value),
            _ => Err(Self::missing(name, ParamType::List)),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.0
                .iter()
                .map(|(name, value)| (name.clone(), value.to_json()))
                .collect(),
        )
    }
}
