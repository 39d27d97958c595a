//! Values exchanged between the host and plugin objects.
//!
//! Plugins are not known at compile time, so every argument, return value and
//! yielded item travels as a [`Value`]. Structured data maps onto JSON; the one
//! extra variant is [`Value::Object`], which carries a plugin object (returned by
//! a meta-provider's `create_provider`).

use crate::object::PluginRef;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A dynamically typed value.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Integer(i64),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Object(PluginRef),
}

/// The declared shape of a parameter or return value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    /// No meaningful value.
    Unit,
    Bool,
    Integer,
    String,
    StringList,
    List,
    Map,
    /// A plugin object.
    Object,
    /// Anything.
    Any,
}

impl ValueKind {
    /// Whether a runtime value is acceptable for this kind.
    ///
    /// `Null` is accepted everywhere; optional arguments are passed as `Null`.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (ValueKind::Any, _) | (ValueKind::Unit, _) => true,
            (ValueKind::Bool, Value::Bool(_)) => true,
            (ValueKind::Integer, Value::Integer(_)) => true,
            (ValueKind::String, Value::String(_)) => true,
            (ValueKind::StringList, Value::List(items)) => {
                items.iter().all(|v| matches!(v, Value::String(_) | Value::Null))
            }
            (ValueKind::List, Value::List(_)) => true,
            (ValueKind::Map, Value::Map(_)) => true,
            (ValueKind::Object, Value::Object(_)) => true,
            _ => false,
        }
    }

    /// Whether a member declared with `actual` can stand in for `self`.
    pub fn is_compatible_with(&self, actual: ValueKind) -> bool {
        match (*self, actual) {
            (expected, actual) if expected == actual => true,
            (ValueKind::Any, _) | (_, ValueKind::Any) => true,
            (ValueKind::Unit, _) => true,
            (ValueKind::StringList, ValueKind::List) | (ValueKind::List, ValueKind::StringList) => {
                true
            }
            _ => false,
        }
    }

    /// Value returned by an unbound optional member of this kind.
    pub fn default_value(&self) -> Value {
        match self {
            ValueKind::Bool => Value::Bool(false),
            ValueKind::StringList | ValueKind::List => Value::List(Vec::new()),
            ValueKind::Map => Value::Map(BTreeMap::new()),
            _ => Value::Null,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Unit => "unit",
            ValueKind::Bool => "bool",
            ValueKind::Integer => "integer",
            ValueKind::String => "string",
            ValueKind::StringList => "string_list",
            ValueKind::List => "list",
            ValueKind::Map => "map",
            ValueKind::Object => "object",
            ValueKind::Any => "any",
        };
        f.write_str(name)
    }
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&PluginRef> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Collect a list of strings, skipping non-string entries. A single string
    /// is treated as a one-element list.
    pub fn to_string_list(&self) -> Vec<String> {
        match self {
            Value::List(items) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            Value::String(s) => vec![s.clone()],
            _ => Vec::new(),
        }
    }

    /// Convert to JSON. Plugin objects become their type name.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Integer(i) => serde_json::Value::from(*i),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::List(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
            Value::Map(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            Value::Object(o) => serde_json::Value::String(format!("<{}>", o.type_name())),
        }
    }

    /// Deserialize a typed record out of this value.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_value(self.to_json())
    }

    /// Serialize a typed record into a value.
    pub fn encode<T: Serialize>(record: &T) -> serde_json::Result<Value> {
        serde_json::to_value(record).map(Value::from)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Integer(i) => write!(f, "Integer({i})"),
            Value::String(s) => write!(f, "String({s:?})"),
            Value::List(items) => f.debug_list().entries(items).finish(),
            Value::Map(map) => f.debug_map().entries(map).finish(),
            Value::Object(o) => write!(f, "Object({})", o.type_name()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => std::sync::Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => Value::String(n.to_string()),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => Value::List(items.into_iter().map(Value::from).collect()),
            serde_json::Value::Object(map) => {
                Value::Map(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
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

impl From<Option<&str>> for Value {
    fn from(s: Option<&str>) -> Self {
        s.map(Value::from).unwrap_or(Value::Null)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<Vec<String>> for Value {
    fn from(items: Vec<String>) -> Self {
        Value::List(items.into_iter().map(Value::String).collect())
    }
}

impl From<Vec<&str>> for Value {
    fn from(items: Vec<&str>) -> Self {
        Value::List(items.into_iter().map(Value::from).collect())
    }
}

impl From<PluginRef> for Value {
    fn from(object: PluginRef) -> Self {
        Value::Object(object)
    }
}
