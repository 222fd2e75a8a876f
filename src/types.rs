use std::collections::{HashMap, HashSet};

/// The decoded form of a store: string key → tagged value.
pub type KeyValueMap = HashMap<String, Value>;

/// A single stored value. Only flat scalars and string sets are supported.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i32),
    Long(i64),
    Float(f32),
    String(String),
    StringSet(HashSet<String>),
}

impl Value {
    /// Short variant name, used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Long(_) => "long",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::StringSet(_) => "string_set",
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

impl From<HashSet<String>> for Value {
    fn from(v: HashSet<String>) -> Self {
        Value::StringSet(v)
    }
}

/// One pending operation in a batch edit.
///
/// A tombstone deletes the key; `Set(Value::Null)` stores an explicit null.
/// The two are never confused.
#[derive(Debug, Clone, PartialEq)]
pub enum Edit {
    Set(Value),
    Tombstone,
}
