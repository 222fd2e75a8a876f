use std::collections::HashSet;

use crate::error::Result;
use crate::types::{KeyValueMap, Value};

/// Callback shape for change notifications. No implementation in this crate
/// accepts one; the type exists so the refusal is explicit in the API.
pub type ChangeListener = Box<dyn Fn(&str) + Send + Sync>;

/// Read side of a preferences-style key-value store.
///
/// Typed getters return the stored value only when it has exactly the
/// requested variant; a missing key, a null, or a value of another type all
/// yield the caller's default. Errors are reserved for I/O and corruption.
pub trait Preferences {
    type Editor<'a>: PreferencesEditor
    where
        Self: 'a;

    /// Raw tagged value for `key`.
    fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Snapshot copy of every entry.
    fn get_all(&self) -> Result<KeyValueMap>;

    /// Start a batch of edits.
    fn edit(&self) -> Self::Editor<'_>;

    /// Push notifications are not offered; callers poll instead.
    fn register_change_listener(&self, listener: ChangeListener) -> Result<()>;

    fn unregister_change_listener(&self, listener: &ChangeListener) -> Result<()>;

    fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    fn get_bool(&self, key: &str, default: bool) -> Result<bool> {
        Ok(match self.get(key)? {
            Some(Value::Bool(v)) => v,
            _ => default,
        })
    }

    fn get_int(&self, key: &str, default: i32) -> Result<i32> {
        Ok(match self.get(key)? {
            Some(Value::Int(v)) => v,
            _ => default,
        })
    }

    fn get_long(&self, key: &str, default: i64) -> Result<i64> {
        Ok(match self.get(key)? {
            Some(Value::Long(v)) => v,
            _ => default,
        })
    }

    fn get_float(&self, key: &str, default: f32) -> Result<f32> {
        Ok(match self.get(key)? {
            Some(Value::Float(v)) => v,
            _ => default,
        })
    }

    fn get_string(&self, key: &str, default: &str) -> Result<String> {
        Ok(match self.get(key)? {
            Some(Value::String(v)) => v,
            _ => default.to_owned(),
        })
    }

    fn get_string_set(&self, key: &str, default: HashSet<String>) -> Result<HashSet<String>> {
        Ok(match self.get(key)? {
            Some(Value::StringSet(v)) => v,
            _ => default,
        })
    }
}

/// Write side: accumulate puts and removes, then commit them as one
/// transaction.
pub trait PreferencesEditor {
    /// Set `key` to `value`, replacing any earlier pending edit of `key`.
    fn put(&mut self, key: &str, value: Value) -> &mut Self;

    /// Delete `key` on commit. Distinct from storing a null.
    fn remove(&mut self, key: &str) -> &mut Self;

    /// Start the commit from an empty map; pending puts still apply.
    fn clear(&mut self) -> &mut Self;

    /// Apply all pending edits synchronously and durably.
    fn commit(&self) -> Result<()>;

    /// Deferred commit. Not offered: always fails with `Unsupported`.
    fn apply(&self) -> Result<()>;

    fn put_null(&mut self, key: &str) -> &mut Self {
        self.put(key, Value::Null)
    }

    fn put_bool(&mut self, key: &str, value: bool) -> &mut Self {
        self.put(key, Value::Bool(value))
    }

    fn put_int(&mut self, key: &str, value: i32) -> &mut Self {
        self.put(key, Value::Int(value))
    }

    fn put_long(&mut self, key: &str, value: i64) -> &mut Self {
        self.put(key, Value::Long(value))
    }

    fn put_float(&mut self, key: &str, value: f32) -> &mut Self {
        self.put(key, Value::Float(value))
    }

    fn put_string(&mut self, key: &str, value: &str) -> &mut Self {
        self.put(key, Value::String(value.to_owned()))
    }

    fn put_string_set(&mut self, key: &str, value: HashSet<String>) -> &mut Self {
        self.put(key, Value::StringSet(value))
    }
}
