use std::collections::HashSet;

use crate::codec::{Tag, END_MARKER};
use crate::error::{Error, Result};
use crate::types::{KeyValueMap, Value};

/// Serializes maps into the tagged record stream.
///
/// The output buffer is handed to the caller, not copied. The encoder keeps
/// only the length of its previous output and preallocates that much for the
/// next call, since successive commits of one store are close in size.
#[derive(Debug, Default)]
pub struct Encoder {
    buf: Vec<u8>,
    size_hint: usize,
}

impl Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode every entry of `map` followed by the end marker.
    pub fn encode_map(&mut self, map: &KeyValueMap) -> Result<Vec<u8>> {
        self.buf = Vec::with_capacity(self.size_hint);
        for (key, value) in map {
            self.encode_entry(key, value)?;
        }
        self.put_i32(END_MARKER);
        let out = std::mem::take(&mut self.buf);
        self.size_hint = out.len();
        Ok(out)
    }

    fn encode_entry(&mut self, key: &str, value: &Value) -> Result<()> {
        match value {
            Value::Null => self.header(Tag::Null, key),
            Value::Bool(true) => self.header(Tag::True, key),
            Value::Bool(false) => self.header(Tag::False, key),
            Value::Int(v) => {
                self.header(Tag::Int, key)?;
                self.put_i32(*v);
                Ok(())
            }
            Value::Long(v) => {
                self.header(Tag::Long, key)?;
                self.buf.extend_from_slice(&v.to_be_bytes());
                Ok(())
            }
            Value::Float(v) => {
                self.header(Tag::Float, key)?;
                self.buf.extend_from_slice(&v.to_be_bytes());
                Ok(())
            }
            Value::String(s) => {
                self.header(Tag::String, key)?;
                self.put_string(s)
            }
            Value::StringSet(set) => {
                self.header(Tag::StringSet, key)?;
                self.put_string_set(set)
            }
        }
    }

    fn header(&mut self, tag: Tag, key: &str) -> Result<()> {
        self.put_i32(tag as i32);
        self.put_string(key)
    }

    fn put_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    fn put_len(&mut self, len: usize, what: &str) -> Result<()> {
        let len = i32::try_from(len).map_err(|_| {
            Error::UnsupportedValue(format!("{what} of length {len} exceeds int32 prefix"))
        })?;
        self.put_i32(len);
        Ok(())
    }

    fn put_string(&mut self, s: &str) -> Result<()> {
        self.put_len(s.len(), "string")?;
        self.buf.extend_from_slice(s.as_bytes());
        Ok(())
    }

    fn put_string_set(&mut self, set: &HashSet<String>) -> Result<()> {
        self.put_len(set.len(), "string set")?;
        for s in set {
            self.put_string(s)?;
        }
        Ok(())
    }
}
