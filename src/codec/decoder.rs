use std::collections::HashSet;

use crate::codec::Tag;
use crate::error::{Error, Result};
use crate::types::{KeyValueMap, Value};

/// Cursor over an encoded record stream.
///
/// Decoding stops cleanly at the end of the input or at the first tag
/// outside 0..=7. A record cut short in the middle is corruption.
pub struct Decoder<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Decoder { data, offset: 0 }
    }

    /// Bytes consumed so far.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn decode_map(&mut self) -> Result<KeyValueMap> {
        let mut map = KeyValueMap::new();
        while let Some((key, value)) = self.next_entry()? {
            map.insert(key, value);
        }
        Ok(map)
    }

    /// Next record, or `None` at end of stream.
    pub fn next_entry(&mut self) -> Result<Option<(String, Value)>> {
        if self.offset >= self.data.len() {
            return Ok(None);
        }
        let Some(tag) = Tag::from_i32(self.read_i32()?) else {
            return Ok(None);
        };
        let key = self.read_string()?;
        let value = match tag {
            Tag::Null => Value::Null,
            Tag::True => Value::Bool(true),
            Tag::False => Value::Bool(false),
            Tag::Int => Value::Int(self.read_i32()?),
            Tag::Long => Value::Long(i64::from_be_bytes(self.take_array()?)),
            Tag::Float => Value::Float(f32::from_be_bytes(self.take_array()?)),
            Tag::String => Value::String(self.read_string()?),
            Tag::StringSet => Value::StringSet(self.read_string_set()?),
        };
        Ok(Some((key, value)))
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .offset
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| {
                Error::Corruption(format!(
                    "record truncated at offset {}: need {n} bytes, {} left",
                    self.offset,
                    self.data.len() - self.offset
                ))
            })?;
        let bytes = &self.data[self.offset..end];
        self.offset = end;
        Ok(bytes)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.take_array()?))
    }

    fn read_len(&mut self) -> Result<usize> {
        let len = self.read_i32()?;
        usize::try_from(len).map_err(|_| Error::Corruption(format!("negative length: {len}")))
    }

    fn read_string(&mut self) -> Result<String> {
        let len = self.read_len()?;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| Error::Corruption(format!("invalid utf-8 string: {e}")))
    }

    fn read_string_set(&mut self) -> Result<HashSet<String>> {
        let count = self.read_len()?;
        // Bound the preallocation by what the input could possibly hold.
        let mut set = HashSet::with_capacity(count.min(self.data.len() / 4));
        for _ in 0..count {
            set.insert(self.read_string()?);
        }
        Ok(set)
    }
}
