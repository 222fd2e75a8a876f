//! Binary encoding of a [`KeyValueMap`](crate::types::KeyValueMap).
//!
//! A stream is a sequence of records closed by an end marker:
//!
//! ```text
//! ┌──────────┬───────────────────────┬──────────────────┐
//! │ tag (4B) │ key: len (4B) + utf8  │ payload (by tag) │  ... repeated
//! └──────────┴───────────────────────┴──────────────────┘
//! ┌──────────┐
//! │ -1 (4B)  │  end marker
//! └──────────┘
//! ```
//!
//! | tag | value        | payload                               |
//! |-----|--------------|---------------------------------------|
//! | 0   | null         | none                                  |
//! | 1   | true         | none                                  |
//! | 2   | false        | none                                  |
//! | 3   | int32        | 4B                                    |
//! | 4   | int64        | 8B                                    |
//! | 5   | float32      | 4B IEEE-754                           |
//! | 6   | string       | len (4B) + utf8                       |
//! | 7   | string set   | count (4B) + `count` strings          |
//!
//! Integers are big-endian. The decoder stops at the first tag outside
//! 0..=7, so the end marker and any later garbage are both "end of stream".

pub mod decoder;
pub mod encoder;

pub use decoder::Decoder;
pub use encoder::Encoder;

use crate::error::Result;
use crate::types::KeyValueMap;

/// Tag written after the last record.
pub const END_MARKER: i32 = -1;

/// Type tag preceding every record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Null = 0,
    True = 1,
    False = 2,
    Int = 3,
    Long = 4,
    Float = 5,
    String = 6,
    StringSet = 7,
}

impl Tag {
    /// `None` for anything outside 0..=7, which ends decoding.
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Tag::Null),
            1 => Some(Tag::True),
            2 => Some(Tag::False),
            3 => Some(Tag::Int),
            4 => Some(Tag::Long),
            5 => Some(Tag::Float),
            6 => Some(Tag::String),
            7 => Some(Tag::StringSet),
            _ => None,
        }
    }
}

/// Encode a whole map, end marker included.
pub fn encode(map: &KeyValueMap) -> Result<Vec<u8>> {
    Encoder::new().encode_map(map)
}

/// Decode a stream produced by [`encode`].
pub fn decode(data: &[u8]) -> Result<KeyValueMap> {
    Decoder::new(data).decode_map()
}
