use crate::error::{Error, Result};

/// Size of the header page. The payload always starts at this offset.
pub const PAGE_SIZE: usize = 4096;

/// Byte offset of the version field inside the header page.
pub const VERSION_OFFSET: usize = 4;
/// Byte offset of the digest length field.
pub const DIGEST_LEN_OFFSET: usize = 8;
/// Byte offset of the digest bytes.
pub const DIGEST_OFFSET: usize = 12;

/// Largest digest that fits in the page after the fixed fields.
pub const MAX_DIGEST_LEN: usize = PAGE_SIZE - DIGEST_OFFSET;

/// The metadata page at offset 0 of both primary and backup files.
///
/// ```text
/// ┌────────────────┬──────────────┬──────────────────┬──────────────┬───────────┐
/// │ data_len (4B)  │ version (4B) │ digest_len (4B)  │ digest (var) │ zero pad  │
/// └────────────────┴──────────────┴──────────────────┴──────────────┴───────────┘
///  0                4              8                  12              .. PAGE_SIZE
/// ```
///
/// All integers are big-endian int32. `digest` hashes the payload that
/// follows the page and is empty when the payload is empty.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Header {
    pub data_len: usize,
    pub version: i32,
    pub digest: Vec<u8>,
}

impl Header {
    /// Header of a freshly initialized (empty) file.
    pub fn empty() -> Self {
        Header::default()
    }

    /// Encode into a full zero-padded page.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let data_len = i32::try_from(self.data_len).map_err(|_| {
            Error::UnsupportedValue(format!("payload of {} bytes exceeds int32", self.data_len))
        })?;
        if self.digest.len() > MAX_DIGEST_LEN {
            return Err(Error::UnsupportedValue(format!(
                "digest of {} bytes does not fit the header page",
                self.digest.len()
            )));
        }

        let mut page = vec![0u8; PAGE_SIZE];
        page[0..4].copy_from_slice(&data_len.to_be_bytes());
        page[VERSION_OFFSET..VERSION_OFFSET + 4].copy_from_slice(&self.version.to_be_bytes());
        page[DIGEST_LEN_OFFSET..DIGEST_LEN_OFFSET + 4]
            .copy_from_slice(&(self.digest.len() as i32).to_be_bytes());
        page[DIGEST_OFFSET..DIGEST_OFFSET + self.digest.len()].copy_from_slice(&self.digest);
        Ok(page)
    }

    /// Decode from (at least) the fixed fields of a page.
    pub fn decode(page: &[u8]) -> Result<Self> {
        if page.len() < DIGEST_OFFSET {
            return Err(Error::Corruption("header too short".into()));
        }
        let data_len = read_i32(page, 0);
        let version = read_i32(page, VERSION_OFFSET);
        let digest_len = read_i32(page, DIGEST_LEN_OFFSET);

        if data_len < 0 {
            return Err(Error::Corruption(format!("negative data length: {data_len}")));
        }
        if digest_len < 0 || digest_len as usize > MAX_DIGEST_LEN {
            return Err(Error::Corruption(format!("bad digest length: {digest_len}")));
        }
        let digest_end = DIGEST_OFFSET + digest_len as usize;
        if page.len() < digest_end {
            return Err(Error::Corruption("header truncated".into()));
        }

        Ok(Header {
            data_len: data_len as usize,
            version,
            digest: page[DIGEST_OFFSET..digest_end].to_vec(),
        })
    }

    /// Read only the version field. Used by the unlocked fast path.
    pub fn peek_version(page: &[u8]) -> i32 {
        read_i32(page, VERSION_OFFSET)
    }

    /// Total file size implied by this header.
    pub fn file_len(&self) -> u64 {
        (PAGE_SIZE + self.data_len) as u64
    }
}

/// Version that follows `prev`. Wraps from `i32::MAX` (or any non-positive
/// value) back to 1, so a written file never carries version 0.
pub fn next_version(prev: i32) -> i32 {
    if prev <= 0 || prev == i32::MAX {
        1
    } else {
        prev + 1
    }
}

fn read_i32(page: &[u8], offset: usize) -> i32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&page[offset..offset + 4]);
    i32::from_be_bytes(buf)
}
