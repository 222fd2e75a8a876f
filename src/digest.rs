use sha1::{Digest, Sha1};

/// Name of the digest algorithm stored in data file headers.
pub const DIGEST_ALGORITHM: &str = "SHA-1";

/// Length in bytes of a digest produced by [`compute`].
pub const DIGEST_LEN: usize = 20;

/// Hash a payload. Pure function over the raw bytes.
pub fn compute(data: &[u8]) -> Vec<u8> {
    Sha1::digest(data).to_vec()
}

/// Check `data` against an expected digest.
pub fn verify(data: &[u8], expected: &[u8]) -> bool {
    compute(data).as_slice() == expected
}
