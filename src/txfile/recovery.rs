use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::digest;
use crate::error::{Error, Result};
use crate::txfile::header::{Header, PAGE_SIZE};

/// What the open-time validation had to do to produce a usable primary file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// The primary file verified; nothing was touched.
    Valid,
    /// The primary was damaged and was overwritten with the backup.
    RestoredFromBackup,
    /// Neither file verified; the primary was reset to an empty header page.
    Initialized,
}

/// Validate-and-recover, run once at open while holding the file lock.
///
/// 1. Primary verifies → done.
/// 2. Backup verifies → copy the whole backup over the primary, fsync.
/// 3. Otherwise → zero-filled header page (`len=0, version=0`), fsync.
///
/// Only a failure to write the primary is an error here; damaged data is
/// always answered with one of the two fallbacks.
pub fn validate_and_recover(primary: &mut File, backup: &mut File) -> Result<Recovery> {
    match verify_file(primary) {
        Ok(_) => return Ok(Recovery::Valid),
        Err(e) => tracing::warn!(file = "primary", error = %e, "data file failed validation"),
    }

    match verify_file(backup) {
        Ok(_) => {
            tracing::warn!("restoring data file from backup");
            let copied = copy_file(backup, primary)?;
            tracing::warn!(bytes = copied, "restore from backup complete");
            return Ok(Recovery::RestoredFromBackup);
        }
        Err(e) => tracing::warn!(file = "backup", error = %e, "backup file failed validation"),
    }

    tracing::warn!("initializing empty data file");
    primary.set_len(0)?;
    primary.seek(SeekFrom::Start(0))?;
    primary.write_all(&Header::empty().encode()?)?;
    primary.sync_all()?;
    Ok(Recovery::Initialized)
}

/// Check that `file` holds a whole header page, a payload of the declared
/// length, and (for a non-empty payload) a matching digest. Returns the header.
pub fn verify_file(file: &mut File) -> Result<Header> {
    let size = file.metadata()?.len();
    if size < PAGE_SIZE as u64 {
        return Err(Error::Corruption(format!("too small size: {size}")));
    }

    let mut page = vec![0u8; PAGE_SIZE];
    file.seek(SeekFrom::Start(0))?;
    file.read_exact(&mut page)?;
    let header = Header::decode(&page)?;

    let data = read_payload(file, header.data_len)?;
    if !data.is_empty() {
        verify_digest(&header, &data)?;
    }
    Ok(header)
}

/// Read `len` payload bytes starting at `PAGE_SIZE`. A short file is corruption.
///
/// The length comes from an unverified header, so it is checked against the
/// file size before anything is allocated.
pub fn read_payload(file: &mut File, len: usize) -> Result<Vec<u8>> {
    let size = file.metadata()?.len();
    let needed = PAGE_SIZE as u64 + len as u64;
    if size < needed {
        return Err(Error::Corruption(format!(
            "data size not match: header claims {len} bytes, file has {}",
            size.saturating_sub(PAGE_SIZE as u64)
        )));
    }
    let mut data = vec![0u8; len];
    file.seek(SeekFrom::Start(PAGE_SIZE as u64))?;
    match file.read_exact(&mut data) {
        Ok(()) => Ok(data),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(Error::Corruption(format!(
            "data size not match: expected {len} bytes after header"
        ))),
        Err(e) => Err(e.into()),
    }
}

/// Compare the digest recorded in `header` with the digest of `data`.
pub fn verify_digest(header: &Header, data: &[u8]) -> Result<()> {
    if header.digest.len() != digest::DIGEST_LEN {
        return Err(Error::Corruption(format!(
            "digest size not match: header={} expected={}",
            header.digest.len(),
            digest::DIGEST_LEN
        )));
    }
    if !digest::verify(data, &header.digest) {
        return Err(Error::Corruption(format!(
            "{} digest data not match",
            digest::DIGEST_ALGORITHM
        )));
    }
    Ok(())
}

fn copy_file(src: &mut File, dst: &mut File) -> Result<u64> {
    let len = src.metadata()?.len();
    src.seek(SeekFrom::Start(0))?;
    dst.seek(SeekFrom::Start(0))?;
    let copied = io::copy(&mut src.take(len), dst)?;
    if copied != len {
        return Err(Error::Corruption(format!(
            "backup data broken: copied {copied} of {len} bytes"
        )));
    }
    dst.set_len(len)?;
    dst.sync_all()?;
    Ok(len)
}
