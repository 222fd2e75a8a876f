use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use memmap2::{MmapMut, MmapOptions};
use parking_lot::Mutex;

use crate::digest;
use crate::error::{Error, Result};
use crate::options::Options;
use crate::txfile::header::{
    next_version, Header, DIGEST_LEN_OFFSET, DIGEST_OFFSET, MAX_DIGEST_LEN, PAGE_SIZE,
};
use crate::txfile::permissions;
use crate::txfile::recovery::{self, Recovery};

/// A data file shared between processes, updated only through transactions.
///
/// Two files back each instance: the primary at `path` and a backup at
/// `path.bak`, both laid out as a [`Header`] page followed by the payload.
///
/// ```text
///  open ──► lock ──► validate/recover ──► mmap header ──► unlock
///
///  load_if_updated:  peek version in mmap (no lock)
///                        │ changed?
///                        ▼
///                    lock ──► compare version + digest ──► verified load ──► unlock
///
///  transaction:      lock ──► (reload if changed) ──► update(old) ──► save ──► unlock
///
///  save:  1. payload → primary, truncate, fsync
///         2. header  → mmap, msync
///         3. header + payload → backup, truncate, fsync
/// ```
///
/// Cross-process exclusion is a single flock on the primary file. Threads of
/// one process are serialized by an internal mutex on top of that.
pub struct TransactionalFile {
    data_path: PathBuf,
    backup_path: PathBuf,
    options: Options,
    inner: Mutex<Inner>,
}

struct Inner {
    handles: Option<Handles>,
    last: LastLoad,
    recovery: Option<Recovery>,
}

/// Open resources. Dropping this unmaps the header and closes both files,
/// which also releases any flock still held.
struct Handles {
    data: File,
    backup: File,
    header: MmapMut,
    locked: bool,
}

/// The state this handle last read or wrote.
#[derive(Default)]
struct LastLoad {
    version: i32,
    /// `None` until the first verified load, so the first comparison always
    /// reports a change.
    digest: Option<Vec<u8>>,
    data: Option<Vec<u8>>,
}

impl TransactionalFile {
    /// Create a handle for `path` without touching the filesystem.
    pub fn new(path: impl Into<PathBuf>, options: Options) -> Self {
        let data_path = path.into();
        let backup_path = backup_path_for(&data_path);
        TransactionalFile {
            data_path,
            backup_path,
            options,
            inner: Mutex::new(Inner {
                handles: None,
                last: LastLoad::default(),
                recovery: None,
            }),
        }
    }

    /// Create a handle and open it.
    pub fn open_with(path: impl Into<PathBuf>, options: Options) -> Result<Self> {
        let file = Self::new(path, options);
        file.open()?;
        Ok(file)
    }

    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    pub fn backup_path(&self) -> &Path {
        &self.backup_path
    }

    /// Permission mode applied to both files.
    pub fn mode(&self) -> u32 {
        self.options.mode
    }

    pub fn is_open(&self) -> bool {
        self.inner.lock().handles.is_some()
    }

    /// Outcome of validate-and-recover at the most recent `open`.
    pub fn recovery(&self) -> Option<Recovery> {
        self.inner.lock().recovery
    }

    /// Open both files (creating them if absent), validate and recover
    /// under the file lock, and map the header page.
    ///
    /// Fails with `IllegalState` if already open. On any failure every
    /// resource acquired so far is released.
    pub fn open(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.handles.is_some() {
            return Err(Error::IllegalState("already open"));
        }

        let (handles, recovery) = self.open_handles()?;
        inner.handles = Some(handles);
        inner.last = LastLoad::default();
        inner.recovery = Some(recovery);
        tracing::debug!(path = %self.data_path.display(), ?recovery, "opened data file");
        Ok(())
    }

    fn open_handles(&self) -> Result<(Handles, Recovery)> {
        let mut data = open_rw(&self.data_path)?;
        permissions::apply(&self.data_path, self.options.mode);
        let mut backup = open_rw(&self.backup_path)?;
        permissions::apply(&self.backup_path, self.options.mode);

        data.lock_exclusive()?;
        let mapped = recovery::validate_and_recover(&mut data, &mut backup).and_then(|recovery| {
            // SAFETY: the mapping covers only the header page, which every
            // writer updates under the file lock. Other processes may change
            // it concurrently; unlocked reads of it are treated as hints and
            // confirmed under the lock before any data is exposed.
            let header = unsafe { MmapOptions::new().len(PAGE_SIZE).map_mut(&data)? };
            Ok((header, recovery))
        });
        let unlocked = FileExt::unlock(&data);
        let (header, recovery) = mapped?;
        unlocked?;

        Ok((
            Handles {
                data,
                backup,
                header,
                locked: false,
            },
            recovery,
        ))
    }

    /// Release the lock, unmap the header and close both files.
    /// Safe to call when already closed.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        if let Some(mut handles) = inner.handles.take() {
            handles.unlock();
            drop(handles);
            tracing::debug!(path = %self.data_path.display(), "closed data file");
        }
    }

    /// Close, delete both files and open again: a full reset to empty.
    pub fn create(&self) -> Result<()> {
        self.close();
        remove_if_exists(&self.data_path)?;
        remove_if_exists(&self.backup_path)?;
        self.open()
    }

    /// Acquire the cross-process lock and keep it until [`unlock`](Self::unlock).
    ///
    /// Blocks until any other holder releases it. A no-op if this handle
    /// already holds the lock; locks are not counted.
    pub fn lock(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.handles_mut()?.lock()?;
        Ok(())
    }

    /// Release a lock taken with [`lock`](Self::lock). A no-op if not held.
    pub fn unlock(&self) {
        let mut inner = self.inner.lock();
        if let Some(handles) = inner.handles.as_mut() {
            handles.unlock();
        }
    }

    /// Read and verify the payload under the lock, unconditionally.
    pub fn load(&self) -> Result<Vec<u8>> {
        let mut inner = self.inner.lock();
        let Inner { handles, last, .. } = &mut *inner;
        let handles = handles.as_mut().ok_or(Error::IllegalState("not open"))?;
        handles.with_lock(|h| h.load(last))
    }

    /// Load the payload only if another writer changed it since this handle
    /// last looked. `Ok(None)` means "no update".
    ///
    /// The version field is first read from the mapped header without the
    /// lock; only a difference there leads to locking, a full comparison of
    /// version and digest, and a verified load.
    pub fn load_if_updated(&self) -> Result<Option<Vec<u8>>> {
        let mut inner = self.inner.lock();
        let Inner { handles, last, .. } = &mut *inner;
        let handles = handles.as_mut().ok_or(Error::IllegalState("not open"))?;

        if Header::peek_version(&handles.header) == last.version {
            return Ok(None);
        }
        handles.with_lock(|h| {
            if h.meta_changed(last) {
                h.load(last).map(Some)
            } else {
                Ok(None)
            }
        })
    }

    /// Replace the payload with `update(old)` atomically with respect to all
    /// other handles and processes.
    ///
    /// `old` is the current payload (`None` when there is none to read).
    /// Errors from `update` propagate unchanged and leave the files untouched.
    ///
    /// If the primary file was unlinked or replaced since this handle opened
    /// it (another handle's [`create`](Self::create), for one), the handle is
    /// reopened against the file now at the path before reading, so the
    /// write never lands in an orphaned file.
    pub fn transaction<F, E>(&self, update: F) -> std::result::Result<(), E>
    where
        F: FnOnce(Option<&[u8]>) -> std::result::Result<Vec<u8>, E>,
        E: From<Error>,
    {
        let mut inner = self.inner.lock();
        let Inner {
            handles,
            last,
            recovery,
        } = &mut *inner;
        let handles = handles
            .as_mut()
            .ok_or(Error::IllegalState("not open"))
            .map_err(E::from)?;

        let acquired = handles.lock().map_err(E::from)?;
        if handles.vanished(&self.data_path) {
            tracing::warn!(path = %self.data_path.display(), "data file replaced on disk, reopening");
            handles.unlock();
            let (fresh, outcome) = self.open_handles().map_err(E::from)?;
            *handles = fresh;
            *last = LastLoad::default();
            *recovery = Some(outcome);
            // Relocked on the new file; released below only if this call took it.
            handles.lock().map_err(E::from)?;
        }

        let result = (|| -> std::result::Result<(), E> {
            if handles.meta_changed(last) {
                handles.load(last).map_err(E::from)?;
            }
            let new_data = update(last.data.as_deref())?;
            handles.save(last, new_data).map_err(E::from)
        })();
        if acquired {
            handles.unlock();
        }
        result
    }

    /// Payload most recently loaded or written by this handle.
    pub fn last_load(&self) -> Option<Vec<u8>> {
        self.inner.lock().last.data.clone()
    }

    /// Version most recently loaded or written by this handle (0 before any).
    pub fn version(&self) -> i32 {
        self.inner.lock().last.version
    }

    /// Current contents of the mapped header page.
    pub fn header(&self) -> Result<Header> {
        let inner = self.inner.lock();
        let handles = inner
            .handles
            .as_ref()
            .ok_or(Error::IllegalState("not open"))?;
        Header::decode(&handles.header)
    }
}

impl Drop for TransactionalFile {
    fn drop(&mut self) {
        self.close();
    }
}

impl Inner {
    fn handles_mut(&mut self) -> Result<&mut Handles> {
        self.handles.as_mut().ok_or(Error::IllegalState("not open"))
    }
}

impl Handles {
    /// Take the flock unless already held. Returns true if it was acquired now.
    fn lock(&mut self) -> Result<bool> {
        if self.locked {
            return Ok(false);
        }
        self.data.lock_exclusive()?;
        self.locked = true;
        tracing::trace!("flock start");
        Ok(true)
    }

    fn unlock(&mut self) {
        if self.locked {
            if let Err(e) = FileExt::unlock(&self.data) {
                tracing::warn!(error = %e, "flock release failed");
            }
            self.locked = false;
            tracing::trace!("flock end");
        }
    }

    /// Run `f` under the lock, releasing it afterwards only if it was
    /// acquired here.
    fn with_lock<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let acquired = self.lock()?;
        let result = f(self);
        if acquired {
            self.unlock();
        }
        result
    }

    /// Whether `path` no longer names the file this handle has open.
    fn vanished(&self, path: &Path) -> bool {
        match fs::metadata(path) {
            Ok(on_disk) => match self.data.metadata() {
                Ok(open) => !same_file(&on_disk, &open),
                Err(_) => false,
            },
            Err(e) => e.kind() == io::ErrorKind::NotFound,
        }
    }

    /// Whether the mapped header differs from what `last` recorded.
    /// Version alone can collide after a wrap, so the digest is compared too.
    fn meta_changed(&self, last: &LastLoad) -> bool {
        let page = &self.header[..];
        if Header::peek_version(page) != last.version {
            return true;
        }
        let Some(last_digest) = last.digest.as_ref() else {
            return true;
        };
        let mut len = [0u8; 4];
        len.copy_from_slice(&page[DIGEST_LEN_OFFSET..DIGEST_OFFSET]);
        let len = i32::from_be_bytes(len);
        if len < 0 || len as usize != last_digest.len() || len as usize > MAX_DIGEST_LEN {
            return true;
        }
        page[DIGEST_OFFSET..DIGEST_OFFSET + last_digest.len()] != last_digest[..]
    }

    /// Verified load from the primary file. Caller holds the lock.
    fn load(&mut self, last: &mut LastLoad) -> Result<Vec<u8>> {
        let header = Header::decode(&self.header)?;
        tracing::debug!(
            len = header.data_len,
            version = header.version,
            digest_len = header.digest.len(),
            "load"
        );

        let data = recovery::read_payload(&mut self.data, header.data_len)?;
        if !data.is_empty() {
            recovery::verify_digest(&header, &data)
                .map_err(|e| Error::Corruption(format!("datafile is broken: {e}")))?;
        }

        last.version = header.version;
        last.digest = Some(header.digest);
        last.data = Some(data.clone());
        Ok(data)
    }

    /// Write `data` as the new payload. Caller holds the lock.
    fn save(&mut self, last: &mut LastLoad, data: Vec<u8>) -> Result<()> {
        let header = Header {
            data_len: data.len(),
            version: next_version(last.version),
            digest: if data.is_empty() {
                Vec::new()
            } else {
                digest::compute(&data)
            },
        };
        let page = header.encode()?;
        tracing::debug!(
            len = header.data_len,
            version = header.version,
            digest_len = header.digest.len(),
            "save"
        );

        // 1. payload
        self.data.seek(SeekFrom::Start(PAGE_SIZE as u64))?;
        self.data.write_all(&data)?;
        self.data.set_len(header.file_len())?;
        self.data.sync_all()?;

        // 2. header through the mapping
        self.header.copy_from_slice(&page);
        self.header.flush()?;

        // 3. backup: header + payload
        self.backup.set_len(header.file_len())?;
        self.backup.seek(SeekFrom::Start(0))?;
        self.backup.write_all(&page)?;
        self.backup.write_all(&data)?;
        self.backup.sync_all()?;

        last.version = header.version;
        last.digest = Some(header.digest);
        last.data = Some(data);
        Ok(())
    }
}

/// `<path>.bak`
pub fn backup_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".bak");
    PathBuf::from(name)
}

#[cfg(unix)]
fn same_file(a: &fs::Metadata, b: &fs::Metadata) -> bool {
    use std::os::unix::fs::MetadataExt;
    a.dev() == b.dev() && a.ino() == b.ino()
}

#[cfg(not(unix))]
fn same_file(_a: &fs::Metadata, _b: &fs::Metadata) -> bool {
    true
}

fn open_rw(path: &Path) -> Result<File> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;
    Ok(file)
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
