pub mod editor;
pub mod preferences;
pub mod registry;

pub use editor::{Editor, PendingEdits};
pub use preferences::{ChangeListener, Preferences, PreferencesEditor};
pub use registry::Registry;

use std::path::PathBuf;

use parking_lot::Mutex;

use crate::codec::{self, Encoder};
use crate::error::{Error, Result};
use crate::options::Options;
use crate::txfile::TransactionalFile;
use crate::types::{Edit, KeyValueMap, Value};

/// Typed key-value store over a [`TransactionalFile`].
///
/// Reads are served from a decoded map cached in memory. Before every read
/// the store polls the file with `load_if_updated`, so a write made through
/// another handle or process becomes visible on the next read without any
/// notification mechanism.
///
/// Writes go through an [`Editor`] and are committed as one file
/// transaction: decode the current payload, apply the edits, re-encode.
pub struct Store {
    file: TransactionalFile,
    state: Mutex<State>,
}

struct State {
    /// `None` until first access and after `close`.
    map: Option<KeyValueMap>,
    encoder: Encoder,
}

impl Store {
    /// Open (creating if needed) the store backed by `path`.
    ///
    /// Most callers should go through a [`Registry`] so that one process
    /// keeps a single engine per file.
    pub fn open(path: impl Into<PathBuf>, options: Options) -> Result<Self> {
        Ok(Store {
            file: TransactionalFile::open_with(path, options)?,
            state: Mutex::new(State {
                map: None,
                encoder: Encoder::new(),
            }),
        })
    }

    /// The underlying file engine.
    pub fn file(&self) -> &TransactionalFile {
        &self.file
    }

    /// Delete both files and start over with an empty store.
    pub fn create(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.map = None;
        self.file.create()?;
        state.map = Some(codec::decode(&self.file.load()?)?);
        Ok(())
    }

    /// Replace the cache with a verified load, whether or not the file changed.
    pub fn reload(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.map = Some(codec::decode(&self.file.load()?)?);
        Ok(())
    }

    /// Drop the cache and release the file. Idempotent.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.map = None;
        self.file.close();
    }

    /// Encode the current contents, independent of the on-disk bytes.
    pub fn export_bytes(&self) -> Result<Vec<u8>> {
        let mut state = self.state.lock();
        let State { map, encoder } = &mut *state;
        let map = self.refresh(map)?;
        encoder.encode_map(map)
    }

    /// Merge a snapshot produced by [`export_bytes`](Self::export_bytes).
    pub fn import_bytes(&self, data: &[u8]) -> Result<()> {
        self.import_map(codec::decode(data)?)
    }

    /// Merge every entry of `src` in a single commit. Keys absent from
    /// `src` are left alone.
    pub fn import_map(&self, src: KeyValueMap) -> Result<()> {
        let mut edits = PendingEdits::new();
        for (key, value) in src {
            edits.set(&key, Edit::Set(value));
        }
        self.commit_edits(&edits)
    }

    /// Bring the cache up to date and return it.
    fn refresh<'m>(&self, map: &'m mut Option<KeyValueMap>) -> Result<&'m KeyValueMap> {
        let fresh = match map {
            None => Some(self.file.load()?),
            Some(_) => self.file.load_if_updated()?,
        };
        if let Some(data) = fresh {
            let decoded = codec::decode(&data)?;
            tracing::trace!(entries = decoded.len(), version = self.file.version(), "cache refreshed");
            *map = Some(decoded);
        }
        map.as_ref().ok_or(Error::IllegalState("cache missing after load"))
    }

    fn read<T>(&self, f: impl FnOnce(&KeyValueMap) -> T) -> Result<T> {
        let mut state = self.state.lock();
        let map = self.refresh(&mut state.map)?;
        Ok(f(map))
    }

    pub(crate) fn commit_edits(&self, edits: &PendingEdits) -> Result<()> {
        let mut state = self.state.lock();
        let State { map, encoder } = &mut *state;

        let mut committed = None;
        self.file.transaction(|old| -> Result<Vec<u8>> {
            let mut next = match old {
                Some(bytes) if !edits.clears() => codec::decode(bytes)?,
                _ => KeyValueMap::new(),
            };
            edits.apply_to(&mut next);
            let bytes = encoder.encode_map(&next)?;
            committed = Some(next);
            Ok(bytes)
        })?;

        tracing::debug!(
            path = %self.file.data_path().display(),
            edits = edits.len(),
            clear = edits.clears(),
            version = self.file.version(),
            "commit"
        );
        *map = committed;
        Ok(())
    }
}

impl Preferences for Store {
    type Editor<'a>
        = Editor<'a>
    where
        Self: 'a;

    fn get(&self, key: &str) -> Result<Option<Value>> {
        self.read(|map| map.get(key).cloned())
    }

    fn get_all(&self) -> Result<KeyValueMap> {
        self.read(KeyValueMap::clone)
    }

    fn contains(&self, key: &str) -> Result<bool> {
        self.read(|map| map.contains_key(key))
    }

    fn edit(&self) -> Editor<'_> {
        Editor::new(self)
    }

    fn register_change_listener(&self, _listener: ChangeListener) -> Result<()> {
        Err(Error::Unsupported("register_change_listener is not supported"))
    }

    fn unregister_change_listener(&self, _listener: &ChangeListener) -> Result<()> {
        Err(Error::Unsupported("unregister_change_listener is not supported"))
    }
}
