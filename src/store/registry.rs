use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::Result;
use crate::options::Options;
use crate::store::Store;

/// Hands out one shared [`Store`] per file so that a process never runs two
/// engines against the same path.
///
/// Entries are keyed by canonical path and hold only weak references: the
/// store lives as long as some caller holds its `Arc`. Dropping the last
/// `Arc` closes the file; [`release`](Self::release) does the same
/// explicitly and reports whether it happened.
///
/// Each path has its own slot. Opening a store can block on the file lock,
/// and only callers of that same path wait for it; the map lock is held
/// just long enough to find or create the slot.
#[derive(Default)]
pub struct Registry {
    slots: Mutex<HashMap<PathBuf, Arc<Slot>>>,
}

type Slot = Mutex<Weak<Store>>;

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the live store for `path`, opening it on a miss.
    ///
    /// `options` only matter when the store is opened here; an existing
    /// instance keeps the options it was opened with.
    pub fn get_or_open(&self, path: impl AsRef<Path>, options: Options) -> Result<Arc<Store>> {
        let key = canonical_path(path.as_ref())?;
        let slot = {
            let mut slots = self.slots.lock();
            slots.retain(|_, slot| slot_in_use(slot));
            Arc::clone(slots.entry(key.clone()).or_default())
        };

        let mut entry = slot.lock();
        if let Some(store) = entry.upgrade() {
            return Ok(store);
        }
        let store = Arc::new(Store::open(key.clone(), options)?);
        tracing::debug!(path = %key.display(), "registered store");
        *entry = Arc::downgrade(&store);
        Ok(store)
    }

    /// Give up one holder's reference. If it was the last one the store is
    /// closed and unregistered, and `true` is returned.
    pub fn release(&self, store: Arc<Store>) -> bool {
        let key = store.file().data_path().to_path_buf();
        match Arc::try_unwrap(store) {
            Ok(store) => {
                store.close();
                let mut slots = self.slots.lock();
                if slots.get(&key).is_some_and(|slot| !slot_in_use(slot)) {
                    slots.remove(&key);
                }
                tracing::debug!(path = %key.display(), "released store");
                true
            }
            Err(_) => false,
        }
    }

    /// Number of stores currently alive.
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|slot| slot.try_lock().is_some_and(|weak| weak.strong_count() > 0))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A slot is in use while someone else holds it (an open in progress) or
/// while its store is alive. Never blocks on a slot being opened.
fn slot_in_use(slot: &Arc<Slot>) -> bool {
    Arc::strong_count(slot) > 1 || slot.try_lock().is_none_or(|weak| weak.strong_count() > 0)
}

/// Canonical form of `path`. The file itself may not exist yet, so only the
/// parent directory is resolved in that case.
fn canonical_path(path: &Path) -> Result<PathBuf> {
    if let Ok(p) = fs::canonicalize(path) {
        return Ok(p);
    }
    let name = path.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("not a file path: {}", path.display()),
        )
    })?;
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    Ok(fs::canonicalize(parent)?.join(name))
}
