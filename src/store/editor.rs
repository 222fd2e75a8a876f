use crate::error::{Error, Result};
use crate::store::preferences::PreferencesEditor;
use crate::store::Store;
use crate::types::{Edit, KeyValueMap, Value};

/// Edits collected by an [`Editor`], in first-touch key order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingEdits {
    clear: bool,
    ops: Vec<(String, Edit)>,
}

impl PendingEdits {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `edit` for `key`, replacing any earlier edit of the same key.
    pub fn set(&mut self, key: &str, edit: Edit) {
        match self.ops.iter_mut().find(|(k, _)| k == key) {
            Some((_, slot)) => *slot = edit,
            None => self.ops.push((key.to_owned(), edit)),
        }
    }

    pub fn set_clear(&mut self) {
        self.clear = true;
    }

    pub fn clears(&self) -> bool {
        self.clear
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty() && !self.clear
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Edit)> {
        self.ops.iter().map(|(k, e)| (k.as_str(), e))
    }

    /// Apply every operation to `map`. The clear flag is not applied here;
    /// the caller decides the starting map.
    pub fn apply_to(&self, map: &mut KeyValueMap) {
        for (key, edit) in &self.ops {
            match edit {
                Edit::Tombstone => {
                    map.remove(key);
                }
                Edit::Set(value) => {
                    map.insert(key.clone(), value.clone());
                }
            }
        }
    }
}

/// Batch editor returned by [`Store::edit`](crate::Preferences::edit).
///
/// Nothing reaches disk until [`commit`](PreferencesEditor::commit). The
/// editor may be committed more than once; each commit re-applies the same
/// edits on top of the latest stored state.
pub struct Editor<'a> {
    store: &'a Store,
    edits: PendingEdits,
}

impl<'a> Editor<'a> {
    pub(crate) fn new(store: &'a Store) -> Self {
        Editor {
            store,
            edits: PendingEdits::new(),
        }
    }

    pub fn pending(&self) -> &PendingEdits {
        &self.edits
    }
}

impl PreferencesEditor for Editor<'_> {
    fn put(&mut self, key: &str, value: Value) -> &mut Self {
        tracing::trace!(key, kind = value.kind(), "pending put");
        self.edits.set(key, Edit::Set(value));
        self
    }

    fn remove(&mut self, key: &str) -> &mut Self {
        self.edits.set(key, Edit::Tombstone);
        self
    }

    fn clear(&mut self) -> &mut Self {
        self.edits.set_clear();
        self
    }

    fn commit(&self) -> Result<()> {
        self.store.commit_edits(&self.edits)
    }

    fn apply(&self) -> Result<()> {
        Err(Error::Unsupported("background update is not supported"))
    }
}
