//! # Transactional Key-Value File Store
//!
//! A small typed key-value store kept in a single local file that several
//! processes may read and write at once.
//!
//! ## Layers
//! - [`txfile`]: the engine. Primary + backup file, whole-file flock,
//!   memory-mapped header page, SHA-1 verified payload, backup restore at open.
//! - [`codec`]: tagged binary encoding of a string-keyed map of scalars and
//!   string sets.
//! - [`store`]: cached typed getters and batched, transactional edits over the
//!   two, plus a [`Registry`] handing out one store per file.
//!
//! Writes are serialized by the file lock; readers detect other writers'
//! commits by polling the version in the mapped header.

pub mod codec;
pub mod digest;
pub mod error;
pub mod options;
pub mod store;
pub mod txfile;
pub mod types;

// Public re-exports for the top-level API
pub use error::{Error, Result};
pub use options::Options;
pub use store::{Editor, Preferences, PreferencesEditor, Registry, Store};
pub use txfile::TransactionalFile;
pub use types::{Edit, KeyValueMap, Value};
