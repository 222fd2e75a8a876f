pub mod engine;
pub mod header;
pub mod permissions;
pub mod recovery;

pub use engine::{backup_path_for, TransactionalFile};
pub use header::{Header, PAGE_SIZE};
pub use recovery::Recovery;
