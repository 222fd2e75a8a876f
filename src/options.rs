/// Permission mode for files only the owner and group may access.
pub const PRIVATE_MODE: u32 = 0o660;

/// Permission mode for files other users may also read.
pub const SHARED_READ_MODE: u32 = 0o664;

/// Configuration for opening a transactional file or store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    /// POSIX mode bits applied (best-effort) to the primary and backup files.
    pub mode: u32,
}

impl Default for Options {
    fn default() -> Self {
        Options { mode: PRIVATE_MODE }
    }
}

impl Options {
    /// Options for a store other users may or may not read.
    pub fn other_read(readable: bool) -> Self {
        Options {
            mode: if readable { SHARED_READ_MODE } else { PRIVATE_MODE },
        }
    }

    /// Override the permission mode.
    pub fn mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }
}
